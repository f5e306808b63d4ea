//! Infrastructure layer: repositories, the price sync queue, the automation driver,
//! configuration and outbound notifications.

pub mod automation;
pub mod config;
pub mod notify;
pub mod repository;
pub mod sync;
