//! HTTP API: store-scoped routes over the automation engine, plus server wiring.

pub mod app;
