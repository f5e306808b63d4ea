//! Engine notifications: publish/subscribe mechanics.
//!
//! The scheduler and the price sync queue announce state transitions here instead of
//! relying on database change subscriptions. Reporting layers subscribe to whatever they
//! need; the engine does not know which transport (SSE, websocket, log) sits behind it.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
