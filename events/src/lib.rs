//! # Tally Events
//!
//! Asynchronous delivery for the tally platform: the two event buses and
//! the clock-driven notification queue.
//!
//! The composition root installs one in-process bus and one persistent
//! bus - the same mechanism with a different wiring parameter - and the
//! notification queue on top of the shared transaction policy and the
//! primary published data source. This crate owns the delivery plumbing;
//! what flows through it is someone else's business.

pub mod bus;
pub mod notification;

// Re-export commonly used items
pub use bus::{BusError, BusEvent, BusWiring, EventBus, EventStream, PlatformBus};
pub use notification::{Notification, NotificationQueue, NotificationQueueError};
