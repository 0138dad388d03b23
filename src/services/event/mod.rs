//! Service events
//!
//! - `types`: events, listener trait, configuration and statistics
//! - `event_bus`: the listener table and synchronous delivery
//! - `stream`: async event streams backed by tokio channels

pub mod event_bus;
pub mod stream;
pub mod types;

pub use stream::ServiceEventStream;
pub use types::{
    EventConfig, EventStats, ListenerId, ServiceEvent, ServiceEventKind, ServiceListener,
};
