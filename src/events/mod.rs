//! Event bus for pub/sub messaging
//!
//! Broadcasts container lifecycle, init progress, and monitoring events to
//! subscribers (the events WebSocket, tests).

mod bus;

pub use bus::{Event, EventBus, MonitorNotice};
