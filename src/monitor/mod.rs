//! Silence-driven terminal automation
//!
//! Watches PTY output per session; when the configured silence threshold
//! elapses without output, the active strategy decides an action (inject a
//! command, skip, notify, or complete the current task).

mod manager;
mod ring;
mod session;
pub mod strategy;

pub use manager::{MonitorManager, MonitorStatus};
pub use ring::ContextRing;
pub use session::MonitorSession;
