//! PTY session management
//!
//! Long-lived TTY execs into running containers, multiplexed to any number
//! of WebSocket clients, with compressed rolling history and an output
//! callback consumed by the monitoring subsystem.

mod history;
mod manager;
mod session;

pub use history::History;
pub use manager::{PtyManager, SessionHook};
pub use session::{ClientHandle, PtySession, SessionInfo};
