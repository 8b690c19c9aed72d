//! Frame Relay Module
//!
//! Sessions, the per-direction forwarding pumps and the registry of live
//! sessions.

pub mod engine;
pub mod pump;
pub mod registry;
pub mod session;

pub use engine::RelayEngine;
pub use pump::{Pump, PumpExit};
pub use registry::SessionRegistry;
pub use session::{RelaySession, SessionId, SessionState, SessionStats};
