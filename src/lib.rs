//! framerelay
//!
//! Transparent TCP relay for a length-prefixed binary frame protocol. Every
//! downstream connection is paired with its own upstream connection and
//! whole frames are forwarded in both directions without being interpreted.

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod shutdown;

pub use broker::{Broker, BrokerHandle};
pub use client::FrameClient;
pub use config::Config;
pub use error::RelayError;
pub use protocol::{Frame, FrameCodec, FrameHeader};
pub use shutdown::ShutdownCoordinator;

/// Common result type for configuration and bootstrap code
pub type Result<T> = anyhow::Result<T>;
