//! Frame Protocol Implementation
//!
//! The 8-byte big-endian header plus opaque payload that the relay forwards.

pub mod codec;
pub mod constants;
pub mod types;

pub use codec::FrameCodec;
pub use constants::*;
pub use types::*;
