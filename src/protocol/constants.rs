//! Wire Protocol Constants

/// Size of the fixed frame header: version (2) + type (2) + length (4)
pub const FRAME_HEADER_LEN: usize = 8;

/// Protocol version written by the standalone client
pub const PROTOCOL_VERSION: u16 = 1;

/// Default upper bound on a frame payload (16 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 16 * 1024 * 1024;

// Reference deployment ports
pub const DEFAULT_LISTEN_PORT: u16 = 25577;
pub const DEFAULT_TARGET_PORT: u16 = 5051;

/// Connect timeout used by the standalone client, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
