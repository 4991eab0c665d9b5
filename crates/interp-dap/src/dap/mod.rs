pub mod codec;
pub mod messages;
pub mod types;

/// Upper bound on an incoming `Content-Length`, checked before the body buffer is allocated.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum allowed size of a single DAP header line (in bytes).
pub const MAX_DAP_HEADER_LINE_BYTES: usize = 8 * 1024; // 8 KiB
