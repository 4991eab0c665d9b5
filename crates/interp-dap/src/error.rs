use thiserror::Error;

use crate::dap::codec::DapError;

/// Failure to hand a message to the client.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("outbound DAP channel is closed")]
    Closed,
    #[error("failed to encode DAP message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fatal dispatcher errors.
///
/// Client mistakes (unknown commands, bad handles, engine step failures) are reported as failed
/// responses and never surface here.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dap(#[from] DapError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
