//! Client error types.

use thiserror::Error;

use hoist_core::{KeyError, TrustError, WireError};

/// Everything that can go wrong on the client side of an upload.
///
/// The worker sorts these into batch-fatal and per-item failures, so the
/// variants keep trust and authentication rejections apart from plain
/// transport faults.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server key could not be verified against the pin store. This
    /// also covers an unreadable pin store; an unverifiable server is not
    /// connected to.
    #[error("Server not trusted: {0}")]
    Untrusted(#[from] TrustError),

    #[error("Transport error: {0}")]
    Transport(#[from] WireError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Login rejected by the server")]
    LoginFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
