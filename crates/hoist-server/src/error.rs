use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] hoist_store::StoreError),

    #[error("Wire error: {0}")]
    Wire(#[from] hoist_core::WireError),

    #[error("Key error: {0}")]
    Key(#[from] hoist_core::KeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Peer timed out")]
    Timeout,

    #[error("Could not allocate a free file id")]
    IdAllocation,
}

pub type Result<T> = std::result::Result<T, ServerError>;
