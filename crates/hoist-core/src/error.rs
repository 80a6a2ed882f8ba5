use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Session key unwrap failed")]
    UnwrapFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Field of {len} bytes exceeds the {max} byte limit")]
    FieldTooLong { len: usize, max: usize },

    #[error("Frame payload ended before the field was complete")]
    Truncated,

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Frame payload has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Server key for {addr} does not match the pinned fingerprint (pinned {pinned}, presented {presented})")]
    Mismatch {
        addr: String,
        pinned: String,
        presented: String,
    },

    #[error("Trust store parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
