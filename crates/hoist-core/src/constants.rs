/// Default TCP port the upload server listens on.
pub const DEFAULT_PORT: u16 = 1819;

/// XChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Symmetric session key size in bytes (for XChaCha20-Poly1305).
pub const SESSION_KEY_SIZE: usize = 32;

/// RSA modulus size for the server identity, in bits.
pub const RSA_KEY_BITS: usize = 2048;

/// Maximum frame payload size in bytes (64 KiB).
///
/// A length prefix above this is rejected before any allocation happens.
pub const MAX_FRAME_BYTES: usize = 65_536;

/// File data chunk size for uploads, in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Maximum file name length accepted by the server, in bytes.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Characters used in generated file ids. Glyphs that are easy to misread
/// (`0`, `O`, `1`, `l`, `I`) are excluded.
pub const FILE_ID_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

/// Length of generated file ids.
pub const FILE_ID_LEN: usize = 10;
