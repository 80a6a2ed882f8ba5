//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// UserAccount
// ---------------------------------------------------------------------------

/// An account that may authenticate and upload files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    /// Login name, the primary key.
    pub user_id: String,
    /// Argon2id hash of the password, in PHC string format. The plaintext
    /// password never reaches this layer.
    pub password_hash: String,
    /// Bytes of permanently stored files charged to this account.
    pub quota_used: i64,
    /// Byte ceiling for this account.
    pub quota_total: i64,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// Metadata for one stored file.
///
/// `downloadable` starts false and is flipped exactly once, after the file
/// bytes have been moved into permanent storage. The download side must
/// treat a non-downloadable record as absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    /// Short random identifier, also the storage file name and the tail of
    /// the download link.
    pub file_id: String,
    /// Owning account.
    pub owner: String,
    /// Original file name as sent by the client. Display metadata only,
    /// never used as a filesystem path.
    pub file_name: String,
    /// File size in bytes.
    pub size: i64,
    /// Whether the file may be served for download.
    pub downloadable: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}
