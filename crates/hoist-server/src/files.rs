//! File ids, staging, and the on-disk layout of stored uploads.
//!
//! In-flight transfers are written under the staging directory, named by
//! their transfer key. Only when an upload finishes does the file get a
//! public id and move into the storage directory; a crash can therefore
//! leave orphans in staging but never a half-written file behind a live
//! download link.

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info};

use hoist_core::constants::{FILE_ID_ALPHABET, FILE_ID_LEN};
use hoist_store::{Database, FileRecord};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

const MAX_ID_ATTEMPTS: usize = 64;

/// Draw a random id from the link alphabet. The alphabet leaves out
/// `l`, `o`, `0` and `1` so ids survive being read out loud.
fn random_file_id() -> String {
    let mut rng = OsRng;
    (0..FILE_ID_LEN)
        .map(|_| FILE_ID_ALPHABET[rng.gen_range(0..FILE_ID_ALPHABET.len())] as char)
        .collect()
}

/// Stored-file manager: allocates ids, moves staged transfers into place,
/// and keeps the metadata rows in sync with the filesystem.
pub struct FileManager {
    db: Arc<Mutex<Database>>,
    storage_dir: PathBuf,
    staging_dir: PathBuf,
    link_template: String,
}

impl FileManager {
    pub fn new(db: Arc<Mutex<Database>>, config: &ServerConfig) -> Self {
        Self {
            db,
            storage_dir: config.storage_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            link_template: config.link_template.clone(),
        }
    }

    /// Allocate an id that is free in both the database and the storage
    /// directory. The id is not claimed until its record is inserted, so
    /// a concurrent allocation of the same id fails on the primary key.
    pub async fn new_file_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = random_file_id();
            if db.file_id_taken(&candidate)? {
                continue;
            }
            if self.storage_path(&candidate).exists() {
                debug!(id = %candidate, "Skipping orphaned file in storage");
                continue;
            }
            return Ok(candidate);
        }
        Err(ServerError::IdAllocation)
    }

    /// Where an in-flight transfer is staged. Transfer keys are generated
    /// server-side, so the name is safe to join.
    pub fn stage_path(&self, transfer_key: &str) -> PathBuf {
        self.staging_dir.join(transfer_key)
    }

    /// Where a completed upload lives.
    pub fn storage_path(&self, file_id: &str) -> PathBuf {
        self.storage_dir.join(file_id)
    }

    /// Move a finished transfer from staging into storage.
    pub async fn promote(&self, transfer_key: &str, file_id: &str) -> Result<()> {
        tokio::fs::rename(self.stage_path(transfer_key), self.storage_path(file_id)).await?;
        Ok(())
    }

    pub async fn add_record(&self, record: &FileRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.insert_file(record)?;
        Ok(())
    }

    pub async fn set_downloadable(&self, file_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        Ok(db.set_downloadable(file_id)?)
    }

    pub async fn delete_record(&self, file_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        Ok(db.delete_file(file_id)?)
    }

    /// Remove a staged transfer, tolerating one that never made it to
    /// disk or was already promoted.
    pub async fn discard_stage(&self, transfer_key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.stage_path(transfer_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stored file, tolerating a missing one.
    pub async fn remove_stored(&self, file_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.storage_path(file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Render the public download link for a file id.
    pub fn link_for(&self, file_id: &str) -> String {
        self.link_template.replace("{id}", file_id)
    }

    /// Delete leftovers of transfers that died with the previous process.
    /// Reservations live in memory only, so after a restart nothing can
    /// still be writing to these.
    pub async fn sweep_staging(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "Removed abandoned transfer files");
        }
        Ok(removed)
    }
}
