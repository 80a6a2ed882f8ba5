//! User accounts, password checks, and quota bookkeeping.
//!
//! Quota is charged in two phases. `reserve` sets bytes aside while an
//! upload is in flight so concurrent uploads cannot oversubscribe the
//! account; `commit` turns the reservation into persisted usage once the
//! file is stored, and `release` returns it if the transfer dies. The
//! reservation map lives only in memory, so a restart implicitly releases
//! everything (abandoned staging files are swept at startup).

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::{password_hash::SaltString, Argon2};
use chrono::Utc;
use tokio::sync::Mutex;

use hoist_store::{Database, StoreError, UserAccount};

use crate::error::{Result, ServerError};

/// Hash a password with Argon2id, returning a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServerError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored PHC string.
pub fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| ServerError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Account and quota manager.
///
/// Lock order is always `db` before `reserved`; `release` takes only the
/// reservation lock and therefore cannot deadlock against the others.
pub struct UserManager {
    db: Arc<Mutex<Database>>,
    reserved: Mutex<HashMap<String, u64>>,
}

impl UserManager {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            db,
            reserved: Mutex::new(HashMap::new()),
        }
    }

    /// Create an account with a fresh password hash and an empty ledger.
    pub async fn add_user(&self, user_id: &str, password: &str, quota: u64) -> Result<()> {
        let account = UserAccount {
            user_id: user_id.to_string(),
            password_hash: hash_password(password)?,
            quota_used: 0,
            // SQLite stores i64; clamp quotas beyond that.
            quota_total: i64::try_from(quota).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        };
        let db = self.db.lock().await;
        db.insert_user(&account)?;
        Ok(())
    }

    /// Reset an existing user's password. Returns `false` when the user
    /// does not exist.
    pub async fn set_password(&self, user_id: &str, password: &str) -> Result<bool> {
        let hash = hash_password(password)?;
        let db = self.db.lock().await;
        Ok(db.update_password_hash(user_id, &hash)?)
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        Ok(db.user_exists(user_id)?)
    }

    /// Check a user's credentials. Unknown users and wrong passwords both
    /// come back as `Ok(false)`; only infrastructure failures are errors.
    pub async fn authenticate(&self, user_id: &str, password: &str) -> Result<bool> {
        let account = {
            let db = self.db.lock().await;
            match db.get_user(user_id) {
                Ok(account) => account,
                Err(StoreError::NotFound) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        };
        // The db lock is dropped here; Argon2 verification is slow.
        verify_password(&account.password_hash, password)
    }

    /// Set `size` bytes aside for an upload. Returns `false` when the
    /// user is unknown or persisted usage plus outstanding reservations
    /// would exceed the quota.
    pub async fn reserve(&self, user_id: &str, size: u64) -> Result<bool> {
        let db = self.db.lock().await;
        let mut reserved = self.reserved.lock().await;

        let account = match db.get_user(user_id) {
            Ok(account) => account,
            Err(StoreError::NotFound) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let used = account.quota_used.max(0) as u64;
        let total = account.quota_total.max(0) as u64;
        let pending = reserved.get(user_id).copied().unwrap_or(0);

        let needed = match used.checked_add(pending).and_then(|n| n.checked_add(size)) {
            Some(needed) => needed,
            None => return Ok(false),
        };
        if needed > total {
            return Ok(false);
        }

        reserved.insert(user_id.to_string(), pending + size);
        Ok(true)
    }

    /// Turn a reservation into persisted usage. The database is updated
    /// first; the reservation is only dropped once the new usage is on
    /// disk, so a crash in between over-counts rather than under-counts.
    pub async fn commit(&self, user_id: &str, size: u64) -> Result<()> {
        let db = self.db.lock().await;
        let mut reserved = self.reserved.lock().await;

        let delta = i64::try_from(size).unwrap_or(i64::MAX);
        db.add_quota_used(user_id, delta)?;

        if let Some(pending) = reserved.get_mut(user_id) {
            *pending = pending.saturating_sub(size);
            if *pending == 0 {
                reserved.remove(user_id);
            }
        }
        Ok(())
    }

    /// Return reserved bytes without charging them. Used whenever an
    /// upload dies before it was committed.
    pub async fn release(&self, user_id: &str, size: u64) {
        let mut reserved = self.reserved.lock().await;
        if let Some(pending) = reserved.get_mut(user_id) {
            *pending = pending.saturating_sub(size);
            if *pending == 0 {
                reserved.remove(user_id);
            }
        }
    }

    /// Undo a previous `commit`, subtracting from persisted usage.
    pub async fn refund(&self, user_id: &str, size: u64) -> Result<()> {
        let db = self.db.lock().await;
        let delta = i64::try_from(size).unwrap_or(i64::MAX);
        db.add_quota_used(user_id, -delta)?;
        Ok(())
    }

    /// Outstanding reservation for a user, zero when none.
    pub async fn reserved_bytes(&self, user_id: &str) -> u64 {
        self.reserved
            .lock()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Persisted usage and total quota, straight from the database.
    pub async fn usage(&self, user_id: &str) -> Result<(u64, u64)> {
        let db = self.db.lock().await;
        let account = db.get_user(user_id)?;
        Ok((
            account.quota_used.max(0) as u64,
            account.quota_total.max(0) as u64,
        ))
    }
}
