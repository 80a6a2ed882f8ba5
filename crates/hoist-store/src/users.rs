use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserAccount;

impl Database {
    pub fn insert_user(&self, user: &UserAccount) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (user_id, password_hash, quota_used, quota_total, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.user_id,
                user.password_hash,
                user.quota_used,
                user.quota_total,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserAccount> {
        self.conn()
            .query_row(
                "SELECT user_id, password_hash, quota_used, quota_total, created_at
                 FROM users
                 WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE user_id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?2 WHERE user_id = ?1",
            params![user_id, password_hash],
        )?;
        Ok(affected > 0)
    }

    /// Adjust `quota_used` by `delta` bytes (negative to refund).
    ///
    /// The update is guarded in SQL: a result below zero or above
    /// `quota_total` leaves the row untouched and returns
    /// [`StoreError::QuotaOutOfRange`].
    pub fn add_quota_used(&self, user_id: &str, delta: i64) -> Result<i64> {
        let affected = self.conn().execute(
            "UPDATE users SET quota_used = quota_used + ?2
             WHERE user_id = ?1
               AND quota_used + ?2 >= 0
               AND quota_used + ?2 <= quota_total",
            params![user_id, delta],
        )?;
        if affected == 0 {
            if self.user_exists(user_id)? {
                return Err(StoreError::QuotaOutOfRange);
            }
            return Err(StoreError::NotFound);
        }
        Ok(self.get_user(user_id)?.quota_used)
    }

    pub fn list_users(&self) -> Result<Vec<UserAccount>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, password_hash, quota_used, quota_total, created_at
             FROM users
             ORDER BY user_id",
        )?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserAccount> {
    let user_id: String = row.get(0)?;
    let password_hash: String = row.get(1)?;
    let quota_used: i64 = row.get(2)?;
    let quota_total: i64 = row.get(3)?;
    let created_str: String = row.get(4)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(UserAccount {
        user_id,
        password_hash,
        quota_used,
        quota_total,
        created_at,
    })
}
