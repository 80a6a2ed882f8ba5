use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::FileRecord;

impl Database {
    pub fn insert_file(&self, file: &FileRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (file_id, owner, file_name, size, downloadable, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.file_id,
                file.owner,
                file.file_name,
                file.size,
                file.downloadable,
                file.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, file_id: &str) -> Result<FileRecord> {
        self.conn()
            .query_row(
                "SELECT file_id, owner, file_name, size, downloadable, created_at
                 FROM files
                 WHERE file_id = ?1",
                params![file_id],
                row_to_file,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn file_id_taken(&self, file_id: &str) -> Result<bool> {
        let taken: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM files WHERE file_id = ?1)",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    /// Mark a stored file as ready to serve. Records start out hidden
    /// until their on-disk payload is in place.
    pub fn set_downloadable(&self, file_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE files SET downloadable = 1 WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_file(&self, file_id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM files WHERE file_id = ?1", params![file_id])?;
        Ok(affected > 0)
    }

    pub fn list_files_by_owner(&self, owner: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT file_id, owner, file_name, size, downloadable, created_at
             FROM files
             WHERE owner = ?1
             ORDER BY created_at, file_id",
        )?;

        let rows = stmt.query_map(params![owner], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let file_id: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let file_name: String = row.get(2)?;
    let size: i64 = row.get(3)?;
    let downloadable: bool = row.get(4)?;
    let created_str: String = row.get(5)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(FileRecord {
        file_id,
        owner,
        file_name,
        size,
        downloadable,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserAccount;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        db.insert_user(&UserAccount {
            user_id: "alice".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            quota_used: 0,
            quota_total: 1 << 20,
            created_at: Utc::now(),
        })
        .unwrap();
        (db, dir)
    }

    fn record(file_id: &str, name: &str) -> FileRecord {
        FileRecord {
            file_id: file_id.to_string(),
            owner: "alice".to_string(),
            file_name: name.to_string(),
            size: 64,
            downloadable: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_get() {
        let (db, _dir) = test_db();
        db.insert_file(&record("abc123defg", "notes.txt")).unwrap();

        let loaded = db.get_file("abc123defg").unwrap();
        assert_eq!(loaded.owner, "alice");
        assert_eq!(loaded.file_name, "notes.txt");
        assert_eq!(loaded.size, 64);
        assert!(!loaded.downloadable);
    }

    #[test]
    fn missing_file_is_not_found() {
        let (db, _dir) = test_db();
        assert!(matches!(db.get_file("zzzzzzzzzz"), Err(StoreError::NotFound)));
        assert!(!db.file_id_taken("zzzzzzzzzz").unwrap());
    }

    #[test]
    fn id_taken_after_insert() {
        let (db, _dir) = test_db();
        db.insert_file(&record("abc123defg", "notes.txt")).unwrap();
        assert!(db.file_id_taken("abc123defg").unwrap());
    }

    #[test]
    fn downloadable_flip() {
        let (db, _dir) = test_db();
        db.insert_file(&record("abc123defg", "notes.txt")).unwrap();

        assert!(db.set_downloadable("abc123defg").unwrap());
        assert!(db.get_file("abc123defg").unwrap().downloadable);
        assert!(!db.set_downloadable("zzzzzzzzzz").unwrap());
    }

    #[test]
    fn delete_removes_record() {
        let (db, _dir) = test_db();
        db.insert_file(&record("abc123defg", "notes.txt")).unwrap();

        assert!(db.delete_file("abc123defg").unwrap());
        assert!(matches!(db.get_file("abc123defg"), Err(StoreError::NotFound)));
        assert!(!db.delete_file("abc123defg").unwrap());
    }

    #[test]
    fn list_by_owner_ignores_other_users() {
        let (db, _dir) = test_db();
        db.insert_user(&UserAccount {
            user_id: "bob".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            quota_used: 0,
            quota_total: 1 << 20,
            created_at: Utc::now(),
        })
        .unwrap();

        db.insert_file(&record("aaaaaaaaaa", "one.txt")).unwrap();
        db.insert_file(&record("bbbbbbbbbb", "two.txt")).unwrap();
        db.insert_file(&FileRecord {
            owner: "bob".to_string(),
            ..record("cccccccccc", "three.txt")
        })
        .unwrap();

        let files = db.list_files_by_owner("alice").unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaa", "bbbbbbbbbb"]);
    }

    #[test]
    fn deleting_owner_cascades_to_files() {
        let (db, _dir) = test_db();
        db.insert_file(&record("abc123defg", "notes.txt")).unwrap();

        db.conn()
            .execute("DELETE FROM users WHERE user_id = 'alice'", [])
            .unwrap();
        assert!(!db.file_id_taken("abc123defg").unwrap());
    }

    #[test]
    fn unknown_owner_rejected() {
        let (db, _dir) = test_db();
        let mut rec = record("abc123defg", "notes.txt");
        rec.owner = "nobody".to_string();
        assert!(db.insert_file(&rec).is_err());
    }
}
