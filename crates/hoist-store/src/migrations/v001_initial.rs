//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` and `files`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY NOT NULL,
    password_hash TEXT NOT NULL,               -- argon2id PHC string
    quota_used    INTEGER NOT NULL DEFAULT 0,
    quota_total   INTEGER NOT NULL,
    created_at    TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Files (metadata only; bytes live on disk under the file id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    file_id      TEXT PRIMARY KEY NOT NULL,
    owner        TEXT NOT NULL,                -- FK -> users(user_id)
    file_name    TEXT NOT NULL,
    size         INTEGER NOT NULL,
    downloadable INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    created_at   TEXT NOT NULL,

    FOREIGN KEY (owner) REFERENCES users(user_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
