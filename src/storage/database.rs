//! Persistent SQLite database for chat models and bot users.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS chatgpt (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model VARCHAR(256) NOT NULL UNIQUE,
        priority SMALLINT NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username VARCHAR(32) UNIQUE,
        first_name VARCHAR(32),
        last_name VARCHAR(32),
        ban_reason VARCHAR(1024),
        is_active BOOLEAN NOT NULL DEFAULT 1,
        is_superuser BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS access_token (
        token VARCHAR(42) PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_question_count (
        user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
        question_count INTEGER NOT NULL DEFAULT 0,
        last_question_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_chatgpt_priority ON chatgpt(priority DESC, id ASC);
    CREATE INDEX IF NOT EXISTS idx_access_token_user_id ON access_token(user_id);
"#;

/// Shared handle to the SQLite connection. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self::init(Connection::open(path)?)?;
        info!("Opened database at {:?}", path);
        Ok(db)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Lock the connection for one unit of work.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite itself inconsistent
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.lock().execute_batch(SCHEMA).unwrap();
        let tables: i64 = db
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('chatgpt', 'users', 'access_token', 'user_question_count')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chatgpt.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
