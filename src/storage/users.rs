//! Bot users: ban state, question counters and admin API tokens.

use rusqlite::{OptionalExtension, params};
use tracing::{info, warn};

use super::database::{Database, StorageError};

/// Telegram identity of a message sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub ban_reason: Option<String>,
    pub question_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanStatus {
    pub is_banned: bool,
    pub ban_reason: Option<String>,
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, user_id: i64) -> Result<Option<User>, StorageError> {
        let conn = self.db.lock();
        let user = conn
            .query_row(
                "SELECT u.id, u.username, u.first_name, u.last_name, u.is_active, u.ban_reason,
                        COALESCE(q.question_count, 0)
                 FROM users u LEFT JOIN user_question_count q ON q.user_id = u.id
                 WHERE u.id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        is_active: row.get(4)?,
                        ban_reason: row.get(5)?,
                        question_count: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Return the stored user, creating an active one on first contact.
    ///
    /// Telegram usernames move between accounts, so the sender's current
    /// username is taken over from any other regular user holding it.
    /// A superuser keeps its name; the sender is then stored without one.
    pub fn get_or_create(&self, new_user: &NewUser) -> Result<User, StorageError> {
        {
            let mut conn = self.db.lock();
            let tx = conn.transaction()?;
            let mut username = new_user.username.as_deref();
            if let Some(name) = username {
                let released = tx.execute(
                    "UPDATE users SET username = NULL WHERE username = ?1 AND id != ?2 AND is_superuser = 0",
                    params![name, new_user.id],
                )?;
                if released > 0 {
                    info!(user_id = new_user.id, username = name, "username moved to a new account");
                }
                let still_held: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 AND id != ?2)",
                    params![name, new_user.id],
                    |row| row.get(0),
                )?;
                if still_held {
                    warn!(user_id = new_user.id, username = name, "username belongs to a superuser, storing without it");
                    username = None;
                }
            }
            tx.execute(
                "INSERT INTO users (id, username, first_name, last_name, is_active, is_superuser, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, 0, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    first_name = excluded.first_name,
                    last_name = excluded.last_name",
                params![new_user.id, username, new_user.first_name, new_user.last_name, now()],
            )?;
            tx.commit()?;
        }
        self.get(new_user.id)?
            .ok_or(StorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Unknown users are not banned.
    pub fn ban_status(&self, user_id: i64) -> Result<BanStatus, StorageError> {
        let conn = self.db.lock();
        let row: Option<(bool, Option<String>)> = conn
            .query_row(
                "SELECT is_active, ban_reason FROM users WHERE id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((is_active, ban_reason)) => BanStatus { is_banned: !is_active, ban_reason },
            None => BanStatus::default(),
        })
    }

    /// Returns false when the user does not exist.
    pub fn ban(&self, user_id: i64, reason: &str) -> Result<bool, StorageError> {
        let changed = self.db.lock().execute(
            "UPDATE users SET is_active = 0, ban_reason = ?2 WHERE id = ?1",
            params![user_id, reason],
        )?;
        if changed > 0 {
            info!(user_id, reason, "🚫 user banned");
        }
        Ok(changed > 0)
    }

    pub fn unban(&self, user_id: i64) -> Result<bool, StorageError> {
        let changed = self.db.lock().execute(
            "UPDATE users SET is_active = 1, ban_reason = NULL WHERE id = ?1",
            params![user_id],
        )?;
        if changed > 0 {
            info!(user_id, "user unbanned");
        }
        Ok(changed > 0)
    }

    pub fn increment_question_count(&self, user_id: i64) -> Result<(), StorageError> {
        self.db.lock().execute(
            "INSERT INTO user_question_count (user_id, question_count, last_question_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                question_count = question_count + 1,
                last_question_at = ?2",
            params![user_id, now()],
        )?;
        Ok(())
    }

    /// Create or promote the admin API superuser and replace its token.
    pub fn ensure_superuser(&self, username: &str, token: &str) -> Result<(), StorageError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        // Telegram user ids are positive; API-only accounts take negative ids
        tx.execute(
            "INSERT INTO users (id, username, first_name, is_active, is_superuser, created_at)
             VALUES ((SELECT COALESCE(MIN(id), 0) - 1 FROM users WHERE id < 0), ?1, ?1, 1, 1, ?2)
             ON CONFLICT(username) DO UPDATE SET is_superuser = 1",
            params![username, now()],
        )?;
        let user_id: i64 =
            tx.query_row("SELECT id FROM users WHERE username = ?1", params![username], |row| row.get(0))?;
        tx.execute("DELETE FROM access_token WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "INSERT OR REPLACE INTO access_token (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, now()],
        )?;
        tx.commit()?;
        info!(username, "superuser access token installed");
        Ok(())
    }

    pub fn access_token_for(&self, username: &str) -> Result<Option<String>, StorageError> {
        let conn = self.db.lock();
        let token = conn
            .query_row(
                "SELECT t.token FROM access_token t JOIN users u ON u.id = t.user_id
                 WHERE u.username = ?1 ORDER BY t.created_at DESC LIMIT 1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }
}
