//! Prioritized registry of chat model identifiers.
//!
//! The model with the highest priority is the one used to answer questions.
//! Ties are broken by insertion order (lowest id first).

use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ModelSeed;
use crate::storage::{Database, StorageError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no chat model configured")]
    NoModelConfigured,
    #[error("chat model {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatModel {
    pub id: i64,
    pub model: String,
    pub priority: u32,
}

#[derive(Clone)]
pub struct ModelRegistry {
    db: Database,
}

impl ModelRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All models, highest priority first.
    pub fn list(&self) -> Result<Vec<ChatModel>, RegistryError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, model, priority FROM chatgpt ORDER BY priority DESC, id ASC",
        )?;
        let models = stmt
            .query_map([], |row| {
                Ok(ChatModel { id: row.get(0)?, model: row.get(1)?, priority: row.get(2)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(models)
    }

    /// Identifier of the model questions should go to.
    pub fn current(&self) -> Result<String, RegistryError> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT model FROM chatgpt ORDER BY priority DESC, id ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(RegistryError::NoModelConfigured)
    }

    pub fn set_priority(&self, id: i64, priority: u32) -> Result<(), RegistryError> {
        let changed = self.db.lock().execute(
            "UPDATE chatgpt SET priority = ?2 WHERE id = ?1",
            params![id, priority],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound(id));
        }
        info!(id, priority, "chat model priority changed");
        Ok(())
    }

    /// Set every priority back to 0 in a single transaction.
    pub fn reset_all(&self) -> Result<(), RegistryError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute("UPDATE chatgpt SET priority = 0", [])?;
        tx.commit()?;
        info!(models = changed, "chat model priorities reset");
        Ok(())
    }

    /// Insert-or-ignore: an existing model is returned unchanged.
    pub fn add(&self, model: &str, priority: u32) -> Result<ChatModel, RegistryError> {
        let conn = self.db.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chatgpt (model, priority) VALUES (?1, ?2)",
            params![model, priority],
        )?;
        if inserted == 0 {
            debug!(model, "chat model already registered");
        } else {
            info!(model, priority, "chat model added");
        }
        let stored = conn.query_row(
            "SELECT id, model, priority FROM chatgpt WHERE model = ?1",
            params![model],
            |row| Ok(ChatModel { id: row.get(0)?, model: row.get(1)?, priority: row.get(2)? }),
        )?;
        Ok(stored)
    }

    pub fn delete(&self, id: i64) -> Result<(), RegistryError> {
        let changed = self.db.lock().execute("DELETE FROM chatgpt WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(RegistryError::NotFound(id));
        }
        info!(id, "chat model deleted");
        Ok(())
    }

    /// Insert the seed list with insert-or-ignore semantics. Returns how many rows were new.
    pub fn seed(&self, models: &[ModelSeed]) -> Result<usize, RegistryError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for seed in models {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO chatgpt (model, priority) VALUES (?1, ?2)",
                params![seed.model, seed.priority],
            )?;
        }
        tx.commit()?;
        if inserted > 0 {
            info!("📥 Seeded {} new chat model(s)", inserted);
        }
        Ok(inserted)
    }
}
