//! Command history repository

use chrono::{DateTime, Utc};

use super::user::parse_datetime;
use super::{DbPool, connection};
use crate::services::{HistoryRecord, HistoryStore};
use crate::{Error, Result};

/// Command history repository
#[derive(Clone)]
pub struct HistoryRepo {
    pool: DbPool,
}

impl std::fmt::Debug for HistoryRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRepo").finish_non_exhaustive()
    }
}

impl HistoryRepo {
    /// Create a new history repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recent commands for a user, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let conn = connection(&self.pool)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, command, response, language, created_at
                 FROM command_history WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let records = stmt
            .query_map(rusqlite::params![user_id, limit], |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    command: row.get(2)?,
                    response: row.get(3)?,
                    language: row.get(4)?,
                    timestamp: parse_datetime(&row.get::<_, String>(5)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(records)
    }

    /// Delete all history for a user, returning how many rows went
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear(&self, user_id: &str) -> Result<usize> {
        let conn = connection(&self.pool)?;

        conn.execute("DELETE FROM command_history WHERE user_id = ?1", [user_id])
            .map_err(|e| Error::Database(e.to_string()))
    }
}

impl HistoryStore for HistoryRepo {
    fn append(&self, user_id: &str, command: &str, language: &str, timestamp: DateTime<Utc>) -> Result<i64> {
        let conn = connection(&self.pool)?;

        conn.execute(
            "INSERT INTO command_history (user_id, command, language, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            [user_id, command, language, &timestamp.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn set_response(&self, id: i64, response: &str) -> Result<()> {
        let conn = connection(&self.pool)?;

        conn.execute(
            "UPDATE command_history SET response = ?1 WHERE id = ?2",
            rusqlite::params![response, id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
