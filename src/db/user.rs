//! User repository

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::{DbPool, connection};
use crate::services::{SettingsStore, UserSettings};
use crate::{Error, Result};

/// A registered voice user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub language: String,
    pub personality_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl std::fmt::Debug for UserRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRepo").finish_non_exhaustive()
    }
}

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a user, or update language and personality of an existing one
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert(&self, user_id: &str, language: &str, personality_prompt: Option<&str>) -> Result<User> {
        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (user_id, language, personality_prompt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                language = ?2, personality_prompt = ?3, updated_at = ?4",
            rusqlite::params![user_id, language, personality_prompt, now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            "SELECT user_id, language, personality_prompt, created_at, updated_at
             FROM users WHERE user_id = ?1",
            [user_id],
            row_to_user,
        )
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Find a user by ID (returns None if not found)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, user_id: &str) -> Result<Option<User>> {
        let conn = connection(&self.pool)?;

        conn.query_row(
            "SELECT user_id, language, personality_prompt, created_at, updated_at
             FROM users WHERE user_id = ?1",
            [user_id],
            row_to_user,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// List all users
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_all(&self) -> Result<Vec<User>> {
        let conn = connection(&self.pool)?;

        let mut stmt = conn
            .prepare(
                "SELECT user_id, language, personality_prompt, created_at, updated_at
                 FROM users ORDER BY user_id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let users = stmt
            .query_map([], row_to_user)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(users)
    }

    /// Change a user's language
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] for unknown users, or a database error
    pub fn set_language(&self, user_id: &str, language: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE users SET language = ?1, updated_at = ?2 WHERE user_id = ?3",
                [language, &now, user_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Delete a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, user_id: &str) -> Result<()> {
        let conn = connection(&self.pool)?;

        conn.execute("DELETE FROM users WHERE user_id = ?1", [user_id])
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}

impl SettingsStore for UserRepo {
    fn get(&self, user_id: &str) -> Result<UserSettings> {
        let user = self
            .find(user_id)?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        Ok(UserSettings {
            language: user.language,
            personality_text: user.personality_prompt.filter(|p| !p.trim().is_empty()),
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        language: row.get(1)?,
        personality_prompt: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> UserRepo {
        let pool = init_memory().unwrap();
        UserRepo::new(pool)
    }

    #[test]
    fn test_upsert_user() {
        let repo = setup();

        let user = repo.upsert("42", "en", None).unwrap();
        assert_eq!(user.user_id, "42");
        assert_eq!(user.language, "en");
        assert!(user.personality_prompt.is_none());

        let user = repo.upsert("42", "de", Some("Be brief")).unwrap();
        assert_eq!(user.language, "de");
        assert_eq!(user.personality_prompt.as_deref(), Some("Be brief"));
        assert_eq!(repo.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_uses_a_single_connection() {
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .connection_timeout(std::time::Duration::from_millis(250))
            .build(r2d2_sqlite::SqliteConnectionManager::memory())
            .unwrap();
        crate::db::schema::init(&pool.get().unwrap()).unwrap();
        let repo = UserRepo::new(pool.clone());

        let user = repo.upsert("42", "uk", Some("Be brief")).unwrap();
        assert_eq!(user.personality_prompt.as_deref(), Some("Be brief"));
        assert_eq!(pool.state().idle_connections, 1);
    }

    #[test]
    fn test_settings_lookup() {
        let repo = setup();
        repo.upsert("7", "uk", Some("  ")).unwrap();

        let settings = repo.get("7").unwrap();
        assert_eq!(settings.language, "uk");
        assert!(settings.personality_text.is_none());

        assert!(matches!(repo.get("missing"), Err(Error::UserNotFound(_))));
    }

    #[test]
    fn test_set_language() {
        let repo = setup();
        repo.upsert("7", "uk", None).unwrap();

        repo.set_language("7", "en").unwrap();
        assert_eq!(repo.find("7").unwrap().unwrap().language, "en");

        assert!(matches!(repo.set_language("8", "en"), Err(Error::UserNotFound(_))));
    }

    #[test]
    fn test_delete_user() {
        let repo = setup();
        repo.upsert("7", "uk", None).unwrap();
        repo.delete("7").unwrap();
        assert!(repo.find("7").unwrap().is_none());
    }
}
