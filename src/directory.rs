//! User directory cache (SQLite).
//!
//! Maps chat user ids to contact addresses. A mapping is written once, on the
//! first successful roster lookup, and never refreshed afterwards.

use crate::error::{DirectoryError, Result};
use crate::messaging::TransportDyn;

use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Persistent user id to contact address cache.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    pool: SqlitePool,
}

impl UserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and initialize the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open user directory at {}", path.display()))?;

        let directory = Self::new(pool);
        directory.initialize().await?;
        Ok(directory)
    }

    /// Create the cache table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS slack_users (
                slack_user_id TEXT PRIMARY KEY,
                email_address TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create slack_users table")?;

        Ok(())
    }

    /// Cached address for a user, without consulting the roster.
    pub async fn cached(&self, user_id: &str) -> std::result::Result<Option<String>, DirectoryError> {
        let address: Option<String> = sqlx::query_scalar(
            "SELECT email_address FROM slack_users WHERE slack_user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    /// Look the user up, falling back to a full roster fetch on a miss.
    pub async fn try_resolve(
        &self,
        user_id: &str,
        lookup: &dyn TransportDyn,
    ) -> std::result::Result<String, DirectoryError> {
        if let Some(address) = self.cached(user_id).await? {
            return Ok(address);
        }

        let roster = lookup
            .list_directory()
            .await
            .map_err(|error| DirectoryError::Lookup(error.to_string()))?;

        let member = roster
            .into_iter()
            .find(|member| member.id == user_id)
            .ok_or_else(|| DirectoryError::NotFound {
                user_id: user_id.into(),
            })?;

        let address = member
            .email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| DirectoryError::MissingAddress {
                user_id: user_id.into(),
            })?;

        // Two tasks may resolve the same user at once; the first insert wins.
        sqlx::query("INSERT OR IGNORE INTO slack_users (slack_user_id, email_address) VALUES (?, ?)")
            .bind(user_id)
            .bind(&address)
            .execute(&self.pool)
            .await?;

        tracing::debug!(user_id, "cached contact address");
        Ok(address)
    }

    /// Resolve a contact address. Failures are logged and yield `None`.
    pub async fn resolve(&self, user_id: &str, lookup: &dyn TransportDyn) -> Option<String> {
        match self.try_resolve(user_id, lookup).await {
            Ok(address) => Some(address),
            Err(error) => {
                tracing::warn!(user_id, %error, "could not resolve contact address");
                None
            }
        }
    }
}
