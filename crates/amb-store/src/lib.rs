//! SQLite persistence for the matchmaking bot.
//!
//! [`SqliteStore`] implements every directory port from `amb-core` over one
//! `sqlx` pool. The schema lives in `migrations/` and is applied on open.

use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use amb_core::{Error, Result};

mod admins;
mod reports;
mod requests;
mod users;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self::migrated(pool).await?;
        tracing::info!(path = %path.display(), "database opened and migrated");
        Ok(store)
    }

    /// Private in-memory database. A single connection keeps it alive.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "migration failed");
                Error::Persistence(format!("migration failed: {e}"))
            })?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a driver error into the core taxonomy. Unique violations become
/// `Conflict`; callers that know better (pending pairs) refine it.
pub(crate) fn db_err(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return Error::Conflict(db.message().to_string());
        }
    }
    tracing::warn!(error = %e, "database error");
    Error::Persistence(e.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use amb_core::{
        directory::UserDirectory,
        domain::{AccountId, Handle},
    };

    use super::SqliteStore;

    pub fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    pub async fn store_with(users: &[(&str, i64)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for (handle, id) in users {
            store.upsert(&h(handle), Some(AccountId(*id))).await.unwrap();
        }
        store
    }
}
