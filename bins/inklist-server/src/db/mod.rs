//! Storage layer: the session registry and the admin tables.

pub mod admin;
pub mod models;
pub mod pool;
pub mod queries;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

pub use models::{HostBanRow, NewSession, QueryOptions, RefreshFields, SessionRow};

/// Handle to the directory database. Cheap to clone; all methods lease a
/// connection from the shared pool for their duration.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    timeout_minutes: u32,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date.
    pub async fn open(path: &str, timeout_minutes: u32) -> Result<Self, sqlx::Error> {
        let pool = pool::open(path).await?;
        Ok(Self::from_pool(pool, timeout_minutes))
    }

    /// Wrap an existing pool. The caller is responsible for migrations; used
    /// by tests where `sqlx::test` provides a migrated pool.
    pub fn from_pool(pool: SqlitePool, timeout_minutes: u32) -> Self {
        Self {
            pool,
            timeout_minutes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn timeout_minutes(&self) -> u32 {
        self.timeout_minutes
    }

    pub fn timeout_secs(&self) -> i64 {
        i64::from(self.timeout_minutes) * 60
    }

    /// Oldest `last_active` that still counts as active.
    pub(crate) fn active_cutoff(&self) -> i64 {
        unix_now() - self.timeout_secs()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
