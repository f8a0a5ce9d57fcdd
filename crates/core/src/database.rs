//! Database pool management.
//!
//! A single PostgreSQL pool backs the authoritative store. The upstream
//! gateway resolves tenancy before requests reach this core, so no
//! per-tenant pool fabric is needed here; all entities live in one schema
//! with composite uniqueness constraints enforcing the model invariants.

use crate::{config::DatabaseConfig, error::Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::info;

/// Connection pool for the authoritative relational store.
///
/// Cloning is cheap; the underlying `PgPool` handles concurrent access
/// internally. Mutating operations should go through [`DatabasePool::begin`]
/// so that grant writes, change history and audit records commit together.
#[derive(Clone)]
pub struct DatabasePool {
    pub pool: PgPool,
}

impl DatabasePool {
    /// Creates the pool with the configured limits.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing database pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        info!("Database pool initialized successfully");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn get(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction for a multi-statement mutation.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
