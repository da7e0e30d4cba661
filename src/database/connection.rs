//! # Database Connection
//!
//! Connection-pool construction and health checking for the shared
//! PostgreSQL instance. The pool is the only resource workers share; every
//! component borrows it from here.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::config::TaskQueueConfig;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Connect using the configured database URL.
    pub async fn new(config: &TaskQueueConfig) -> Result<Self, sqlx::Error> {
        Self::connect_with(&config.database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with an explicit pool size (integration harnesses keep this
    /// small to leave room for parallel suites).
    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query to prove the pool is usable.
    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
