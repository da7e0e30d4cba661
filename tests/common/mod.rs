//! Shared setup for the integration suites. Every test talks to the database
//! behind `DATABASE_URL` (with the pgmq extension available) and is skipped
//! when that variable is unset.

// Each suite uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use koditon_core::database::{run_migrations, DatabaseConnection};
use koditon_core::messaging::{MessageQueue, PgmqClient};
use koditon_core::orchestration::Coordinator;

pub struct TestContext {
    pub pool: PgPool,
    pub queue: Arc<PgmqClient>,
    pub coordinator: Arc<Coordinator>,
    pub queue_name: String,
}

impl TestContext {
    /// Best-effort teardown of the per-test queue.
    pub async fn drop_queue(&self) {
        let _ = self.queue.drop_queue(&self.queue_name).await;
    }
}

/// Connect, migrate and build a coordinator on a fresh per-test queue.
/// Returns `None` (test should skip) when `DATABASE_URL` is not set.
pub async fn setup() -> Option<TestContext> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping integration test: DATABASE_URL not set");
            return None;
        }
    };

    let connection = DatabaseConnection::connect_with(&database_url, 5)
        .await
        .expect("failed to connect to test database");
    assert!(
        connection.health_check().await.expect("health check failed"),
        "test database is not healthy"
    );
    let pool = connection.pool().clone();
    run_migrations(&pool).await.expect("failed to run migrations");

    let queue = Arc::new(PgmqClient::new(pool.clone()));
    let queue_name = unique_queue_name();
    let coordinator = Arc::new(
        Coordinator::new(pool.clone(), queue.clone()).with_queue_name(queue_name.clone()),
    );
    coordinator
        .ensure_queue()
        .await
        .expect("failed to create test queue");

    Some(TestContext {
        pool,
        queue,
        coordinator,
        queue_name,
    })
}

pub fn unique_queue_name() -> String {
    format!("t{}", Uuid::new_v4().simple())
}

pub fn unique_entity_id(entity_type: &str) -> String {
    format!("{entity_type}:{}", Uuid::new_v4().simple())
}
