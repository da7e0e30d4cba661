//! # koditon-core
//!
//! Coordination core of the Koditon real-estate ingestion backend.
//!
//! The backend crawls three external portals (a listings portal, a
//! housing-company portal and a historical-transactions portal) and persists
//! what it finds into PostgreSQL. This crate is the part that keeps that work
//! honest: a durable task queue layered on pgmq, a task store with entity and
//! dead-letter bookkeeping, a coordinator that schedules daily syncs, and a
//! worker pool that leases tasks, dispatches them to typed handlers, retries
//! transient failures with backoff and spills exhausted or permanent failures
//! into the dead-letter queue with their full error history.
//!
//! Portal clients and field mappers live elsewhere; they plug in through the
//! [`orchestration::handler::TaskHandler`] trait and the service contracts in
//! [`consumers`].

pub mod clock;
pub mod config;
pub mod constants;
pub mod consumers;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;

pub use clock::{Clock, SystemClock};
pub use config::{TaskQueueConfig, WorkerConfig};
pub use error::{KoditonError, Result};
pub use messaging::{MemoryQueue, MessageQueue, PgmqClient};
pub use orchestration::{
    Coordinator, ErrorDisposition, HandlerError, TaskHandler, Worker, WorkerPool,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = TaskQueueConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.worker.poll_interval.as_secs(), 1);
        assert_eq!(config.worker.visibility_timeout.as_secs(), 300);
    }
}
