//! # Worker Pool
//!
//! A fixed-size set of workers sharing one coordinator and one handler.
//! There is no work stealing: fairness emerges from the queue's
//! concurrent-safe read.

use std::sync::Arc;
use tracing::info;

use crate::config::WorkerConfig;

use super::coordinator::Coordinator;
use super::handler::TaskHandler;
use super::worker::Worker;

pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        coordinator: Arc<Coordinator>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> Self {
        let workers = (0..worker_count)
            .map(|_| Worker::new(Arc::clone(&coordinator), Arc::clone(&handler), config.clone()))
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn start(&mut self) {
        info!(worker_count = self.workers.len(), "starting worker pool");
        for worker in &mut self.workers {
            worker.start();
        }
    }

    /// Broadcast stop to every worker. Idempotent.
    pub fn stop(&self) {
        info!("stopping worker pool");
        for worker in &self.workers {
            worker.stop();
        }
    }

    /// Join every worker's loop.
    pub async fn wait(&mut self) {
        for worker in &mut self.workers {
            worker.wait().await;
        }
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MemoryQueue;
    use crate::models::Task;
    use crate::orchestration::handler::HandlerError;
    use async_trait::async_trait;
    use sqlx::PgPool;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn pool_of(count: usize) -> WorkerPool {
        let pg = PgPool::connect_lazy("postgresql://localhost/koditon_unused").unwrap();
        let coordinator = Arc::new(Coordinator::new(pg, Arc::new(MemoryQueue::new())));
        WorkerPool::new(count, coordinator, Arc::new(NoopHandler), WorkerConfig::default())
    }

    #[tokio::test]
    async fn pool_size_matches_request() {
        let pool = pool_of(4);
        assert_eq!(pool.len(), 4);
        assert!(!pool.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent_and_joins() {
        let mut pool = pool_of(2);
        pool.start();
        pool.stop();
        pool.stop();
        pool.wait().await;
        // A second wait on already-joined workers is a no-op.
        pool.wait().await;
    }

    #[tokio::test]
    async fn workers_get_unique_ids() {
        let pg = PgPool::connect_lazy("postgresql://localhost/koditon_unused").unwrap();
        let coordinator = Arc::new(Coordinator::new(pg, Arc::new(MemoryQueue::new())));
        let a = Worker::new(
            Arc::clone(&coordinator),
            Arc::new(NoopHandler),
            WorkerConfig::default(),
        );
        let b = Worker::new(coordinator, Arc::new(NoopHandler), WorkerConfig::default());
        assert_ne!(a.worker_id(), b.worker_id());
        assert!(a.worker_id().starts_with("worker-"));
    }
}
