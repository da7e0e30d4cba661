//! # Task Queue Coordinator
//!
//! Façade over the task store and the message queue. Producers register
//! entities and create tasks here; the worker leans on it for queue traffic;
//! maintenance (daily scheduling, stuck-task recovery, DLQ requeue) lives
//! here because each of those spans both the store and the queue.
//!
//! Invariant worth keeping in mind: the task row always exists before its
//! pointer message is enqueued, otherwise a worker could lease a dangling
//! pointer.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::constants::TASK_QUEUE_NAME;
use crate::error::Result;
use crate::messaging::{MessageQueue, QueueMetrics, TaskMessage, TaskMessageData};
use crate::models::{DlqEntry, Entity, EntityStatus, SchedulingStrategy, StuckTask, Task};

pub struct Coordinator {
    pool: PgPool,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
    queue_name: String,
}

impl Coordinator {
    pub fn new(pool: PgPool, queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            pool,
            queue,
            clock: Arc::new(SystemClock),
            queue_name: TASK_QUEUE_NAME.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Point this coordinator at a non-default queue (test isolation,
    /// side-by-side deployments). The queue-name grammar still applies.
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Idempotently create the task queue.
    pub async fn ensure_queue(&self) -> Result<()> {
        self.queue.create_queue(&self.queue_name).await?;
        Ok(())
    }

    pub async fn register_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
        status: EntityStatus,
        scheduling_strategy: SchedulingStrategy,
        metadata: serde_json::Value,
    ) -> Result<Entity> {
        Entity::upsert(
            &self.pool,
            entity_id,
            entity_type,
            status,
            scheduling_strategy,
            metadata,
        )
        .await
    }

    /// Bulk-register entities of one type; returns how many were new.
    pub async fn register_entities(
        &self,
        entity_ids: &[String],
        entity_type: &str,
        scheduling_strategy: SchedulingStrategy,
    ) -> Result<u64> {
        let inserted =
            Entity::bulk_register(&self.pool, entity_ids, entity_type, scheduling_strategy)
                .await?;
        debug!(
            entity_type,
            total = entity_ids.len(),
            inserted,
            "entities registered"
        );
        Ok(inserted)
    }

    /// Create a task row. Does not enqueue: producers pair this with
    /// [`Coordinator::enqueue_task`] once the row exists.
    pub async fn create_task_with_priority(
        &self,
        entity_id: &str,
        task_type: &str,
        priority: i32,
        max_attempts: i32,
        scheduled_for: DateTime<Utc>,
        run_on: Option<chrono::NaiveDate>,
    ) -> Result<Task> {
        Task::create_with_priority(
            &self.pool,
            entity_id,
            task_type,
            priority,
            max_attempts,
            scheduled_for,
            run_on,
        )
        .await
    }

    /// Serialize the pointer payload and enqueue it, delayed until
    /// `scheduled_for`. A `scheduled_for` in the past is delivered
    /// immediately.
    pub async fn enqueue_task(
        &self,
        task_id: i64,
        entity_id: &str,
        attempt: i32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<i64> {
        let payload = serde_json::to_value(TaskMessageData {
            task_id,
            entity_id: entity_id.to_string(),
            attempt,
        })?;
        let delay_secs = (scheduled_for - self.clock.now()).num_seconds();
        let msg_id = self
            .queue
            .send_with_delay(&self.queue_name, &payload, delay_secs)
            .await?;
        Ok(msg_id)
    }

    pub async fn enqueue_task_immediate(
        &self,
        task_id: i64,
        entity_id: &str,
        attempt: i32,
    ) -> Result<i64> {
        self.enqueue_task(task_id, entity_id, attempt, self.clock.now())
            .await
    }

    /// Lease the next task message, if any.
    pub async fn read_task(&self, visibility_timeout: Duration) -> Result<Option<TaskMessage>> {
        let message = self
            .queue
            .read(&self.queue_name, visibility_timeout.as_secs() as i32)
            .await?;
        match message {
            Some(message) => Ok(Some(TaskMessage::from_message(message)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_message(&self, msg_id: i64) -> Result<bool> {
        Ok(self.queue.delete(&self.queue_name, msg_id).await?)
    }

    pub async fn archive_message(&self, msg_id: i64) -> Result<bool> {
        Ok(self.queue.archive(&self.queue_name, msg_id).await?)
    }

    /// Create today's sync task for every active daily entity lacking one,
    /// then enqueue the batch for immediate delivery. Returns the number of
    /// tasks created.
    pub async fn schedule_daily_syncs(&self, task_type: &str) -> Result<u64> {
        let created = Task::schedule_daily_syncs(&self.pool, task_type).await?;
        if created.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<serde_json::Value> = created
            .iter()
            .map(|(task_id, entity_id)| {
                serde_json::to_value(TaskMessageData {
                    task_id: *task_id,
                    entity_id: entity_id.clone(),
                    attempt: 0,
                })
            })
            .collect::<std::result::Result<_, _>>()?;

        let msg_ids = self.queue.send_batch(&self.queue_name, &payloads, 0).await?;
        for ((task_id, _), msg_id) in created.iter().zip(&msg_ids) {
            Task::update_queue_message_id(&self.pool, *task_id, *msg_id).await?;
        }

        info!(task_type, count = created.len(), "daily syncs scheduled");
        Ok(created.len() as u64)
    }

    /// Recover tasks stuck in `processing` past `lease`: flip them back to
    /// `pending` (counting the lost attempt) and replace their stale queue
    /// message with a fresh immediate one.
    pub async fn requeue_stuck_tasks(&self, lease: Duration) -> Result<u64> {
        let stuck = Task::requeue_stuck(&self.pool, &self.queue_name, lease).await?;
        for task in &stuck {
            self.replace_queue_message(task).await?;
        }
        if !stuck.is_empty() {
            warn!(count = stuck.len(), "stuck tasks requeued");
        }
        Ok(stuck.len() as u64)
    }

    async fn replace_queue_message(&self, task: &StuckTask) -> Result<()> {
        if let Some(old_msg_id) = task.queue_message_id {
            // Best effort: the message may be long gone.
            let _ = self.queue.delete(&self.queue_name, old_msg_id).await;
        }
        let msg_id = self
            .enqueue_task_immediate(task.task_id, &task.entity_id, task.attempt)
            .await?;
        Task::update_queue_message_id(&self.pool, task.task_id, msg_id).await?;
        Ok(())
    }

    /// Give a dead-lettered task a fresh run: new task row (clean history),
    /// immediate queue message, requeue stamp on the DLQ entry. Returns the
    /// new task id.
    pub async fn requeue_from_dlq(
        &self,
        dlq_id: i64,
        priority: Option<i32>,
        max_attempts: i32,
    ) -> Result<i64> {
        let task = DlqEntry::requeue(&self.pool, dlq_id, priority, max_attempts).await?;
        let msg_id = self
            .enqueue_task_immediate(task.task_id, &task.entity_id, 0)
            .await?;
        Task::update_queue_message_id(&self.pool, task.task_id, msg_id).await?;
        info!(dlq_id, task_id = task.task_id, "dead-lettered task requeued");
        Ok(task.task_id)
    }

    /// Re-prioritize a task after creation; the pointer message already in
    /// the queue is untouched.
    pub async fn update_task_priority(&self, task_id: i64, priority: i32) -> Result<()> {
        Task::update_priority(&self.pool, task_id, priority).await
    }

    pub async fn queue_metrics(&self) -> Result<QueueMetrics> {
        Ok(self.queue.metrics(&self.queue_name).await?)
    }
}
