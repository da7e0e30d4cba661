//! # Worker
//!
//! A single polling consumer. Each iteration leases at most one task message,
//! loads the authoritative task row, runs the handler under a deadline inside
//! the one rescue boundary, and settles the outcome: complete, retry with
//! backoff, or dead-letter. All cross-worker coordination happens through the
//! backing store; workers hold no shared in-process state.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::TaskError;
use crate::models::{DlqEntry, Entity, ErrorHistoryEntry, NewDlqEntry, Task};

use super::coordinator::Coordinator;
use super::error_classifier::{classify, ErrorDisposition};
use super::handler::{HandlerError, TaskHandler};

pub struct Worker {
    core: WorkerCore,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        coordinator: Arc<Coordinator>,
        handler: Arc<dyn TaskHandler>,
        config: WorkerConfig,
    ) -> Self {
        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            core: WorkerCore {
                coordinator,
                handler,
                config,
                worker_id,
            },
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            handle: None,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.core.worker_id
    }

    /// Spawn the polling loop. A second call on a running worker is a no-op;
    /// workers are not restartable.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let core = self.core.clone();
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        self.handle = Some(tokio::spawn(async move {
            core.run(running, shutdown).await;
        }));
    }

    /// Signal the loop to exit at the next poll boundary. Idempotent. A task
    /// in flight finishes (or times out) and writes its terminal state first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Block until the polling loop has exited.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Run a single lease-dispatch-settle iteration. This is what the loop
    /// calls on every tick; exposed for embedding in external schedulers and
    /// for deterministic tests.
    pub async fn process_next_task(&self) -> Result<(), TaskError> {
        self.core.process_next_task().await
    }
}

#[derive(Clone)]
struct WorkerCore {
    coordinator: Arc<Coordinator>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerConfig,
    worker_id: String,
}

impl WorkerCore {
    async fn run(&self, running: Arc<AtomicBool>, shutdown: Arc<Notify>) {
        info!(worker_id = %self.worker_id, "worker starting");

        if let Err(e) = self.coordinator.ensure_queue().await {
            error!(worker_id = %self.worker_id, error = %e, "failed to ensure task queue");
            return;
        }

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.process_next_task().await {
                        warn!(worker_id = %self.worker_id, error = %e, "error processing task");
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    async fn process_next_task(&self) -> Result<(), TaskError> {
        let message = self
            .coordinator
            .read_task(self.config.visibility_timeout)
            .await
            .map_err(|e| TaskError::new("Worker.read_task", e))?;
        let Some(message) = message else {
            return Ok(());
        };

        debug!(
            worker_id = %self.worker_id,
            task_id = message.data.task_id,
            entity_id = %message.data.entity_id,
            attempt = message.data.attempt,
            message_id = message.message_id,
            "received task"
        );

        let pool = self.coordinator.pool();
        let task = Task::find(pool, message.data.task_id).await.map_err(|e| {
            TaskError::new("Worker.load_task", e).with_task_id(message.data.task_id)
        })?;
        let Some(task) = task else {
            // Dangling pointer: the row is gone, so park the message in the
            // archive for audit instead of letting it bounce forever.
            warn!(
                worker_id = %self.worker_id,
                task_id = message.data.task_id,
                "task row missing, archiving message"
            );
            let _ = self.coordinator.archive_message(message.message_id).await;
            return Ok(());
        };

        // Guarded transition: losing the race here leaves the message leased,
        // and it resurfaces after the visibility timeout.
        let task = Task::update_to_processing(pool, task.task_id, &self.worker_id)
            .await
            .map_err(|e| {
                TaskError::new("Worker.update_to_processing", e)
                    .with_task_id(task.task_id)
                    .with_entity_id(task.entity_id.clone())
                    .with_task_type(task.task_type.clone())
            })?;

        let started = Instant::now();
        let outcome = self.execute_handler(&task).await;
        let duration = started.elapsed();

        match outcome {
            Ok(()) => {
                Task::update_to_completed(pool, task.task_id)
                    .await
                    .map_err(|e| {
                        TaskError::new("Worker.update_to_completed", e)
                            .with_task_id(task.task_id)
                            .with_task_type(task.task_type.clone())
                    })?;
                self.coordinator
                    .delete_message(message.message_id)
                    .await
                    .map_err(|e| {
                        TaskError::new("Worker.delete_message", e).with_task_id(task.task_id)
                    })?;
                info!(
                    worker_id = %self.worker_id,
                    task_id = task.task_id,
                    task_type = %task.task_type,
                    duration_ms = duration.as_millis() as i64,
                    "task completed"
                );
                Ok(())
            }
            Err(handler_error) => {
                self.handle_task_failure(&task, message.message_id, handler_error, duration)
                    .await;
                Ok(())
            }
        }
    }

    /// The one rescue boundary around handler code: applies the per-task
    /// deadline and converts panics into classified errors.
    async fn execute_handler(&self, task: &Task) -> Result<(), HandlerError> {
        let invocation = AssertUnwindSafe(self.handler.handle(task)).catch_unwind();
        match tokio::time::timeout(self.config.task_timeout, invocation).await {
            Err(_) => {
                warn!(
                    worker_id = %self.worker_id,
                    task_id = task.task_id,
                    timeout_secs = self.config.task_timeout.as_secs(),
                    "task timed out"
                );
                Err(HandlerError::Timeout(self.config.task_timeout))
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(
                    worker_id = %self.worker_id,
                    task_id = task.task_id,
                    entity_id = %task.entity_id,
                    task_type = %task.task_type,
                    panic = %message,
                    "task handler panicked"
                );
                Err(HandlerError::Panicked(message))
            }
            Ok(Ok(result)) => result,
        }
    }

    async fn handle_task_failure(
        &self,
        task: &Task,
        message_id: i64,
        error: HandlerError,
        duration: Duration,
    ) {
        let disposition = classify(&error);
        let current_attempt = task.attempt + 1;
        let should_retry = disposition.is_retryable() && current_attempt < task.max_attempts;

        warn!(
            worker_id = %self.worker_id,
            task_id = task.task_id,
            entity_id = %task.entity_id,
            task_type = %task.task_type,
            error = %error,
            current_attempt,
            is_permanent = disposition.is_permanent(),
            will_retry = should_retry,
            "task failed"
        );

        if should_retry {
            self.schedule_retry(task, current_attempt, &error, &disposition, duration)
                .await;
        } else {
            self.move_to_dlq(task, current_attempt, &error, &disposition, duration)
                .await;
        }

        if let Err(e) = self.coordinator.delete_message(message_id).await {
            warn!(worker_id = %self.worker_id, message_id, error = %e, "failed to delete message");
        }
    }

    async fn schedule_retry(
        &self,
        task: &Task,
        current_attempt: i32,
        error: &HandlerError,
        disposition: &ErrorDisposition,
        duration: Duration,
    ) {
        let delay = retry_delay(&self.config, current_attempt, disposition);
        let now = self.coordinator.clock().now();
        let retry_at = now + chrono::Duration::seconds(delay.as_secs() as i64);
        let entry = ErrorHistoryEntry {
            attempt: current_attempt,
            error: error.to_string(),
            timestamp: now,
            duration_ms: duration.as_millis() as i64,
            worker_id: self.worker_id.clone(),
            permanent_reason: None,
        };

        info!(
            worker_id = %self.worker_id,
            task_id = task.task_id,
            current_attempt,
            retry_delay_secs = delay.as_secs(),
            retry_at = %retry_at,
            "scheduling task for retry"
        );

        let pool = self.coordinator.pool();
        if let Err(e) =
            Task::update_to_pending_for_retry(pool, task.task_id, retry_at, &entry).await
        {
            error!(worker_id = %self.worker_id, task_id = task.task_id, error = %e,
                "failed to update task for retry");
            return;
        }
        match self
            .coordinator
            .enqueue_task(task.task_id, &task.entity_id, current_attempt, retry_at)
            .await
        {
            Ok(msg_id) => {
                let _ = Task::update_queue_message_id(pool, task.task_id, msg_id).await;
            }
            Err(e) => {
                // The task row is pending; stuck-task recovery will give it a
                // message if we cannot.
                error!(worker_id = %self.worker_id, task_id = task.task_id, error = %e,
                    "failed to enqueue retry");
            }
        }
    }

    async fn move_to_dlq(
        &self,
        task: &Task,
        total_attempts: i32,
        error: &HandlerError,
        disposition: &ErrorDisposition,
        duration: Duration,
    ) {
        let now = self.coordinator.clock().now();
        let final_entry = ErrorHistoryEntry {
            attempt: total_attempts,
            error: error.to_string(),
            timestamp: now,
            duration_ms: duration.as_millis() as i64,
            worker_id: self.worker_id.clone(),
            permanent_reason: disposition.permanent_reason().map(str::to_string),
        };

        let mut history = ErrorHistoryEntry::parse_history(&task.error_history);
        history.push(final_entry.clone());
        let first_error = history.first().map(|entry| entry.error.clone());
        let error_history =
            serde_json::to_value(&history).unwrap_or_else(|_| serde_json::json!([]));

        let pool = self.coordinator.pool();
        let task_metadata = match Entity::find(pool, &task.entity_id).await {
            Ok(Some(entity)) => entity.metadata,
            _ => serde_json::json!({}),
        };

        warn!(
            worker_id = %self.worker_id,
            task_id = task.task_id,
            total_attempts,
            reason = %dlq_reason(disposition, total_attempts, task.max_attempts),
            "moving task to dead letter queue"
        );

        if let Err(e) = DlqEntry::insert(
            pool,
            NewDlqEntry {
                original_task_id: task.task_id,
                entity_id: task.entity_id.clone(),
                task_type: task.task_type.clone(),
                priority: task.priority,
                total_attempts,
                first_error,
                last_error: error.to_string(),
                error_history,
                task_metadata,
                original_created_at: task.created_at,
                first_attempted_at: task.started_at,
                last_attempted_at: now,
            },
        )
        .await
        {
            error!(worker_id = %self.worker_id, task_id = task.task_id, error = %e,
                "failed to insert task into DLQ");
        }

        if let Err(e) =
            Task::update_to_failed(pool, task.task_id, &error.to_string(), &final_entry).await
        {
            error!(worker_id = %self.worker_id, task_id = task.task_id, error = %e,
                "failed to mark task as failed");
        }
    }
}

/// Delay before attempt `current_attempt + 1`. A positive suggested delay
/// wins; otherwise exponential backoff from `base_retry_delay`. Both paths
/// are capped at `max_retry_delay`.
fn retry_delay(
    config: &WorkerConfig,
    current_attempt: i32,
    disposition: &ErrorDisposition,
) -> Duration {
    if let Some(suggested) = disposition.suggested_delay() {
        return suggested.min(config.max_retry_delay);
    }
    let exponent = current_attempt.saturating_sub(1).clamp(0, 20) as u32;
    config
        .base_retry_delay
        .saturating_mul(1u32 << exponent)
        .min(config.max_retry_delay)
}

fn dlq_reason(disposition: &ErrorDisposition, total_attempts: i32, max_attempts: i32) -> String {
    if let Some(reason) = disposition.permanent_reason() {
        format!("permanent error: {reason}")
    } else if total_attempts >= max_attempts {
        format!("exhausted all {max_attempts} retry attempts")
    } else {
        "unknown".to_string()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
