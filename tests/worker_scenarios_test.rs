//! End-to-end worker scenarios against PostgreSQL + pgmq: happy path,
//! transient failure with backoff, rate-limit hints, permanent failures,
//! retry exhaustion, DLQ requeue and stuck-task recovery.
//!
//! These tests require `DATABASE_URL` (with the pgmq extension installed) and
//! skip silently otherwise.

mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use koditon_core::config::WorkerConfig;
use koditon_core::models::{
    DlqEntry, EntityStatus, ErrorHistoryEntry, SchedulingStrategy, Task, TaskStatus,
};
use koditon_core::orchestration::{HandlerError, TaskHandler, Worker};

use common::{setup, unique_entity_id, TestContext};

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        visibility_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(50),
        task_timeout: Duration::from_secs(5),
        base_retry_delay: Duration::from_secs(1),
        max_retry_delay: Duration::from_secs(10),
    }
}

/// Succeeds after failing a configured number of times.
struct FlakyHandler {
    failures_left: AtomicI32,
    error_status: u16,
    retry_after_secs: Option<u64>,
}

impl FlakyHandler {
    fn failing(times: i32, status: u16) -> Self {
        Self {
            failures_left: AtomicI32::new(times),
            error_status: status,
            retry_after_secs: None,
        }
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, _task: &Task) -> Result<(), HandlerError> {
        if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(HandlerError::HttpStatus {
                status: self.error_status,
                message: "portal error".to_string(),
                retry_after_secs: self.retry_after_secs,
            });
        }
        Ok(())
    }
}

struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        if task.task_type == "boom" {
            panic!("handler exploded");
        }
        Ok(())
    }
}

async fn register_entity(ctx: &TestContext, entity_id: &str) {
    ctx.coordinator
        .register_entity(
            entity_id,
            "test_entity",
            EntityStatus::Active,
            SchedulingStrategy::Manual,
            serde_json::json!({"source": "integration-test"}),
        )
        .await
        .expect("failed to register entity");
}

async fn create_and_enqueue(
    ctx: &TestContext,
    entity_id: &str,
    task_type: &str,
    max_attempts: i32,
) -> Task {
    register_entity(ctx, entity_id).await;
    let task = ctx
        .coordinator
        .create_task_with_priority(entity_id, task_type, 0, max_attempts, Utc::now(), None)
        .await
        .expect("failed to create task");
    let msg_id = ctx
        .coordinator
        .enqueue_task_immediate(task.task_id, entity_id, 0)
        .await
        .expect("failed to enqueue task");
    Task::update_queue_message_id(&ctx.pool, task.task_id, msg_id)
        .await
        .expect("failed to record message id");
    task
}

fn worker_with(ctx: &TestContext, handler: Arc<dyn TaskHandler>) -> Worker {
    Worker::new(ctx.coordinator.clone(), handler, fast_config())
}

async fn reload(ctx: &TestContext, task_id: i64) -> Task {
    Task::find(&ctx.pool, task_id)
        .await
        .expect("failed to load task")
        .expect("task row should exist")
}

async fn dlq_for_entity(ctx: &TestContext, entity_id: &str) -> Vec<DlqEntry> {
    DlqEntry::list_by_entity(&ctx.pool, entity_id, 10, 0)
        .await
        .expect("failed to list DLQ entries")
}

#[tokio::test]
async fn happy_path_completes_and_drains_the_queue() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("building");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_ok", 3).await;

    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(0, 500)));
    worker.process_next_task().await.expect("iteration failed");

    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt, 1);
    assert!(task.finished_at.is_some());
    assert!(dlq_for_entity(&ctx, &entity_id).await.is_empty());

    let metrics = ctx.coordinator.queue_metrics().await.unwrap();
    assert_eq!(metrics.queue_length, 0);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("building");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_flaky", 3).await;

    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(1, 503)));

    worker.process_next_task().await.expect("iteration failed");
    let after_failure = reload(&ctx, task.task_id).await;
    assert_eq!(after_failure.status, TaskStatus::Pending);
    assert_eq!(after_failure.attempt, 1);
    assert!(after_failure.last_error.as_deref().unwrap().contains("503"));

    // The retry message is delayed by base_retry_delay (1s).
    tokio::time::sleep(Duration::from_millis(1600)).await;
    worker.process_next_task().await.expect("iteration failed");

    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt, 2);
    assert!(dlq_for_entity(&ctx, &entity_id).await.is_empty());

    ctx.drop_queue().await;
}

#[tokio::test]
async fn rate_limit_retry_after_beats_backoff() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("ad");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_limited", 3).await;

    let handler = FlakyHandler {
        failures_left: AtomicI32::new(1),
        error_status: 429,
        retry_after_secs: Some(7),
    };
    let worker = worker_with(&ctx, Arc::new(handler));

    let before = Utc::now();
    worker.process_next_task().await.expect("iteration failed");

    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Pending);
    // Next execution honors the server hint, not the 1s backoff.
    assert!(task.scheduled_for >= before + chrono::Duration::seconds(6));

    ctx.drop_queue().await;
}

#[tokio::test]
async fn permanent_failure_dead_letters_on_first_attempt() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("ad");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_gone", 3).await;

    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(10, 404)));
    worker.process_next_task().await.expect("iteration failed");

    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);

    let entries = dlq_for_entity(&ctx, &entity_id).await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.total_attempts, 1);
    assert_eq!(entry.task_metadata["source"], "integration-test");

    let history = ErrorHistoryEntry::parse_history(&entry.error_history);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].permanent_reason.as_deref(), Some("resource not found"));

    let metrics = ctx.coordinator.queue_metrics().await.unwrap();
    assert_eq!(metrics.queue_length, 0);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn exhausted_retries_dead_letter_with_full_history() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("building");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_down", 2).await;

    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(10, 500)));

    worker.process_next_task().await.expect("iteration failed");
    tokio::time::sleep(Duration::from_millis(1600)).await;
    worker.process_next_task().await.expect("iteration failed");

    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt, 2);

    let entries = dlq_for_entity(&ctx, &entity_id).await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.total_attempts, 2);

    let history = ErrorHistoryEntry::parse_history(&entry.error_history);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].attempt, 1);
    assert_eq!(history[1].attempt, 2);
    assert!(entry.first_error.as_deref().unwrap().contains("500"));

    ctx.drop_queue().await;
}

#[tokio::test]
async fn requeue_from_dlq_creates_a_fresh_claimable_task() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("building");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_revived", 1).await;

    // Dead-letter it.
    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(10, 500)));
    worker.process_next_task().await.expect("iteration failed");
    assert_eq!(reload(&ctx, task.task_id).await.status, TaskStatus::Failed);

    let entry = dlq_for_entity(&ctx, &entity_id).await.remove(0);
    let new_task_id = ctx
        .coordinator
        .requeue_from_dlq(entry.dlq_id, Some(10), 3)
        .await
        .expect("requeue failed");
    assert_ne!(new_task_id, task.task_id);

    let new_task = reload(&ctx, new_task_id).await;
    assert_eq!(new_task.status, TaskStatus::Pending);
    assert_eq!(new_task.attempt, 0);
    assert_eq!(new_task.priority, 10);
    assert_eq!(new_task.max_attempts, 3);
    assert!(new_task.queue_message_id.is_some());

    let entry = DlqEntry::find(&ctx.pool, entry.dlq_id)
        .await
        .unwrap()
        .unwrap();
    assert!(entry.requeued_at.is_some());
    assert_eq!(entry.requeue_count, 1);

    // The fresh message is claimable immediately.
    let leased = ctx
        .coordinator
        .read_task(Duration::from_secs(30))
        .await
        .unwrap()
        .expect("requeued task should be claimable");
    assert_eq!(leased.data.task_id, new_task_id);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn stuck_task_is_recovered_and_reclaimed() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("building");
    let task = create_and_enqueue(&ctx, &entity_id, "sync_stuck", 3).await;

    // Simulate a worker that leased the message briefly and died mid-task.
    let leased = ctx
        .coordinator
        .read_task(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("message should be claimable");
    Task::update_to_processing(&ctx.pool, task.task_id, "worker-dead0001")
        .await
        .expect("transition failed");
    sqlx::query("UPDATE tasks SET started_at = now() - interval '20 minutes' WHERE task_id = $1")
        .bind(task.task_id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    // Let the short lease lapse, then run maintenance.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let recovered = ctx
        .coordinator
        .requeue_stuck_tasks(Duration::from_secs(600))
        .await
        .expect("stuck-task recovery failed");
    assert_eq!(recovered, 1);

    let after_recovery = reload(&ctx, task.task_id).await;
    assert_eq!(after_recovery.status, TaskStatus::Pending);
    assert_eq!(after_recovery.attempt, task.attempt + 1);
    assert!(after_recovery.worker_id.is_none());
    assert_ne!(after_recovery.queue_message_id, Some(leased.message_id));

    // A subsequent poll claims and finishes it.
    let worker = worker_with(&ctx, Arc::new(FlakyHandler::failing(0, 500)));
    worker.process_next_task().await.expect("iteration failed");
    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempt, 2);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn panic_is_contained_and_dead_lettered() {
    let Some(ctx) = setup().await else { return };
    let panicking_entity = unique_entity_id("ad");
    let healthy_entity = unique_entity_id("ad");
    let panicking = create_and_enqueue(&ctx, &panicking_entity, "boom", 3).await;
    let healthy = create_and_enqueue(&ctx, &healthy_entity, "sync_ok", 3).await;

    let worker = worker_with(&ctx, Arc::new(PanickingHandler));
    // Two iterations: one per queued task, in enqueue order.
    worker.process_next_task().await.expect("iteration failed");
    worker.process_next_task().await.expect("iteration failed");

    let panicked = reload(&ctx, panicking.task_id).await;
    assert_eq!(panicked.status, TaskStatus::Failed);
    let entries = dlq_for_entity(&ctx, &panicking_entity).await;
    assert_eq!(entries.len(), 1);
    let history = ErrorHistoryEntry::parse_history(&entries[0].error_history);
    assert_eq!(
        history[0].permanent_reason.as_deref(),
        Some("task handler panicked")
    );
    assert!(history[0].error.contains("handler exploded"));

    // The panic did not poison the worker: the healthy task completed.
    let healthy = reload(&ctx, healthy.task_id).await;
    assert_eq!(healthy.status, TaskStatus::Completed);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn retry_past_the_attempt_cap_is_refused() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("ad");
    register_entity(&ctx, &entity_id).await;

    // max_attempts = 1: the one allowed execution is already in flight.
    let task = ctx
        .coordinator
        .create_task_with_priority(&entity_id, "sync_capped", 0, 1, Utc::now(), None)
        .await
        .expect("failed to create task");
    let task = Task::update_to_processing(&ctx.pool, task.task_id, "worker-test0001")
        .await
        .expect("transition failed");

    let entry = ErrorHistoryEntry {
        attempt: 1,
        error: "HTTP 500: portal error".to_string(),
        timestamp: Utc::now(),
        duration_ms: 5,
        worker_id: "worker-test0001".to_string(),
        permanent_reason: None,
    };
    let err = Task::update_to_pending_for_retry(&ctx.pool, task.task_id, Utc::now(), &entry)
        .await
        .unwrap_err();
    assert!(err.is_max_retries_reached());

    // The task was left untouched for the dead-letter path.
    let task = reload(&ctx, task.task_id).await;
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.attempt, 0);

    ctx.drop_queue().await;
}

#[tokio::test]
async fn daily_scheduling_is_idempotent_per_day() {
    let Some(ctx) = setup().await else { return };
    let entity_id = unique_entity_id("city");
    register_entity(&ctx, &entity_id).await;
    sqlx::query("UPDATE entities SET scheduling_strategy = 'daily' WHERE entity_id = $1")
        .bind(&entity_id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    // A task type unique to this test keeps parallel suites out of the way.
    let task_type = format!("daily_{}", &entity_id[5..13]);
    ctx.coordinator.schedule_daily_syncs(&task_type).await.unwrap();
    ctx.coordinator.schedule_daily_syncs(&task_type).await.unwrap();

    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE entity_id = $1 AND task_type = $2 AND run_on = CURRENT_DATE",
    )
    .bind(&entity_id)
    .bind(&task_type)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    // Stopped entities are never scheduled.
    sqlx::query("UPDATE entities SET status = 'stopped' WHERE entity_id = $1")
        .bind(&entity_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    sqlx::query("UPDATE tasks SET status = 'completed' WHERE entity_id = $1")
        .bind(&entity_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    ctx.coordinator.schedule_daily_syncs(&task_type).await.unwrap();
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks WHERE entity_id = $1 AND task_type = $2",
    )
    .bind(&entity_id)
    .bind(&task_type)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    ctx.drop_queue().await;
}
