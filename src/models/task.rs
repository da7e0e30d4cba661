//! # Task Model
//!
//! One row per unit of sync work. Producers create tasks through the
//! coordinator; workers own every transition after that. All transitions out
//! of `processing` are guarded single statements, so exactly one worker can
//! move a task at a time and `attempt` counts completed executions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::error::{KoditonError, Result};

use super::dlq::ErrorHistoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub task_id: i64,
    pub entity_id: String,
    pub task_type: String,
    pub priority: i32,
    pub status: TaskStatus,
    /// Completed executions so far.
    pub attempt: i32,
    pub max_attempts: i32,
    /// Earliest wall-clock time the task becomes claimable.
    pub scheduled_for: DateTime<Utc>,
    /// Calendar date for daily dedup; at most one live task per
    /// (entity, task_type, run_on).
    pub run_on: Option<NaiveDate>,
    /// Last queue message written for this task, for traceability.
    pub queue_message_id: Option<i64>,
    /// Current lessee while `processing`.
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    /// Ordered list of failed-attempt records, snapshotted into the DLQ.
    pub error_history: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

const TASK_COLUMNS: &str = "task_id, entity_id, task_type, priority, status, attempt, \
     max_attempts, scheduled_for, run_on, queue_message_id, worker_id, last_error, \
     error_history, created_at, started_at, finished_at";

/// Daily-dedup conflict target (matches the partial unique index).
const DAILY_DEDUP_CONFLICT: &str = "ON CONFLICT (entity_id, task_type, run_on) \
     WHERE run_on IS NOT NULL AND status IN ('pending', 'processing')";

/// A task flipped back to `pending` by stuck-task recovery.
#[derive(Debug, Clone, FromRow)]
pub struct StuckTask {
    pub task_id: i64,
    pub entity_id: String,
    pub attempt: i32,
    pub queue_message_id: Option<i64>,
}

impl Task {
    /// Create a task. When `run_on` is set and a live task already exists for
    /// the same (entity, task_type, day), the existing task is returned
    /// instead of a duplicate.
    pub async fn create_with_priority(
        pool: &PgPool,
        entity_id: &str,
        task_type: &str,
        priority: i32,
        max_attempts: i32,
        scheduled_for: DateTime<Utc>,
        run_on: Option<NaiveDate>,
    ) -> Result<Task> {
        // The no-op DO UPDATE makes the conflicting row come back through
        // RETURNING, coalescing concurrent daily scheduling.
        let task = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks \
                 (entity_id, task_type, priority, max_attempts, scheduled_for, run_on) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             {DAILY_DEDUP_CONFLICT} DO UPDATE SET priority = tasks.priority \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(entity_id)
        .bind(task_type)
        .bind(priority)
        .bind(max_attempts)
        .bind(scheduled_for)
        .bind(run_on)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    pub async fn find(pool: &PgPool, task_id: i64) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

        Ok(task)
    }

    /// Guarded `pending -> processing` transition. Fails when another worker
    /// got there first or the task is no longer pending.
    pub async fn update_to_processing(
        pool: &PgPool,
        task_id: i64,
        worker_id: &str,
    ) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET status = 'processing', worker_id = $2, started_at = now() \
             WHERE task_id = $1 AND status = 'pending' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(worker_id)
        .fetch_optional(pool)
        .await?;

        match task {
            Some(task) => Ok(task),
            None => Err(Self::state_error(pool, task_id, "pending").await),
        }
    }

    /// `processing -> completed`; counts the finished execution.
    pub async fn update_to_completed(pool: &PgPool, task_id: i64) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET status = 'completed', attempt = attempt + 1, \
                 finished_at = now(), worker_id = NULL \
             WHERE task_id = $1 AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

        match task {
            Some(task) => Ok(task),
            None => Err(Self::state_error(pool, task_id, "processing").await),
        }
    }

    /// `processing -> pending` for a retry: bumps `attempt`, re-points
    /// `scheduled_for`, records the failed attempt. Refuses to move a task
    /// past its attempt cap (`MaxRetriesReached`); such a task belongs in the
    /// dead-letter queue instead.
    pub async fn update_to_pending_for_retry(
        pool: &PgPool,
        task_id: i64,
        retry_at: DateTime<Utc>,
        entry: &ErrorHistoryEntry,
    ) -> Result<Task> {
        let entry_json = serde_json::to_value(entry)?;
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET status = 'pending', attempt = attempt + 1, \
                 scheduled_for = $2, worker_id = NULL, last_error = $3, \
                 error_history = error_history || jsonb_build_array($4::jsonb) \
             WHERE task_id = $1 AND status = 'processing' \
               AND attempt + 1 < max_attempts \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(retry_at)
        .bind(&entry.error)
        .bind(entry_json)
        .fetch_optional(pool)
        .await?;

        match task {
            Some(task) => Ok(task),
            None => Err(Self::retry_error(pool, task_id).await),
        }
    }

    /// Terminal `processing -> failed`.
    pub async fn update_to_failed(
        pool: &PgPool,
        task_id: i64,
        last_error: &str,
        entry: &ErrorHistoryEntry,
    ) -> Result<Task> {
        let entry_json = serde_json::to_value(entry)?;
        let task = sqlx::query_as::<_, Task>(&format!(
            "UPDATE tasks SET status = 'failed', attempt = attempt + 1, \
                 finished_at = now(), worker_id = NULL, last_error = $2, \
                 error_history = error_history || jsonb_build_array($3::jsonb) \
             WHERE task_id = $1 AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(last_error)
        .bind(entry_json)
        .fetch_optional(pool)
        .await?;

        match task {
            Some(task) => Ok(task),
            None => Err(Self::state_error(pool, task_id, "processing").await),
        }
    }

    pub async fn update_queue_message_id(
        pool: &PgPool,
        task_id: i64,
        queue_message_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET queue_message_id = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(queue_message_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_priority(pool: &PgPool, task_id: i64, priority: i32) -> Result<()> {
        sqlx::query("UPDATE tasks SET priority = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(priority)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Create today's task for every active daily entity that does not have
    /// one yet. Returns (task_id, entity_id) of the created tasks. Safe to
    /// call repeatedly and concurrently: the NOT EXISTS filter plus the
    /// partial unique index make the day idempotent.
    pub async fn schedule_daily_syncs(
        pool: &PgPool,
        task_type: &str,
    ) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query_as::<_, (i64, String)>(&format!(
            "INSERT INTO tasks \
                 (entity_id, task_type, priority, max_attempts, scheduled_for, run_on) \
             SELECT e.entity_id, $1, 0, $2, now(), CURRENT_DATE \
             FROM entities e \
             WHERE e.status = 'active' AND e.scheduling_strategy = 'daily' \
               AND NOT EXISTS ( \
                   SELECT 1 FROM tasks t \
                   WHERE t.entity_id = e.entity_id AND t.task_type = $1 \
                     AND t.run_on = CURRENT_DATE \
                     AND t.status IN ('pending', 'processing') \
               ) \
             {DAILY_DEDUP_CONFLICT} DO NOTHING \
             RETURNING task_id, entity_id"
        ))
        .bind(task_type)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Flip back to `pending` every task whose lease expired and whose queue
    /// message is no longer hidden. Increments `attempt` for the lost
    /// execution. The caller is responsible for giving each returned task a
    /// fresh queue message.
    pub async fn requeue_stuck(
        pool: &PgPool,
        queue_name: &str,
        lease: Duration,
    ) -> Result<Vec<StuckTask>> {
        // The grammar check makes the table-name splice safe.
        crate::messaging::validate_queue_name(queue_name)?;
        let stuck = sqlx::query_as::<_, StuckTask>(&format!(
            "UPDATE tasks t \
             SET status = 'pending', attempt = t.attempt + 1, worker_id = NULL, \
                 scheduled_for = now() \
             WHERE t.status = 'processing' \
               AND t.started_at < now() - make_interval(secs => $1) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM pgmq.q_{queue_name} q \
                   WHERE q.msg_id = t.queue_message_id AND q.vt > now() \
               ) \
             RETURNING t.task_id, t.entity_id, t.attempt, t.queue_message_id"
        ))
        .bind(lease.as_secs_f64())
        .fetch_all(pool)
        .await?;

        Ok(stuck)
    }

    /// Work out why a guarded retry transition matched no row.
    async fn retry_error(pool: &PgPool, task_id: i64) -> KoditonError {
        match sqlx::query_as::<_, (TaskStatus, i32, i32)>(
            "SELECT status, attempt, max_attempts FROM tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await
        {
            Ok(Some((TaskStatus::Processing, attempt, max_attempts)))
                if attempt + 1 >= max_attempts =>
            {
                KoditonError::MaxRetriesReached { task_id }
            }
            Ok(Some((actual, _, _))) => KoditonError::InvalidTaskState {
                task_id,
                actual: actual.as_str().to_string(),
                expected: "processing".to_string(),
            },
            Ok(None) => KoditonError::TaskNotFound { task_id },
            Err(e) => KoditonError::Database(e),
        }
    }

    async fn state_error(pool: &PgPool, task_id: i64, expected: &str) -> KoditonError {
        match sqlx::query_as::<_, (TaskStatus,)>("SELECT status FROM tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await
        {
            Ok(Some((actual,))) => KoditonError::InvalidTaskState {
                task_id,
                actual: actual.as_str().to_string(),
                expected: expected.to_string(),
            },
            Ok(None) => KoditonError::TaskNotFound { task_id },
            Err(e) => KoditonError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_strings() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::Processing.as_str(), "processing");
        assert_eq!(TaskStatus::Completed.as_str(), "completed");
        assert_eq!(TaskStatus::Failed.as_str(), "failed");
        assert_eq!(TaskStatus::Stopped.as_str(), "stopped");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
    }
}
