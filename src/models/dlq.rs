//! # Dead-Letter Queue
//!
//! Snapshots of terminally failed tasks: the full ordered error history,
//! entity metadata for debugging, and requeue bookkeeping. Entries are
//! written once by the worker that exhausted the task and mutated only by
//! operator-driven requeue or retention cleanup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{KoditonError, Result};

use super::task::Task;

/// One failed attempt, as stored in `error_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub attempt: i32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: i64,
    pub worker_id: String,
    /// Present only when the attempt failed permanently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_reason: Option<String>,
}

impl ErrorHistoryEntry {
    /// Decode a history blob, dropping anything unreadable rather than
    /// failing a DLQ write over malformed old entries.
    pub fn parse_history(value: &serde_json::Value) -> Vec<ErrorHistoryEntry> {
        match value {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DlqEntry {
    pub dlq_id: i64,
    pub original_task_id: i64,
    pub entity_id: String,
    pub task_type: String,
    pub priority: i32,
    pub total_attempts: i32,
    pub first_error: Option<String>,
    pub last_error: String,
    pub error_history: serde_json::Value,
    /// Entity metadata snapshot at failure time.
    pub task_metadata: serde_json::Value,
    pub original_created_at: DateTime<Utc>,
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub last_attempted_at: DateTime<Utc>,
    pub moved_to_dlq_at: DateTime<Utc>,
    pub requeued_at: Option<DateTime<Utc>>,
    pub requeue_count: i32,
}

/// Insert parameters for a new DLQ entry.
#[derive(Debug, Clone)]
pub struct NewDlqEntry {
    pub original_task_id: i64,
    pub entity_id: String,
    pub task_type: String,
    pub priority: i32,
    pub total_attempts: i32,
    pub first_error: Option<String>,
    pub last_error: String,
    pub error_history: serde_json::Value,
    pub task_metadata: serde_json::Value,
    pub original_created_at: DateTime<Utc>,
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub last_attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DlqStats {
    pub total: i64,
    pub pending: i64,
    pub requeued: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DlqTaskTypeCount {
    pub task_type: String,
    pub count: i64,
}

const DLQ_COLUMNS: &str = "dlq_id, original_task_id, entity_id, task_type, priority, \
     total_attempts, first_error, last_error, error_history, task_metadata, \
     original_created_at, first_attempted_at, last_attempted_at, moved_to_dlq_at, \
     requeued_at, requeue_count";

impl DlqEntry {
    pub async fn insert(pool: &PgPool, new: NewDlqEntry) -> Result<DlqEntry> {
        let entry = sqlx::query_as::<_, DlqEntry>(&format!(
            "INSERT INTO dead_letter_queue \
                 (original_task_id, entity_id, task_type, priority, total_attempts, \
                  first_error, last_error, error_history, task_metadata, \
                  original_created_at, first_attempted_at, last_attempted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {DLQ_COLUMNS}"
        ))
        .bind(new.original_task_id)
        .bind(&new.entity_id)
        .bind(&new.task_type)
        .bind(new.priority)
        .bind(new.total_attempts)
        .bind(&new.first_error)
        .bind(&new.last_error)
        .bind(&new.error_history)
        .bind(&new.task_metadata)
        .bind(new.original_created_at)
        .bind(new.first_attempted_at)
        .bind(new.last_attempted_at)
        .fetch_one(pool)
        .await?;

        Ok(entry)
    }

    pub async fn find(pool: &PgPool, dlq_id: i64) -> Result<Option<DlqEntry>> {
        let entry = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue WHERE dlq_id = $1"
        ))
        .bind(dlq_id)
        .fetch_optional(pool)
        .await?;

        Ok(entry)
    }

    pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<DlqEntry>> {
        let entries = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue \
             ORDER BY moved_to_dlq_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    pub async fn list_not_requeued(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<DlqEntry>> {
        let entries = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue WHERE requeued_at IS NULL \
             ORDER BY moved_to_dlq_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    pub async fn list_by_task_type(
        pool: &PgPool,
        task_type: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DlqEntry>> {
        let entries = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue WHERE task_type = $1 \
             ORDER BY moved_to_dlq_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(task_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    pub async fn list_by_entity(
        pool: &PgPool,
        entity_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DlqEntry>> {
        let entries = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue WHERE entity_id = $1 \
             ORDER BY moved_to_dlq_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(entity_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    pub async fn stats(pool: &PgPool) -> Result<DlqStats> {
        let stats = sqlx::query_as::<_, DlqStats>(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE requeued_at IS NULL) AS pending, \
                    COUNT(*) FILTER (WHERE requeued_at IS NOT NULL) AS requeued \
             FROM dead_letter_queue",
        )
        .fetch_one(pool)
        .await?;

        Ok(stats)
    }

    pub async fn stats_by_task_type(pool: &PgPool) -> Result<Vec<DlqTaskTypeCount>> {
        let counts = sqlx::query_as::<_, DlqTaskTypeCount>(
            "SELECT task_type, COUNT(*) AS count FROM dead_letter_queue \
             GROUP BY task_type ORDER BY count DESC, task_type",
        )
        .fetch_all(pool)
        .await?;

        Ok(counts)
    }

    /// Give a dead-lettered task another life: create a fresh task (attempt
    /// 0, clean history) and stamp the DLQ row. One transaction, so
    /// concurrent requeues of the same entry cannot double-create.
    pub async fn requeue(
        pool: &PgPool,
        dlq_id: i64,
        priority: Option<i32>,
        max_attempts: i32,
    ) -> Result<Task> {
        let mut tx = pool.begin().await?;

        let entry = sqlx::query_as::<_, DlqEntry>(&format!(
            "SELECT {DLQ_COLUMNS} FROM dead_letter_queue WHERE dlq_id = $1 FOR UPDATE"
        ))
        .bind(dlq_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(KoditonError::DlqEntryNotFound { dlq_id })?;

        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks (entity_id, task_type, priority, max_attempts, scheduled_for) \
             VALUES ($1, $2, $3, $4, now()) \
             RETURNING task_id, entity_id, task_type, priority, status, attempt, \
                 max_attempts, scheduled_for, run_on, queue_message_id, worker_id, \
                 last_error, error_history, created_at, started_at, finished_at",
        )
        .bind(&entry.entity_id)
        .bind(&entry.task_type)
        .bind(priority.unwrap_or(entry.priority))
        .bind(max_attempts)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE dead_letter_queue \
             SET requeued_at = now(), requeue_count = requeue_count + 1 \
             WHERE dlq_id = $1",
        )
        .bind(dlq_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    pub async fn delete(pool: &PgPool, dlq_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dead_letter_queue WHERE dlq_id = $1")
            .bind(dlq_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Retention cleanup; returns how many entries were removed.
    pub async fn delete_older_than(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letter_queue WHERE moved_to_dlq_at < $1")
            .bind(older_than)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
