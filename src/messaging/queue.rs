//! # MessageQueue Contract
//!
//! The persistence interface the task-queue core consumes. Two backends
//! implement it: [`crate::messaging::PgmqClient`] (PostgreSQL + pgmq) and
//! [`crate::messaging::MemoryQueue`] (in-process, clock-driven).

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::errors::{QueueError, QueueResult};
use super::message::{Message, QueueMeta, QueueMetrics};

/// Visibility timeout substituted when a caller passes 0.
pub const DEFAULT_VT_SECS: i32 = 30;

// Postgres identifiers cap at NAMEDATALEN - 1 = 63 bytes; the longest name
// derived from a queue name is the archive index prefix.
const MAX_IDENTIFIER_LEN: usize = 63;
const BIGGEST_CONCAT: &str = "archived_at_idx_";

/// Longest permitted queue name.
pub const MAX_QUEUE_NAME_LEN: usize = MAX_IDENTIFIER_LEN - BIGGEST_CONCAT.len();

static QUEUE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

/// Validate a queue name against the `^[A-Za-z0-9_]+$` grammar and the
/// identifier length limit.
pub fn validate_queue_name(queue_name: &str) -> QueueResult<()> {
    if queue_name.is_empty() {
        return Err(QueueError::invalid_queue_name(
            queue_name,
            "queue name cannot be empty",
        ));
    }
    if queue_name.len() > MAX_QUEUE_NAME_LEN {
        return Err(QueueError::invalid_queue_name(
            queue_name,
            format!(
                "queue name too long (max {} characters, got {})",
                MAX_QUEUE_NAME_LEN,
                queue_name.len()
            ),
        ));
    }
    let regex = QUEUE_NAME_REGEX.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").unwrap());
    if !regex.is_match(queue_name) {
        return Err(QueueError::invalid_queue_name(
            queue_name,
            "queue name must contain only alphanumeric characters and underscores",
        ));
    }
    Ok(())
}

/// Producers often compute `time_until(scheduled_for)`, which may already be
/// in the past; a negative delay means "deliver now".
pub(crate) fn clamp_delay(delay_secs: i64) -> i32 {
    delay_secs.clamp(0, i64::from(i32::MAX)) as i32
}

pub(crate) fn with_default_vt(vt_secs: i32) -> i32 {
    if vt_secs == 0 {
        DEFAULT_VT_SECS
    } else {
        vt_secs
    }
}

/// Durable FIFO-with-visibility-timeout queue.
///
/// Delivery is at-least-once: a leased message becomes re-claimable once its
/// visibility timestamp passes, unless it is deleted or archived first.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Idempotently create a queue.
    async fn create_queue(&self, queue_name: &str) -> QueueResult<()>;

    /// Idempotently create an unlogged queue (faster, not crash-safe).
    async fn create_unlogged_queue(&self, queue_name: &str) -> QueueResult<()>;

    /// Idempotently create a partitioned queue.
    async fn create_partitioned_queue(
        &self,
        queue_name: &str,
        partition_interval: &str,
        retention_interval: &str,
    ) -> QueueResult<()>;

    /// Drop a queue and everything in it. `QueueNotFound` when it never
    /// existed.
    async fn drop_queue(&self, queue_name: &str) -> QueueResult<()>;

    /// Delete all messages; returns how many were removed.
    async fn purge_queue(&self, queue_name: &str) -> QueueResult<i64>;

    async fn list_queues(&self) -> QueueResult<Vec<QueueMeta>>;

    async fn send(&self, queue_name: &str, payload: &serde_json::Value) -> QueueResult<i64>;

    /// Send with a delivery delay in seconds. Negative delays are coerced
    /// to 0.
    async fn send_with_delay(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_secs: i64,
    ) -> QueueResult<i64>;

    /// Send several payloads; returned ids preserve input order.
    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[serde_json::Value],
        delay_secs: i64,
    ) -> QueueResult<Vec<i64>>;

    /// Lease at most one message for `vt_secs` seconds. `vt_secs == 0` uses
    /// [`DEFAULT_VT_SECS`].
    async fn read(&self, queue_name: &str, vt_secs: i32) -> QueueResult<Option<Message>>;

    /// Lease up to `max_messages` messages, oldest visibility first.
    async fn read_batch(
        &self,
        queue_name: &str,
        vt_secs: i32,
        max_messages: i32,
    ) -> QueueResult<Vec<Message>>;

    /// Read-and-delete a single message.
    async fn pop(&self, queue_name: &str) -> QueueResult<Option<Message>>;

    /// Permanently remove a message. `false` when it was not present.
    async fn delete(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool>;

    /// Remove several messages; returns the ids actually deleted.
    async fn delete_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>>;

    /// Move a message into the archive table for audit.
    async fn archive(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool>;

    async fn archive_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>>;

    /// Re-point a message's visibility timestamp to `now + vt_secs`.
    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_secs: i32,
    ) -> QueueResult<Message>;

    async fn metrics(&self, queue_name: &str) -> QueueResult<QueueMetrics>;

    async fn metrics_all(&self) -> QueueResult<Vec<QueueMetrics>>;
}
