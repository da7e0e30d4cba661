//! # PostgreSQL Message Queue Client
//!
//! [`MessageQueue`] backend speaking the pgmq SQL API through sqlx. pgmq owns
//! the queue tables (`pgmq.q_<name>`, `pgmq.a_<name>`) and guarantees the
//! read-with-lease atomicity (`FOR UPDATE SKIP LOCKED` inside `pgmq.read`);
//! this client adds name validation and the crate's error taxonomy.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use super::errors::{QueueError, QueueResult};
use super::message::{Message, QueueMeta, QueueMetrics};
use super::queue::{clamp_delay, validate_queue_name, with_default_vt, MessageQueue};

#[derive(Debug, Clone)]
pub struct PgmqClient {
    pool: PgPool,
}

impl PgmqClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_message(row: &PgRow) -> Message {
        Message {
            msg_id: row.get("msg_id"),
            read_count: row.get("read_ct"),
            enqueued_at: row.get("enqueued_at"),
            vt: row.get("vt"),
            payload: row.get("message"),
            headers: row.try_get("headers").ok().flatten(),
        }
    }

    fn row_to_metrics(row: &PgRow) -> QueueMetrics {
        QueueMetrics {
            queue_name: row.get("queue_name"),
            queue_length: row.get("queue_length"),
            newest_msg_age_sec: row.get("newest_msg_age_sec"),
            oldest_msg_age_sec: row.get("oldest_msg_age_sec"),
            total_messages: row.get("total_messages"),
            scrape_time: row.get("scrape_time"),
        }
    }
}

#[async_trait]
impl MessageQueue for PgmqClient {
    async fn create_queue(&self, queue_name: &str) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        debug!("📦 pgmq: creating queue {queue_name}");

        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "create", e))?;

        info!("pgmq: queue ready: {queue_name}");
        Ok(())
    }

    async fn create_unlogged_queue(&self, queue_name: &str) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        debug!("📦 pgmq: creating unlogged queue {queue_name}");

        sqlx::query("SELECT pgmq.create_unlogged($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "create_unlogged", e))?;

        Ok(())
    }

    async fn create_partitioned_queue(
        &self,
        queue_name: &str,
        partition_interval: &str,
        retention_interval: &str,
    ) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        debug!("📦 pgmq: creating partitioned queue {queue_name}");

        sqlx::query("SELECT pgmq.create_partitioned($1, $2, $3)")
            .bind(queue_name)
            .bind(partition_interval)
            .bind(retention_interval)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "create_partitioned", e))?;

        Ok(())
    }

    async fn drop_queue(&self, queue_name: &str) -> QueueResult<()> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query("SELECT pgmq.drop_queue($1) AS dropped")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "drop_queue", e))?;

        let dropped: bool = row.get("dropped");
        if !dropped {
            return Err(QueueError::queue_not_found(queue_name));
        }
        info!("pgmq: queue dropped: {queue_name}");
        Ok(())
    }

    async fn purge_queue(&self, queue_name: &str) -> QueueResult<i64> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query("SELECT pgmq.purge_queue($1) AS purged")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "purge_queue", e))?;

        let purged: i64 = row.get("purged");
        warn!("🧹 pgmq: purged {purged} messages from {queue_name}");
        Ok(purged)
    }

    async fn list_queues(&self) -> QueueResult<Vec<QueueMeta>> {
        let rows = sqlx::query(
            "SELECT queue_name, is_partitioned, is_unlogged, created_at FROM pgmq.list_queues()",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::database("*", "list_queues", e))?;

        Ok(rows
            .iter()
            .map(|row| QueueMeta {
                queue_name: row.get("queue_name"),
                is_partitioned: row.get("is_partitioned"),
                is_unlogged: row.get("is_unlogged"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn send(&self, queue_name: &str, payload: &serde_json::Value) -> QueueResult<i64> {
        self.send_with_delay(queue_name, payload, 0).await
    }

    async fn send_with_delay(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_secs: i64,
    ) -> QueueResult<i64> {
        validate_queue_name(queue_name)?;
        let delay = clamp_delay(delay_secs);
        debug!("📤 pgmq: send to {queue_name} (delay: {delay}s)");

        let row = sqlx::query("SELECT pgmq.send($1, $2, $3) AS msg_id")
            .bind(queue_name)
            .bind(payload)
            .bind(delay)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "send", e))?;

        Ok(row.get("msg_id"))
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[serde_json::Value],
        delay_secs: i64,
    ) -> QueueResult<Vec<i64>> {
        validate_queue_name(queue_name)?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let delay = clamp_delay(delay_secs);
        debug!("📤 pgmq: send batch of {} to {queue_name}", payloads.len());

        let rows = sqlx::query("SELECT pgmq.send_batch($1, $2::jsonb[], $3) AS msg_id")
            .bind(queue_name)
            .bind(payloads)
            .bind(delay)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "send_batch", e))?;

        Ok(rows.iter().map(|row| row.get("msg_id")).collect())
    }

    async fn read(&self, queue_name: &str, vt_secs: i32) -> QueueResult<Option<Message>> {
        let mut messages = self.read_batch(queue_name, vt_secs, 1).await?;
        Ok(messages.pop())
    }

    async fn read_batch(
        &self,
        queue_name: &str,
        vt_secs: i32,
        max_messages: i32,
    ) -> QueueResult<Vec<Message>> {
        validate_queue_name(queue_name)?;
        let vt = with_default_vt(vt_secs);

        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, vt, message, headers \
             FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(vt)
        .bind(max_messages)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::database(queue_name, "read", e))?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn pop(&self, queue_name: &str) -> QueueResult<Option<Message>> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, vt, message, headers FROM pgmq.pop($1)",
        )
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::database(queue_name, "pop", e))?;

        Ok(row.as_ref().map(Self::row_to_message))
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query("SELECT pgmq.delete($1, $2::bigint) AS deleted")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "delete", e))?;

        Ok(row.get("deleted"))
    }

    async fn delete_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>> {
        validate_queue_name(queue_name)?;
        if msg_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT pgmq.delete($1, $2::bigint[]) AS msg_id")
            .bind(queue_name)
            .bind(msg_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "delete_batch", e))?;

        Ok(rows.iter().map(|row| row.get("msg_id")).collect())
    }

    async fn archive(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool> {
        validate_queue_name(queue_name)?;
        debug!("📦 pgmq: archiving message {msg_id} from {queue_name}");

        let row = sqlx::query("SELECT pgmq.archive($1, $2::bigint) AS archived")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "archive", e))?;

        Ok(row.get("archived"))
    }

    async fn archive_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>> {
        validate_queue_name(queue_name)?;
        if msg_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT pgmq.archive($1, $2::bigint[]) AS msg_id")
            .bind(queue_name)
            .bind(msg_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::database(queue_name, "archive_batch", e))?;

        Ok(rows.iter().map(|row| row.get("msg_id")).collect())
    }

    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_secs: i32,
    ) -> QueueResult<Message> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, vt, message, headers \
             FROM pgmq.set_vt($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(msg_id)
        .bind(vt_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueueError::database(queue_name, "set_vt", e))?;

        row.as_ref()
            .map(Self::row_to_message)
            .ok_or_else(|| QueueError::message_not_found(queue_name, msg_id))
    }

    async fn metrics(&self, queue_name: &str) -> QueueResult<QueueMetrics> {
        validate_queue_name(queue_name)?;

        let row = sqlx::query(
            "SELECT queue_name, queue_length, newest_msg_age_sec, oldest_msg_age_sec, \
                    total_messages, scrape_time \
             FROM pgmq.metrics($1)",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::database(queue_name, "metrics", e))?;

        Ok(Self::row_to_metrics(&row))
    }

    async fn metrics_all(&self) -> QueueResult<Vec<QueueMetrics>> {
        let rows = sqlx::query(
            "SELECT queue_name, queue_length, newest_msg_age_sec, oldest_msg_age_sec, \
                    total_messages, scrape_time \
             FROM pgmq.metrics_all()",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::database("*", "metrics_all", e))?;

        Ok(rows.iter().map(Self::row_to_metrics).collect())
    }
}
