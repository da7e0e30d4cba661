//! # Message Envelopes
//!
//! Queue message shapes and the task pointer payload. The queue carries only
//! `{task_id, entity_id, attempt}`; the task store stays authoritative for
//! everything else, which keeps the queue schema independent of handler
//! evolution and lets priority be changed after enqueue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message leased from a queue.
#[derive(Debug, Clone)]
pub struct Message {
    /// Store-assigned id, monotonic per queue.
    pub msg_id: i64,
    /// Number of times this message has been leased.
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the message may be read again.
    pub vt: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub headers: Option<serde_json::Value>,
}

/// Queue registry row.
#[derive(Debug, Clone)]
pub struct QueueMeta {
    pub queue_name: String,
    pub is_partitioned: bool,
    pub is_unlogged: bool,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub queue_length: i64,
    pub newest_msg_age_sec: Option<i32>,
    pub oldest_msg_age_sec: Option<i32>,
    pub total_messages: i64,
    pub scrape_time: DateTime<Utc>,
}

/// Pointer payload for task messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessageData {
    pub task_id: i64,
    pub entity_id: String,
    pub attempt: i32,
}

/// A task message as leased by a worker: queue envelope plus decoded pointer.
#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub message_id: i64,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub vt: DateTime<Utc>,
    pub data: TaskMessageData,
}

impl TaskMessage {
    pub fn from_message(message: Message) -> Result<Self, serde_json::Error> {
        let data: TaskMessageData = serde_json::from_value(message.payload)?;
        Ok(Self {
            message_id: message.msg_id,
            read_count: message.read_count,
            enqueued_at: message.enqueued_at,
            vt: message.vt,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pointer_payload_wire_shape() {
        let data = TaskMessageData {
            task_id: 42,
            entity_id: "building:12345".to_string(),
            attempt: 1,
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({"task_id": 42, "entity_id": "building:12345", "attempt": 1})
        );

        let parsed: TaskMessageData = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn task_message_rejects_foreign_payloads() {
        let message = Message {
            msg_id: 1,
            read_count: 1,
            enqueued_at: Utc::now(),
            vt: Utc::now(),
            payload: json!({"unrelated": true}),
            headers: None,
        };
        assert!(TaskMessage::from_message(message).is_err());
    }
}
