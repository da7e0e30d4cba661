//! # In-Memory Queue
//!
//! [`MessageQueue`] backend living entirely in process memory, with the same
//! visibility-timeout semantics as the pgmq backend. Useful for local
//! development and for deterministic tests: pair it with a
//! [`crate::clock::ManualClock`] and lease expiry becomes a function call
//! instead of a wall-clock wait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};

use super::errors::{QueueError, QueueResult};
use super::message::{Message, QueueMeta, QueueMetrics};
use super::queue::{clamp_delay, validate_queue_name, with_default_vt, MessageQueue};

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    read_count: i32,
    enqueued_at: DateTime<Utc>,
    vt: DateTime<Utc>,
    payload: serde_json::Value,
}

impl StoredMessage {
    fn to_message(&self) -> Message {
        Message {
            msg_id: self.msg_id,
            read_count: self.read_count,
            enqueued_at: self.enqueued_at,
            vt: self.vt,
            payload: self.payload.clone(),
            headers: None,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    messages: Vec<StoredMessage>,
    archive: Vec<StoredMessage>,
    next_msg_id: i64,
    total_sent: i64,
    is_partitioned: bool,
    is_unlogged: bool,
    created_at: DateTime<Utc>,
}

impl QueueState {
    fn new(now: DateTime<Utc>, is_partitioned: bool, is_unlogged: bool) -> Self {
        Self {
            messages: Vec::new(),
            archive: Vec::new(),
            next_msg_id: 1,
            total_sent: 0,
            is_partitioned,
            is_unlogged,
            created_at: now,
        }
    }

    fn push(&mut self, payload: serde_json::Value, now: DateTime<Utc>, delay_secs: i32) -> i64 {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        self.total_sent += 1;
        self.messages.push(StoredMessage {
            msg_id,
            read_count: 0,
            enqueued_at: now,
            vt: now + Duration::seconds(i64::from(delay_secs)),
            payload,
        });
        msg_id
    }

    /// Indices of visible messages, oldest visibility timestamp first.
    fn visible_indices(&self, now: DateTime<Utc>) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.vt <= now)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| (self.messages[i].vt, self.messages[i].msg_id));
        indices
    }
}

pub struct MemoryQueue {
    clock: Arc<dyn Clock>,
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn create(&self, queue_name: &str, is_partitioned: bool, is_unlogged: bool) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue_name.to_string())
            .or_insert_with(|| QueueState::new(self.clock.now(), is_partitioned, is_unlogged));
        Ok(())
    }

    fn with_queue<T>(
        &self,
        queue_name: &str,
        f: impl FnOnce(&mut QueueState, DateTime<Utc>) -> T,
    ) -> QueueResult<T> {
        validate_queue_name(queue_name)?;
        let mut queues = self.queues.lock().unwrap();
        let state = queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::queue_not_found(queue_name))?;
        Ok(f(state, self.clock.now()))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn create_queue(&self, queue_name: &str) -> QueueResult<()> {
        self.create(queue_name, false, false)
    }

    async fn create_unlogged_queue(&self, queue_name: &str) -> QueueResult<()> {
        self.create(queue_name, false, true)
    }

    async fn create_partitioned_queue(
        &self,
        queue_name: &str,
        _partition_interval: &str,
        _retention_interval: &str,
    ) -> QueueResult<()> {
        self.create(queue_name, true, false)
    }

    async fn drop_queue(&self, queue_name: &str) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        let mut queues = self.queues.lock().unwrap();
        if queues.remove(queue_name).is_none() {
            return Err(QueueError::queue_not_found(queue_name));
        }
        Ok(())
    }

    async fn purge_queue(&self, queue_name: &str) -> QueueResult<i64> {
        self.with_queue(queue_name, |state, _| {
            let purged = state.messages.len() as i64;
            state.messages.clear();
            purged
        })
    }

    async fn list_queues(&self) -> QueueResult<Vec<QueueMeta>> {
        let queues = self.queues.lock().unwrap();
        let mut metas: Vec<QueueMeta> = queues
            .iter()
            .map(|(name, state)| QueueMeta {
                queue_name: name.clone(),
                is_partitioned: state.is_partitioned,
                is_unlogged: state.is_unlogged,
                created_at: state.created_at,
            })
            .collect();
        metas.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));
        Ok(metas)
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
        let delay = clamp_delay(delay_secs);
        self.with_queue(queue_name, |state, now| {
            state.push(payload.clone(), now, delay)
        })
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        payloads: &[serde_json::Value],
        delay_secs: i64,
    ) -> QueueResult<Vec<i64>> {
        let delay = clamp_delay(delay_secs);
        self.with_queue(queue_name, |state, now| {
            payloads
                .iter()
                .map(|payload| state.push(payload.clone(), now, delay))
                .collect()
        })
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
        let vt = with_default_vt(vt_secs);
        self.with_queue(queue_name, |state, now| {
            let indices = state.visible_indices(now);
            let mut leased = Vec::new();
            for &index in indices.iter().take(max_messages.max(0) as usize) {
                let message = &mut state.messages[index];
                message.vt = now + Duration::seconds(i64::from(vt));
                message.read_count += 1;
                leased.push(message.to_message());
            }
            leased
        })
    }

    async fn pop(&self, queue_name: &str) -> QueueResult<Option<Message>> {
        self.with_queue(queue_name, |state, now| {
            let indices = state.visible_indices(now);
            indices.first().map(|&index| {
                let mut message = state.messages.remove(index);
                message.read_count += 1;
                message.to_message()
            })
        })
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool> {
        self.with_queue(queue_name, |state, _| {
            let before = state.messages.len();
            state.messages.retain(|m| m.msg_id != msg_id);
            state.messages.len() < before
        })
    }

    async fn delete_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>> {
        self.with_queue(queue_name, |state, _| {
            let mut deleted = Vec::new();
            state.messages.retain(|m| {
                if msg_ids.contains(&m.msg_id) {
                    deleted.push(m.msg_id);
                    false
                } else {
                    true
                }
            });
            deleted.sort_unstable();
            deleted
        })
    }

    async fn archive(&self, queue_name: &str, msg_id: i64) -> QueueResult<bool> {
        self.with_queue(queue_name, |state, _| {
            match state.messages.iter().position(|m| m.msg_id == msg_id) {
                Some(index) => {
                    let message = state.messages.remove(index);
                    state.archive.push(message);
                    true
                }
                None => false,
            }
        })
    }

    async fn archive_batch(&self, queue_name: &str, msg_ids: &[i64]) -> QueueResult<Vec<i64>> {
        self.with_queue(queue_name, |state, _| {
            let mut archived = Vec::new();
            let mut remaining = Vec::with_capacity(state.messages.len());
            for message in state.messages.drain(..) {
                if msg_ids.contains(&message.msg_id) {
                    archived.push(message.msg_id);
                    state.archive.push(message);
                } else {
                    remaining.push(message);
                }
            }
            state.messages = remaining;
            archived.sort_unstable();
            archived
        })
    }

    async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_secs: i32,
    ) -> QueueResult<Message> {
        self.with_queue(queue_name, |state, now| {
            state
                .messages
                .iter_mut()
                .find(|m| m.msg_id == msg_id)
                .map(|message| {
                    message.vt = now + Duration::seconds(i64::from(vt_secs));
                    message.to_message()
                })
        })?
        .ok_or_else(|| QueueError::message_not_found(queue_name, msg_id))
    }

    async fn metrics(&self, queue_name: &str) -> QueueResult<QueueMetrics> {
        self.with_queue(queue_name, |state, now| {
            let ages: Vec<i64> = state
                .messages
                .iter()
                .map(|m| (now - m.enqueued_at).num_seconds())
                .collect();
            QueueMetrics {
                queue_name: queue_name.to_string(),
                queue_length: state.messages.len() as i64,
                newest_msg_age_sec: ages.iter().min().map(|&a| a as i32),
                oldest_msg_age_sec: ages.iter().max().map(|&a| a as i32),
                total_messages: state.total_sent,
                scrape_time: now,
            }
        })
    }

    async fn metrics_all(&self) -> QueueResult<Vec<QueueMetrics>> {
        let names: Vec<String> = {
            let queues = self.queues.lock().unwrap();
            let mut names: Vec<String> = queues.keys().cloned().collect();
            names.sort();
            names
        };
        let mut all = Vec::with_capacity(names.len());
        for name in names {
            all.push(self.metrics(&name).await?);
        }
        Ok(all)
    }
}
