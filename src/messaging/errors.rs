//! # Queue Error Types
//!
//! Structured errors for the message-queue primitive. "No message available"
//! is not represented here: read and pop surface it as `None`/empty.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid queue name {queue_name:?}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("message {msg_id} not found in queue {queue_name}")]
    MessageNotFound { queue_name: String, msg_id: i64 },

    #[error("queue operation {operation} on {queue_name} failed: {source}")]
    Database {
        queue_name: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn message_not_found(queue_name: impl Into<String>, msg_id: i64) -> Self {
        Self::MessageNotFound {
            queue_name: queue_name.into(),
            msg_id,
        }
    }

    /// Wrap a database failure, folding "relation does not exist" into
    /// [`QueueError::QueueNotFound`] so callers see one taxonomy regardless
    /// of which pgmq statement tripped first.
    pub fn database(
        queue_name: impl Into<String>,
        operation: &'static str,
        source: sqlx::Error,
    ) -> Self {
        let queue_name = queue_name.into();
        if let sqlx::Error::Database(db_err) = &source {
            if db_err.code().as_deref() == Some("42P01") {
                return Self::QueueNotFound { queue_name };
            }
        }
        Self::Database {
            queue_name,
            operation,
            source,
        }
    }

    pub fn is_queue_not_found(&self) -> bool {
        matches!(self, QueueError::QueueNotFound { .. })
    }

    pub fn is_message_not_found(&self) -> bool {
        matches!(self, QueueError::MessageNotFound { .. })
    }

    pub fn is_invalid_queue_name(&self) -> bool {
        matches!(self, QueueError::InvalidQueueName { .. })
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
