//! # Crate Error Taxonomy
//!
//! Structured error types for the task-queue core. Sentinel variants support
//! `is-a` checks at the worker boundary; the [`TaskError`] wrapper carries
//! operation context for logging and never changes classification.

use thiserror::Error;

use crate::messaging::QueueError;

/// Errors surfaced by the task-queue core.
#[derive(Error, Debug)]
pub enum KoditonError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: i64 },

    #[error("entity {entity_id} not found")]
    EntityNotFound { entity_id: String },

    #[error("dead letter entry {dlq_id} not found")]
    DlqEntryNotFound { dlq_id: i64 },

    #[error("task {task_id} is {actual}, expected {expected}")]
    InvalidTaskState {
        task_id: i64,
        actual: String,
        expected: String,
    },

    #[error("max retries reached for task {task_id}")]
    MaxRetriesReached { task_id: i64 },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl KoditonError {
    pub fn is_task_not_found(&self) -> bool {
        matches!(self, KoditonError::TaskNotFound { .. })
    }

    pub fn is_entity_not_found(&self) -> bool {
        matches!(self, KoditonError::EntityNotFound { .. })
    }

    pub fn is_invalid_task_state(&self) -> bool {
        matches!(self, KoditonError::InvalidTaskState { .. })
    }

    pub fn is_max_retries_reached(&self) -> bool {
        matches!(self, KoditonError::MaxRetriesReached { .. })
    }
}

pub type Result<T> = std::result::Result<T, KoditonError>;

/// Operation-context wrapper used at worker boundaries.
///
/// Purely for structured logging: callers log it and then unwrap down to the
/// underlying [`KoditonError`] for any decision making.
#[derive(Error, Debug)]
#[error("{op}: {source}")]
pub struct TaskError {
    pub op: &'static str,
    pub task_id: Option<i64>,
    pub entity_id: Option<String>,
    pub task_type: Option<String>,
    pub attempt: Option<i32>,
    #[source]
    pub source: KoditonError,
}

impl TaskError {
    pub fn new(op: &'static str, source: KoditonError) -> Self {
        Self {
            op,
            task_id: None,
            entity_id: None,
            task_type: None,
            attempt: None,
            source,
        }
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}
