//! # Task Handler Contract
//!
//! The dispatch seam between the queue core and the sync logic. Handlers
//! receive the authoritative task row and report failure through
//! [`HandlerError`], which the worker feeds to the classifier.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::constants::UnknownTaskType;
use crate::models::{EntityParseError, Task};

/// Failure of a single handler execution.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// An upstream portal answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        /// Parsed Retry-After, when the response carried one.
        retry_after_secs: Option<u64>,
    },

    #[error(transparent)]
    EntityParse(#[from] EntityParseError),

    #[error(transparent)]
    UnknownTaskType(#[from] UnknownTaskType),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("task cancelled")]
    Cancelled,

    #[error("task handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::HttpStatus {
            status: 429,
            message: "rate limited".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// A typed consumer of tasks. Implementations must be idempotent per
/// `task_id`: delivery is at-least-once, and a retried task re-runs from the
/// top.
///
/// The worker enforces the per-task deadline by dropping the returned future,
/// so handlers should keep their await points honest and not detach work onto
/// background tasks they cannot cancel.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;
}
