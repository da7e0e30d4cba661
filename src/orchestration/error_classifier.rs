//! # Error Classification
//!
//! Maps a raw handler failure to its disposition: retry with an optional
//! server-suggested delay, or give up and dead-letter. Pure, so every rule is
//! unit-testable. Rules are evaluated in order; the first match wins.

use std::time::Duration;

use super::handler::HandlerError;

/// Default Retry-After applied to rate limits that did not say.
const RATE_LIMIT_DEFAULT_DELAY_SECS: u64 = 60;

/// Outcome of classifying a handler failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient; the worker schedules a retry. A suggested delay, when
    /// present, overrides exponential backoff (still capped by
    /// `max_retry_delay`).
    Retryable { retry_after: Option<Duration> },
    /// Terminal; the worker routes the task to the dead-letter queue.
    Permanent { reason: String },
}

impl ErrorDisposition {
    pub fn retryable() -> Self {
        Self::Retryable { retry_after: None }
    }

    pub fn retryable_after(delay: Duration) -> Self {
        Self::Retryable {
            retry_after: Some(delay),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorDisposition::Retryable { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ErrorDisposition::Permanent { .. })
    }

    pub fn permanent_reason(&self) -> Option<&str> {
        match self {
            ErrorDisposition::Permanent { reason } => Some(reason),
            ErrorDisposition::Retryable { .. } => None,
        }
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            ErrorDisposition::Retryable { retry_after } => *retry_after,
            ErrorDisposition::Permanent { .. } => None,
        }
    }
}

/// Classify a handler failure.
pub fn classify(error: &HandlerError) -> ErrorDisposition {
    match error {
        // A deadline or cancellation says nothing about the task itself.
        HandlerError::Timeout(_) | HandlerError::Cancelled => ErrorDisposition::retryable(),

        HandlerError::HttpStatus {
            status,
            retry_after_secs,
            ..
        } => classify_http_status(*status, *retry_after_secs),

        HandlerError::EntityParse(_) => ErrorDisposition::permanent("invalid entity format"),

        HandlerError::Panicked(_) => ErrorDisposition::permanent("task handler panicked"),

        HandlerError::UnknownTaskType(_) => ErrorDisposition::permanent("unrecognized task type"),

        // Anything unrecognized gets the conservative treatment.
        HandlerError::Other(_) => ErrorDisposition::retryable(),
    }
}

fn classify_http_status(status: u16, retry_after_secs: Option<u64>) -> ErrorDisposition {
    match status {
        404 => ErrorDisposition::permanent("resource not found"),
        401 | 403 => ErrorDisposition::permanent("authentication/authorization failed"),
        429 => {
            let delay = match retry_after_secs {
                Some(secs) if secs > 0 => secs,
                _ => RATE_LIMIT_DEFAULT_DELAY_SECS,
            };
            ErrorDisposition::retryable_after(Duration::from_secs(delay))
        }
        400..=499 => ErrorDisposition::permanent(format!("client error: {status}")),
        500..=599 => ErrorDisposition::retryable(),
        _ => ErrorDisposition::retryable(),
    }
}
