//! # Orchestration
//!
//! The moving parts above the store: the coordinator façade producers talk
//! to, the error-classification pipeline, and the worker pool that drains the
//! queue.

pub mod coordinator;
pub mod error_classifier;
pub mod handler;
pub mod worker;
pub mod worker_pool;

pub use coordinator::Coordinator;
pub use error_classifier::{classify, ErrorDisposition};
pub use handler::{HandlerError, TaskHandler};
pub use worker::Worker;
pub use worker_pool::WorkerPool;
