//! # Messaging
//!
//! The durable FIFO-with-visibility-timeout primitive the task queue is built
//! on, plus the pointer payload that flows through it.

pub mod errors;
pub mod memory;
pub mod message;
pub mod pgmq_client;
pub mod queue;

pub use errors::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{Message, QueueMeta, QueueMetrics, TaskMessage, TaskMessageData};
pub use pgmq_client::PgmqClient;
pub use queue::{validate_queue_name, MessageQueue, DEFAULT_VT_SECS, MAX_QUEUE_NAME_LEN};
