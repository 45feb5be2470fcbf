//! # Work Queue
//!
//! Transactional in-process queue with at-least-once delivery, plus the
//! notifier that posts new keys to it.

mod memory;
mod notifier;

pub use memory::{MemoryQueue, QueueHub, QueueStats};
pub use notifier::QueueNotifier;
