//! WorkQueue trait - transactional, at-least-once delivery
//!
//! `pop` hands a message to exactly one caller until it is committed or
//! rolled back. A crash in between returns the message to the queue.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ContractError, WorkItem};

/// Message handed out by `pop`, owned by the caller until commit/rollback
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Queue-assigned receipt
    pub receipt: u64,

    /// Raw message, not yet validated as a work item
    pub message: Value,
}

/// Work queue trait
#[trait_variant::make(WorkQueue: Send)]
pub trait LocalWorkQueue {
    /// Queue name (used for logging)
    fn name(&self) -> &str;

    /// Take one message
    ///
    /// `None` wait returns immediately; otherwise blocks up to `wait` for a
    /// message to become available. `Ok(None)` means nothing was available.
    async fn pop(&self, wait: Option<Duration>) -> Result<Option<Delivery>, ContractError>;

    /// Remove a popped message for good
    async fn commit(&self, delivery: Delivery) -> Result<(), ContractError>;

    /// Return a popped message to the queue
    async fn rollback(&self, delivery: Delivery) -> Result<(), ContractError>;

    /// Enqueue a new message
    async fn add(&self, message: Value) -> Result<(), ContractError>;
}

/// Downstream notification target
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Target name (used for logging)
    fn name(&self) -> &str;

    /// Announce a newly written destination key
    async fn notify(&self, key: &str) -> Result<(), ContractError>;
}

/// Build the message announcing `key` in `bucket`
pub fn key_message(bucket: &str, key: &str) -> Result<Value, ContractError> {
    WorkItem::new(bucket, key).to_value()
}
