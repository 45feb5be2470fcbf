//! MemoryQueue - ready list, in-flight table, delayed redelivery

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use contracts::{ContractError, Delivery, QueueSettings, WorkQueue};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    next_receipt: u64,
    ready: VecDeque<Value>,
    in_flight: HashMap<u64, Value>,
    delayed: Vec<(Instant, Value)>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.delayed.len() {
            if self.delayed[index].0 <= now {
                let (_, message) = self.delayed.swap_remove(index);
                self.ready.push_back(message);
            } else {
                index += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(due, _)| *due).min()
    }
}

/// Point-in-time queue counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
    pub delayed: usize,
}

impl QueueStats {
    pub fn is_empty(&self) -> bool {
        self.ready == 0 && self.in_flight == 0 && self.delayed == 0
    }
}

/// In-process work queue
///
/// A popped message stays in flight until committed or rolled back. Rolled
/// back messages become visible again after `redelivery_delay`.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    redelivery_delay: Duration,
    state: Mutex<QueueState>,
    available: Notify,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, redelivery_delay: Duration) -> Self {
        Self {
            name: name.into(),
            redelivery_delay,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(&settings.name, settings.redelivery_delay())
    }

    pub fn stats(&self) -> Result<QueueStats, ContractError> {
        let state = self.lock()?;
        Ok(QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            delayed: state.delayed.len(),
        })
    }

    /// Messages not yet committed, in-flight ones excluded
    pub fn pending(&self) -> Result<Vec<Value>, ContractError> {
        let state = self.lock()?;
        Ok(state
            .ready
            .iter()
            .chain(state.delayed.iter().map(|(_, message)| message))
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, ContractError> {
        self.state
            .lock()
            .map_err(|_| ContractError::queue(&self.name, "lock poisoned"))
    }

    /// Pop if something is ready; otherwise report when to look again
    fn try_pop(&self) -> Result<Result<Delivery, Option<Instant>>, ContractError> {
        let mut state = self.lock()?;
        state.promote_due(Instant::now());

        let Some(message) = state.ready.pop_front() else {
            return Ok(Err(state.next_due()));
        };

        state.next_receipt += 1;
        let receipt = state.next_receipt;
        state.in_flight.insert(receipt, message.clone());
        Ok(Ok(Delivery { receipt, message }))
    }

    fn take_in_flight(&self, receipt: u64) -> Result<Value, ContractError> {
        let mut state = self.lock()?;
        state.in_flight.remove(&receipt).ok_or_else(|| {
            ContractError::queue(&self.name, format!("unknown receipt {receipt}"))
        })
    }
}

impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pop(&self, wait: Option<Duration>) -> Result<Option<Delivery>, ContractError> {
        let deadline = wait.map(|wait| Instant::now() + wait);

        loop {
            // Registered before checking so an `add` in between is not lost
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = match self.try_pop()? {
                Ok(delivery) => {
                    trace!(queue = %self.name, receipt = delivery.receipt, "Popped");
                    return Ok(Some(delivery));
                }
                Err(next_due) => next_due,
            };

            let Some(deadline) = deadline else {
                return Ok(None);
            };
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake) => {}
            }
        }
    }

    async fn commit(&self, delivery: Delivery) -> Result<(), ContractError> {
        self.take_in_flight(delivery.receipt)?;
        trace!(queue = %self.name, receipt = delivery.receipt, "Committed");
        Ok(())
    }

    async fn rollback(&self, delivery: Delivery) -> Result<(), ContractError> {
        let message = self.take_in_flight(delivery.receipt)?;
        {
            let mut state = self.lock()?;
            if self.redelivery_delay.is_zero() {
                state.ready.push_back(message);
            } else {
                state
                    .delayed
                    .push((Instant::now() + self.redelivery_delay, message));
            }
        }
        self.available.notify_one();
        debug!(
            queue = %self.name,
            receipt = delivery.receipt,
            delay = ?self.redelivery_delay,
            "Rolled back"
        );
        Ok(())
    }

    async fn add(&self, message: Value) -> Result<(), ContractError> {
        self.lock()?.ready.push_back(message);
        self.available.notify_one();
        Ok(())
    }
}

/// Named queues sharing one redelivery policy
#[derive(Debug)]
pub struct QueueHub {
    redelivery_delay: Duration,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl QueueHub {
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            redelivery_delay,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queue by name, created on first use
    pub fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>, ContractError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| ContractError::queue(name, "hub lock poisoned"))?;
        Ok(Arc::clone(queues.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryQueue::new(name, self.redelivery_delay))
        })))
    }

    /// Queue names, sorted
    pub fn names(&self) -> Result<Vec<String>, ContractError> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| ContractError::Other("queue hub lock poisoned".into()))?;
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}
