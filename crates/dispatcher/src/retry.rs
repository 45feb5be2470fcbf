//! Retry policy - bounded requeue, then give up

use contracts::DispatcherSettings;

/// What to do with an item that just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put back without fuss
    RequeueQuietly,
    /// Put back, but it has failed often enough to mention
    RequeueWithWarning,
    /// Drop the item and raise an alert
    Reject,
}

/// Attempt thresholds, applied to the attempt count an item arrived with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_attempts: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DispatcherSettings::default())
    }
}

impl RetryPolicy {
    pub fn new(min_attempts: u32, max_attempts: u32) -> Self {
        Self {
            min_attempts,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &DispatcherSettings) -> Self {
        Self::new(settings.min_attempts, settings.max_attempts)
    }

    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts > self.max_attempts {
            RetryDecision::Reject
        } else if attempts >= self.min_attempts {
            RetryDecision::RequeueWithWarning
        } else {
            RetryDecision::RequeueQuietly
        }
    }
}
