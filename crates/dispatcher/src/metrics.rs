//! Dispatch metrics for the run summary
//!
//! Counters are shared by all workers. Every increment is mirrored to the
//! `metrics` facade through `observability`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use observability::{RunningStats, StatsSummary};

/// How one work item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every matching route succeeded
    Committed,
    /// Failed, put back with one more attempt
    Requeued,
    /// Dropped: out of attempts, or a key no retry can fix
    Rejected,
    /// No matching route
    Unrouted,
    /// Not a work item
    Malformed,
    /// Requeue failed; original transaction rolled back
    RolledBack,
    /// Stop signal observed mid-item; rolled back
    Shutdown,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Requeued => "requeued",
            Self::Rejected => "rejected",
            Self::Unrouted => "unrouted",
            Self::Malformed => "malformed",
            Self::RolledBack => "rolled_back",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    popped: AtomicU64,
    committed: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
    unrouted: AtomicU64,
    malformed: AtomicU64,
    rolled_back: AtomicU64,
    /// Requeues logged at warning level
    warned: AtomicU64,
    /// Route failures, counted per route attempt
    failures: AtomicU64,
    latency_ms: Mutex<BTreeMap<String, RunningStats>>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_popped(&self) {
        self.popped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Committed => &self.committed,
            Outcome::Requeued => &self.requeued,
            Outcome::Rejected => &self.rejected,
            Outcome::Unrouted => &self.unrouted,
            Outcome::Malformed => &self.malformed,
            Outcome::RolledBack | Outcome::Shutdown => &self.rolled_back,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        observability::record_item_outcome(outcome.as_str());
    }

    pub fn inc_warned(&self) {
        self.warned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route(&self, route: &str, latency_ms: f64, success: bool) {
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut latency) = self.latency_ms.lock() {
            latency.entry(route.to_string()).or_default().push(latency_ms);
        }
        observability::record_route_invocation(route, success);
        observability::record_transform_latency_ms(route, latency_ms);
    }

    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let route_latency_ms = self
            .latency_ms
            .lock()
            .map(|latency| {
                latency
                    .iter()
                    .map(|(route, stats)| (route.clone(), StatsSummary::from(stats)))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            popped: self.popped(),
            committed: self.committed(),
            requeued: self.requeued(),
            rejected: self.rejected(),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            route_latency_ms,
        }
    }
}

/// Point-in-time copy of `DispatchMetrics`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub popped: u64,
    pub committed: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub unrouted: u64,
    pub malformed: u64,
    pub rolled_back: u64,
    pub warned: u64,
    pub failures: u64,
    pub route_latency_ms: BTreeMap<String, StatsSummary>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Popped: {}", self.popped)?;
        writeln!(f, "Committed: {}", self.committed)?;
        writeln!(f, "Requeued: {}", self.requeued)?;
        writeln!(f, "Rejected: {}", self.rejected)?;
        writeln!(f, "Unrouted: {}", self.unrouted)?;
        writeln!(f, "Malformed: {}", self.malformed)?;
        writeln!(f, "Rolled back: {}", self.rolled_back)?;
        writeln!(f, "Requeued with warning: {}", self.warned)?;
        writeln!(f, "Route failures: {}", self.failures)?;

        if !self.route_latency_ms.is_empty() {
            writeln!(f, "Transform latency (ms):")?;
            for (route, stats) in &self.route_latency_ms {
                writeln!(f, "  {route}: {stats}")?;
            }
        }
        Ok(())
    }
}
