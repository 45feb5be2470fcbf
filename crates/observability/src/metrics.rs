//! Dispatcher metrics
//!
//! Thin wrappers over the `metrics` facade so every crate records the same
//! names and labels. Nothing is exported unless a recorder is installed.

use metrics::{counter, gauge, histogram};

/// One finished work item, labelled by how it ended
pub fn record_item_outcome(outcome: &str) {
    counter!("etl_dispatcher_items_total", "outcome" => outcome.to_string()).increment(1);
}

/// Failed item put back on the queue
pub fn record_requeue(attempts: u32) {
    counter!("etl_dispatcher_requeued_total").increment(1);
    histogram!("etl_dispatcher_attempts").record(f64::from(attempts));
}

/// Item given up on after too many attempts
pub fn record_rejected(error_kind: &str) {
    counter!(
        "etl_dispatcher_rejected_total",
        "error_kind" => error_kind.to_string()
    )
    .increment(1);
}

/// One transform call on a route
pub fn record_route_invocation(route: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "etl_dispatcher_route_invocations_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_transform_latency_ms(route: &str, latency_ms: f64) {
    histogram!(
        "etl_dispatcher_transform_latency_ms",
        "route" => route.to_string()
    )
    .record(latency_ms);
}

/// Keys returned by a transform, and keys it no longer produces
pub fn record_keys(route: &str, written: usize, orphaned: usize) {
    counter!("etl_dispatcher_keys_written_total", "route" => route.to_string())
        .increment(written as u64);
    if orphaned > 0 {
        counter!("etl_dispatcher_keys_orphaned_total", "route" => route.to_string())
            .increment(orphaned as u64);
    }
}

pub fn record_queue_depth(queue: &str, ready: usize, in_flight: usize) {
    gauge!("etl_dispatcher_queue_ready", "queue" => queue.to_string()).set(ready as f64);
    gauge!("etl_dispatcher_queue_in_flight", "queue" => queue.to_string()).set(in_flight as f64);
}

/// Summary of a `RunningStats`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_summary_display() {
        assert_eq!(StatsSummary::default().to_string(), "N/A");

        let mut stats = RunningStats::default();
        stats.push(10.0);
        let summary = StatsSummary::from(&stats);
        assert!(summary.to_string().contains("n=1"), "got: {summary}");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_item_outcome("committed");
        record_requeue(3);
        record_rejected("fatal");
        record_route_invocation("raw-lines", true);
        record_transform_latency_ms("raw-lines", 1.5);
        record_keys("raw-lines", 2, 1);
        record_queue_depth("etl", 0, 0);
    }
}
