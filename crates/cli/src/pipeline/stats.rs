//! Run statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use dispatcher::MetricsSnapshot;
use work_queue::QueueStats;

/// Statistics from one dispatcher run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Items enqueued before the workers started
    pub seeded: usize,

    /// Total duration of the run
    pub duration: Duration,

    /// Dispatcher counters
    pub dispatch: MetricsSnapshot,

    /// What was left on each queue at exit
    pub queues: BTreeMap<String, QueueStats>,
}

impl PipelineStats {
    /// Items handled per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.popped as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Messages still on any queue
    pub fn pending(&self) -> usize {
        self.queues
            .values()
            .map(|stats| stats.ready + stats.in_flight + stats.delayed)
            .sum()
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Seeded: {}", self.seeded);
        println!("Throughput: {:.2} items/s", self.throughput());
        println!();
        print!("{}", self.dispatch);

        if !self.queues.is_empty() {
            println!("\nQueues at exit:");
            for (name, stats) in &self.queues {
                println!(
                    "  {name}: ready={}, in_flight={}, delayed={}",
                    stats.ready, stats.in_flight, stats.delayed
                );
            }
        }
        println!();
    }
}
