//! Pipeline orchestration module.

mod orchestrator;
mod seed;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use seed::{load_seed_file, manual_items};
pub use stats::PipelineStats;
