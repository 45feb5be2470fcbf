//! # Dispatcher
//!
//! Work-queue dispatcher.
//!
//! Responsible for:
//! - Popping work items from a transactional queue
//! - Matching them to routes and running the bound transform
//! - Reconciling destination keys and notifying downstream queues
//! - Bounded retry and give-up with commit/rollback

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod routes;
pub mod sinks;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::DispatcherError;
pub use handle::WorkerHandle;
pub use metrics::{DispatchMetrics, MetricsSnapshot, Outcome};
pub use registry::SinkRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use routes::{NotifierFactory, Route, RouteMember, RouteTable};
pub use sinks::{BucketSink, NoopSink, SplitSink};
