//! Sink implementations
//!
//! Contains BucketSink, NoopSink, and SplitSink.

mod bucket;
mod noop;
mod split;

pub use self::bucket::BucketSink;
pub use self::noop::NoopSink;
pub use self::split::SplitSink;
