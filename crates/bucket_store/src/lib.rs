//! # Bucket Store
//!
//! Object-store access for the pipeline.
//!
//! - `StorageBackend`: raw get/put/list per bucket (memory or local directory)
//! - `ObjectBucket`: key resolution with extensions, line-oriented reads/writes
//! - `BucketSource`: a stored object as transform input
//! - `StoreCatalog`: one backend per bucket name, built from `StorageSettings`

mod backend;
mod bucket;
mod catalog;
mod local;
mod memory;
mod source;

pub use backend::{ObjectMeta, StorageBackend};
pub use bucket::ObjectBucket;
pub use catalog::StoreCatalog;
pub use local::LocalFsBackend;
pub use memory::MemoryBackend;
pub use source::BucketSource;
