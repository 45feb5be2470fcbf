//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Key Model
//! - Every record is addressed by the provenance key of its etl header
//! - Work items point at a source bucket and key(s); delivery is at-least-once

mod blueprint;
mod document;
mod error;
mod provenance;
mod queue;
mod sink;
mod source;
mod transform;
mod work_item;

pub use blueprint::*;
pub use document::{Document, WriteMode};
pub use error::*;
pub use provenance::{Derivation, ProvenanceKind, ProvenanceNode, UNKNOWN_ID};
pub use queue::{key_message, Delivery, LocalWorkQueue, Notifier, WorkQueue};
pub use sink::{DocumentSink, SinkKind};
pub use source::{ConcatSource, SourceReader, StaticSource};
pub use transform::*;
pub use work_item::WorkItem;
