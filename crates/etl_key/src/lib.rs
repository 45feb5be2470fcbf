//! # Etl Key
//!
//! Provenance key codec. Every record carries a provenance tree in its etl
//! header; this crate turns that tree into the compact key the record is
//! stored under, and back.
//!
//! ```
//! use contracts::ProvenanceNode;
//!
//! let node = ProvenanceNode::root(2).aggregate(1).join(3);
//! assert_eq!(etl_key::encode(&node), "(1:2).3");
//! assert_eq!(etl_key::decode("(1:2).3.json").unwrap(), node);
//! ```

mod codec;
mod error;

pub use codec::{child_id, decode, derives_from, encode, parent_key, strip_extension, validate};
pub use error::KeyError;
