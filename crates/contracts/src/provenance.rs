//! ProvenanceNode - the etl header
//!
//! One step in a record's derivation history. Nodes chain through `source`
//! back to the originally ingested item (the root).

use serde::{Deserialize, Serialize};

/// Root id used when the ingested item had no id of its own (`None` in keys)
pub const UNKNOWN_ID: i64 = -1;

/// How a record was derived from its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    /// One-to-many: the `id`-th record split out of the source
    Join,
    /// Many-to-one: the `id`-th instance combining records of the source
    Aggregation,
}

/// Link from a derived node to its source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Derivation {
    /// Derivation type
    #[serde(rename = "type")]
    pub kind: ProvenanceKind,

    /// The node this one was derived from
    pub source: Box<ProvenanceNode>,
}

/// Provenance node
///
/// A root carries only `id`; every other node carries a typed `Derivation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvenanceNode {
    /// Position (JOIN) or instance number (AGGREGATION)
    pub id: i64,

    /// Absent for the root
    #[serde(flatten)]
    pub derivation: Option<Derivation>,
}

impl ProvenanceNode {
    /// Create root node
    pub fn root(id: i64) -> Self {
        Self {
            id,
            derivation: None,
        }
    }

    /// Create derived node
    pub fn derived(id: i64, kind: ProvenanceKind, source: ProvenanceNode) -> Self {
        Self {
            id,
            derivation: Some(Derivation {
                kind,
                source: Box::new(source),
            }),
        }
    }

    /// The `id`-th record split out of this one
    pub fn join(&self, id: i64) -> Self {
        Self::derived(id, ProvenanceKind::Join, self.clone())
    }

    /// The `id`-th aggregation instance over this one
    pub fn aggregate(&self, id: i64) -> Self {
        Self::derived(id, ProvenanceKind::Aggregation, self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.derivation.is_none()
    }

    /// Derivation type, `None` for the root
    pub fn kind(&self) -> Option<ProvenanceKind> {
        self.derivation.as_ref().map(|d| d.kind)
    }

    /// Source node, `None` for the root
    pub fn source(&self) -> Option<&ProvenanceNode> {
        self.derivation.as_ref().map(|d| d.source.as_ref())
    }

    /// Number of derivation steps back to the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self;
        while let Some(source) = node.source() {
            depth += 1;
            node = source;
        }
        depth
    }
}
