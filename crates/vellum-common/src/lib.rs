use std::fmt::Display;

use serde::{Deserialize, Serialize};

mod error;

pub use error::{VellumError, VellumResult};

/// Arena index of a node in a document tree.
///
/// Ids are only meaningful within the tree that allocated them. A detached
/// node keeps its id until it is purged.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

/// Identifier of a mounted editing surface, assigned by the registry.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface:{}", self.0)
    }
}
