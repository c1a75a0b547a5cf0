use std::fmt;
use std::sync::Arc;

use crate::ast::Block;

/// A node identity: an ordered sequence of name fragments whose
/// dot-joined string form is unique within a graph.
///
/// `remote.http.example` is `NodeId` with fragments
/// `["remote", "http", "example"]`. Cloning is cheap; the fragment
/// storage is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    fragments: Arc<[String]>,
}

impl NodeId {
    pub fn new(fragments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        NodeId {
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }

    /// The identity specified by a block: type fragments plus the
    /// optional label.
    pub fn from_block(block: &Block) -> Self {
        NodeId::new(block.id_fragments())
    }

    pub fn parse(joined: &str) -> Self {
        NodeId::new(joined.split('.'))
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn first_fragment(&self) -> &str {
        &self.fragments[0]
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Whether this ID's fragments are a prefix of the given path.
    pub fn is_prefix_of(
        &self,
        path: &[String],
    ) -> bool {
        path.len() >= self.fragments.len() && self.fragments.iter().eq(path[..self.fragments.len()].iter())
    }
}

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.fragments.join("."))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}
