use std::collections::BTreeSet;
use std::collections::HashMap;

use super::Node;
use super::NodeId;

/// An ordered pair meaning "`from` depends on `to`": `from` references a
/// value exported by `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

/// DAG storage: an ID-keyed node map plus bidirectional edge sets.
/// Multiple edges between the same pair collapse to one.
///
/// The graph itself performs no cycle checking; see [`super::validate`].
#[derive(Debug, Clone, Default)]
pub struct Graph<N> {
    nodes: HashMap<NodeId, N>,
    outgoing: HashMap<NodeId, BTreeSet<NodeId>>,
    incoming: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl<N: Node> Graph<N> {
    pub fn new() -> Self {
        Graph {
            nodes: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    /// Adds a node. Idempotent when the same instance is re-added; panics
    /// when a *different* node already holds the same ID, since a
    /// collision indicates a configuration bug upstream of the graph.
    pub fn add(
        &mut self,
        node: N,
    ) {
        let id = node.node_id().clone();
        if let Some(existing) = self.nodes.get(&id) {
            if !existing.same_node(&node) {
                panic!("graph already contains a different node with ID {id}");
            }
            return;
        }

        self.outgoing.entry(id.clone()).or_default();
        self.incoming.entry(id.clone()).or_default();
        self.nodes.insert(id, node);
    }

    /// Removes a node and purges all incident edges.
    pub fn remove(
        &mut self,
        id: &NodeId,
    ) -> Option<N> {
        let node = self.nodes.remove(id)?;

        for to in self.outgoing.remove(id).unwrap_or_default() {
            if let Some(set) = self.incoming.get_mut(&to) {
                set.remove(id);
            }
        }
        for from in self.incoming.remove(id).unwrap_or_default() {
            if let Some(set) = self.outgoing.get_mut(&from) {
                set.remove(id);
            }
        }

        Some(node)
    }

    /// Records "`from` depends on `to`". Both endpoints must already be
    /// in the graph.
    pub fn add_edge(
        &mut self,
        from: &NodeId,
        to: &NodeId,
    ) {
        assert!(self.nodes.contains_key(from), "edge source {from} not in graph");
        assert!(self.nodes.contains_key(to), "edge target {to} not in graph");

        self.outgoing.get_mut(from).unwrap().insert(to.clone());
        self.incoming.get_mut(to).unwrap().insert(from.clone());
    }

    pub fn remove_edge(
        &mut self,
        from: &NodeId,
        to: &NodeId,
    ) {
        if let Some(set) = self.outgoing.get_mut(from) {
            set.remove(to);
        }
        if let Some(set) = self.incoming.get_mut(to) {
            set.remove(from);
        }
    }

    pub fn get_by_id(
        &self,
        id: &NodeId,
    ) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn contains(
        &self,
        id: &NodeId,
    ) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (from, targets) in &self.outgoing {
            for to in targets {
                edges.push(Edge {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    /// Outgoing neighbors: the nodes `id` depends on.
    pub fn dependencies(
        &self,
        id: &NodeId,
    ) -> Vec<NodeId> {
        self.outgoing
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Incoming neighbors: the nodes depending on `id`.
    pub fn dependants(
        &self,
        id: &NodeId,
    ) -> Vec<NodeId> {
        self.incoming
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes with no dependants.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| self.incoming.get(*id).map(BTreeSet::is_empty).unwrap_or(true))
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Nodes with no dependencies.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| self.outgoing.get(*id).map(BTreeSet::is_empty).unwrap_or(true))
            .cloned()
            .collect();
        out.sort();
        out
    }
}
