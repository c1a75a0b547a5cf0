use std::collections::HashMap;

use super::Graph;
use super::Node;
use super::NodeId;
use crate::errors::GraphError;

/// Validates that the graph is acyclic: any strongly connected component
/// with more than one member, or any self-loop, is reported as a cycle.
/// Topological evaluation is undefined in the presence of cycles, so the
/// loader must call this before committing a new graph.
pub fn validate<N: Node>(graph: &Graph<N>) -> Result<(), GraphError> {
    for id in graph.node_ids() {
        if graph.dependencies(id).contains(id) {
            return Err(GraphError::SelfLoop { id: id.clone() });
        }
    }

    for component in strongly_connected_components(graph) {
        if component.len() > 1 {
            let mut members: Vec<String> = component.iter().map(NodeId::to_string).collect();
            members.sort();
            return Err(GraphError::Cycle { members });
        }
    }

    Ok(())
}

/// Tarjan's algorithm over outgoing edges. Returns every strongly
/// connected component, singletons included.
pub fn strongly_connected_components<N: Node>(graph: &Graph<N>) -> Vec<Vec<NodeId>> {
    let mut state = TarjanState {
        graph,
        index: 0,
        indices: HashMap::new(),
        low_links: HashMap::new(),
        on_stack: HashMap::new(),
        stack: Vec::new(),
        components: Vec::new(),
    };

    let mut ids: Vec<NodeId> = graph.node_ids().cloned().collect();
    ids.sort();
    for id in ids {
        if !state.indices.contains_key(&id) {
            state.strong_connect(&id);
        }
    }

    state.components
}

struct TarjanState<'a, N> {
    graph: &'a Graph<N>,
    index: usize,
    indices: HashMap<NodeId, usize>,
    low_links: HashMap<NodeId, usize>,
    on_stack: HashMap<NodeId, bool>,
    stack: Vec<NodeId>,
    components: Vec<Vec<NodeId>>,
}

impl<N: Node> TarjanState<'_, N> {
    fn strong_connect(
        &mut self,
        id: &NodeId,
    ) {
        self.indices.insert(id.clone(), self.index);
        self.low_links.insert(id.clone(), self.index);
        self.index += 1;
        self.stack.push(id.clone());
        self.on_stack.insert(id.clone(), true);

        for dep in self.graph.dependencies(id) {
            if !self.indices.contains_key(&dep) {
                self.strong_connect(&dep);
                let dep_low = self.low_links[&dep];
                let entry = self.low_links.get_mut(id).unwrap();
                *entry = (*entry).min(dep_low);
            } else if self.on_stack.get(&dep).copied().unwrap_or(false) {
                let dep_index = self.indices[&dep];
                let entry = self.low_links.get_mut(id).unwrap();
                *entry = (*entry).min(dep_index);
            }
        }

        // Root of a component: pop the stack down to this node.
        if self.low_links[id] == self.indices[id] {
            let mut component = Vec::new();
            loop {
                let member = self.stack.pop().expect("tarjan stack underflow");
                self.on_stack.insert(member.clone(), false);
                let done = &member == id;
                component.push(member);
                if done {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
