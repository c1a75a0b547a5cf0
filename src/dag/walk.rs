use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use super::Graph;
use super::Node;
use super::NodeId;
use crate::errors::Result;

/// Plain depth-first traversal over outgoing edges from a start set,
/// visiting each node at most once. The visitor's error aborts the walk.
pub fn walk<N: Node>(
    graph: &Graph<N>,
    start: &[NodeId],
    mut visitor: impl FnMut(&N) -> Result<()>,
) -> Result<()> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = start.to_vec();

    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(node) = graph.get_by_id(&id) else {
            continue;
        };
        visitor(node)?;
        for dep in graph.dependencies(&id) {
            if !visited.contains(&dep) {
                stack.push(dep);
            }
        }
    }

    Ok(())
}

/// Depth-first traversal over incoming edges, used for propagating a
/// change to transitive dependants. The start nodes themselves are
/// visited first.
pub fn walk_incoming<N: Node>(
    graph: &Graph<N>,
    start: &[NodeId],
    mut visitor: impl FnMut(&N) -> Result<()>,
) -> Result<()> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<NodeId> = start.to_vec();

    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(node) = graph.get_by_id(&id) else {
            continue;
        };
        visitor(node)?;
        for dependant in graph.dependants(&id) {
            if !visited.contains(&dependant) {
                stack.push(dependant);
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm over the subgraph reachable (via incoming edges)
/// from the start set. A node becomes visitable only once all of its
/// dependencies within the traversal have been visited.
///
/// Starting from [`Graph::leaves`] yields a
/// dependencies-before-dependants order over the whole graph.
pub fn walk_topological<N: Node>(
    graph: &Graph<N>,
    start: &[NodeId],
    mut visitor: impl FnMut(&N) -> Result<()>,
) -> Result<()> {
    let mut queue: VecDeque<NodeId> = start
        .iter()
        .filter(|id| graph.contains(id))
        .cloned()
        .collect();
    let mut seen: HashSet<NodeId> = queue.iter().cloned().collect();

    // First pass: discover the reachable subgraph and count, per node,
    // how many of its dependencies are also part of the traversal.
    let mut discovered: Vec<NodeId> = Vec::new();
    while let Some(id) = queue.pop_front() {
        discovered.push(id.clone());
        for dependant in graph.dependants(&id) {
            if seen.insert(dependant.clone()) {
                queue.push_back(dependant);
            }
        }
    }

    let mut remaining: HashMap<NodeId, usize> = HashMap::new();
    let mut ready: VecDeque<NodeId> = VecDeque::new();

    for id in &discovered {
        let in_traversal = graph
            .dependencies(id)
            .into_iter()
            .filter(|dep| seen.contains(dep))
            .count();
        remaining.insert(id.clone(), in_traversal);
        if in_traversal == 0 {
            ready.push_back(id.clone());
        }
    }

    while let Some(id) = ready.pop_front() {
        let Some(node) = graph.get_by_id(&id) else {
            continue;
        };
        visitor(node)?;

        for dependant in graph.dependants(&id) {
            if let Some(count) = remaining.get_mut(&dependant) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependant);
                }
            }
        }
    }

    Ok(())
}
