use std::collections::HashSet;

use super::Graph;
use super::Node;
use super::NodeId;

/// Transitive reduction: removes every direct edge whose target is also
/// reachable through another dependency. Reachability is preserved; the
/// minimal graph avoids redundant re-evaluation triggers and is cleaner
/// to display.
///
/// The graph must already be acyclic.
pub fn reduce<N: Node>(graph: &mut Graph<N>) {
    let ids: Vec<NodeId> = graph.node_ids().cloned().collect();

    for id in &ids {
        let direct: Vec<NodeId> = graph.dependencies(id);
        if direct.len() < 2 {
            continue;
        }

        let direct_set: HashSet<&NodeId> = direct.iter().collect();
        let mut redundant: Vec<NodeId> = Vec::new();

        // Anything reachable strictly below a direct dependency that is
        // itself a direct dependency is covered by the longer path.
        for dep in &direct {
            let mut stack: Vec<NodeId> = graph.dependencies(dep);
            let mut visited: HashSet<NodeId> = HashSet::new();

            while let Some(below) = stack.pop() {
                if !visited.insert(below.clone()) {
                    continue;
                }
                if direct_set.contains(&below) {
                    redundant.push(below.clone());
                }
                stack.extend(graph.dependencies(&below));
            }
        }

        for target in redundant {
            graph.remove_edge(id, &target);
        }
    }
}
