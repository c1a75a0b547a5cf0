use crate::dag::Graph;
use crate::dag::NodeId;
use crate::test_utils::graph_from_edges;
use crate::test_utils::TestNode;

fn id(s: &str) -> NodeId {
    NodeId::parse(s)
}

#[test]
fn test_add_and_get() {
    let mut g: Graph<TestNode> = Graph::new();
    g.add(TestNode::new("a.b"));

    assert!(g.contains(&id("a.b")));
    assert!(g.get_by_id(&id("a.b")).is_some());
    assert!(g.get_by_id(&id("a.c")).is_none());
    assert_eq!(g.node_count(), 1);
}

#[test]
fn test_add_same_node_is_idempotent() {
    let mut g: Graph<TestNode> = Graph::new();
    let n = TestNode::new("a");
    g.add(n.clone());
    g.add(n);
    assert_eq!(g.node_count(), 1);
}

#[test]
#[should_panic(expected = "different node with ID")]
fn test_add_id_collision_panics() {
    let mut g: Graph<TestNode> = Graph::new();
    g.add(TestNode::new("a"));
    g.add(TestNode::new("a"));
}

#[test]
fn test_remove_purges_incident_edges() {
    let mut g = graph_from_edges(&[("a", "b"), ("b", "c"), ("d", "b")]);

    g.remove(&id("b"));

    assert!(!g.contains(&id("b")));
    assert!(g.dependencies(&id("a")).is_empty());
    assert!(g.dependencies(&id("d")).is_empty());
    assert!(g.dependants(&id("c")).is_empty());
    assert_eq!(g.edge_count(), 0);
}

#[test]
fn test_duplicate_edges_collapse() {
    let mut g = graph_from_edges(&[("a", "b")]);
    g.add_edge(&id("a"), &id("b"));
    g.add_edge(&id("a"), &id("b"));

    assert_eq!(g.edge_count(), 1);
}

#[test]
fn test_dependencies_and_dependants() {
    let g = graph_from_edges(&[("a", "b"), ("a", "c"), ("d", "a")]);

    assert_eq!(g.dependencies(&id("a")), vec![id("b"), id("c")]);
    assert_eq!(g.dependants(&id("a")), vec![id("d")]);
}

#[test]
fn test_roots_and_leaves() {
    let g = graph_from_edges(&[("a", "b"), ("b", "c")]);

    assert_eq!(g.roots(), vec![id("a")]);
    assert_eq!(g.leaves(), vec![id("c")]);
}

#[test]
fn test_clone_shares_nodes_and_copies_edges() {
    let g = graph_from_edges(&[("a", "b")]);
    let mut copy = g.clone();

    copy.remove_edge(&id("a"), &id("b"));
    copy.add(TestNode::new("z"));

    // The original is untouched by mutations of the copy.
    assert_eq!(g.edge_count(), 1);
    assert!(!g.contains(&id("z")));

    // Node values themselves are shared instances.
    let original = g.get_by_id(&id("a")).unwrap();
    let cloned = copy.get_by_id(&id("a")).unwrap();
    assert!(crate::dag::Node::same_node(original, cloned));
}

#[test]
fn test_edges_sorted_and_counted() {
    let g = graph_from_edges(&[("b", "c"), ("a", "b")]);
    let edges = g.edges();

    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].from, id("a"));
    assert_eq!(edges[1].from, id("b"));
}

#[test]
fn test_node_id_prefix_matching() {
    let long = id("remote.http.example");
    let path: Vec<String> = vec![
        "remote".into(),
        "http".into(),
        "example".into(),
        "output".into(),
    ];

    assert!(long.is_prefix_of(&path));
    assert!(!id("remote.http.other").is_prefix_of(&path));
    assert!(!id("remote.http.example.output.deep").is_prefix_of(&path[..3].to_vec()));
}
