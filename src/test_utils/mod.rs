//! Shared fixtures for unit tests: lightweight graph nodes, a spy
//! component whose build/update/run activity can be inspected, and block
//! builders.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ast::Block;
use crate::ast::Body;
use crate::ast::Expr;
use crate::component::Arguments;
use crate::component::Component;
use crate::component::ComponentOptions;
use crate::component::OnExportsChange;
use crate::component::Registration;
use crate::component::Registry;
use crate::component::Stability;
use crate::dag::Graph;
use crate::dag::Node;
use crate::dag::NodeId;
use crate::errors::ComponentError;

/// A minimal graph vertex for dag tests.
#[derive(Clone)]
pub struct TestNode {
    id: NodeId,
    identity: Arc<()>,
}

impl TestNode {
    pub fn new(id: &str) -> Self {
        TestNode {
            id: NodeId::parse(id),
            identity: Arc::new(()),
        }
    }
}

impl Node for TestNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn same_node(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity)
    }
}

/// Builds a graph with one TestNode per distinct name and one edge per
/// `(from, to)` pair.
pub fn graph_from_edges(edges: &[(&str, &str)]) -> Graph<TestNode> {
    let mut graph = Graph::new();
    for (from, to) in edges {
        for name in [from, to] {
            let id = NodeId::parse(name);
            if !graph.contains(&id) {
                graph.add(TestNode::new(name));
            }
        }
        graph.add_edge(&NodeId::parse(from), &NodeId::parse(to));
    }
    graph
}

/// Shared spy state across every component instance built from one
/// [`TestControl::registration`]. Instances are keyed by their global ID.
#[derive(Default)]
pub struct TestControl {
    pub builds: AtomicUsize,
    pub updates: AtomicUsize,
    pub runs: AtomicUsize,
    pub fail_build: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_run: AtomicBool,
    callbacks: Mutex<HashMap<String, OnExportsChange>>,
    last_args: Mutex<HashMap<String, Value>>,
}

impl TestControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn registration(
        self: &Arc<Self>,
        name: &'static str,
    ) -> Registration {
        let control = Arc::clone(self);
        Registration {
            name,
            stability: Stability::Stable,
            default_args: json!({}),
            default_exports: Some(json!({})),
            build: Arc::new(move |opts, args| {
                if control.fail_build.load(Ordering::SeqCst) {
                    return Err(ComponentError::msg("build failed by test control"));
                }
                control.builds.fetch_add(1, Ordering::SeqCst);
                control
                    .callbacks
                    .lock()
                    .insert(opts.id.clone(), Arc::clone(&opts.on_state_change));
                control.last_args.lock().insert(opts.id.clone(), args);
                Ok(Arc::new(TestComponent {
                    id: opts.id,
                    control: Arc::clone(&control),
                }) as Arc<dyn Component>)
            }),
        }
    }

    /// Publishes exports on behalf of the instance with the given global
    /// ID, as if the component's own run loop produced them.
    pub fn publish(
        &self,
        id: &str,
        exports: Value,
    ) {
        let callback = {
            let callbacks = self.callbacks.lock();
            callbacks.get(id).cloned()
        };
        callback.unwrap_or_else(|| panic!("no component instance built for {id:?}"))(exports);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn args_of(
        &self,
        id: &str,
    ) -> Option<Value> {
        self.last_args.lock().get(id).cloned()
    }
}

/// The spy component: runs until cancelled, records updates.
pub struct TestComponent {
    id: String,
    control: Arc<TestControl>,
}

impl TestComponent {
    pub fn new(
        opts: ComponentOptions,
        args: Arguments,
    ) -> Self {
        let control = TestControl::new();
        control
            .callbacks
            .lock()
            .insert(opts.id.clone(), Arc::clone(&opts.on_state_change));
        control.last_args.lock().insert(opts.id.clone(), args);
        TestComponent {
            id: opts.id,
            control,
        }
    }
}

#[async_trait]
impl Component for TestComponent {
    async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), ComponentError> {
        self.control.runs.fetch_add(1, Ordering::SeqCst);
        if self.control.fail_run.load(Ordering::SeqCst) {
            return Err(ComponentError::msg("run failed by test control"));
        }
        shutdown.cancelled().await;
        Ok(())
    }

    async fn update(
        &self,
        args: Arguments,
    ) -> std::result::Result<(), ComponentError> {
        if self.control.fail_update.load(Ordering::SeqCst) {
            return Err(ComponentError::msg("update failed by test control"));
        }
        self.control.updates.fetch_add(1, Ordering::SeqCst);
        self.control.last_args.lock().insert(self.id.clone(), args);
        Ok(())
    }
}

/// A registry with a single spy component type registered under `name`.
pub fn registry_with(
    control: &Arc<TestControl>,
    name: &'static str,
) -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register(control.registration(name));
    Arc::new(registry)
}

/// A block `<name> "<label>"` whose body is built from attribute pairs.
pub fn block(
    name: &str,
    label: Option<&str>,
    attrs: &[(&str, Expr)],
) -> Block {
    let mut body = Body::new();
    for (attr, expr) in attrs {
        body = body.with_attr(*attr, expr.clone());
    }
    Block::new(name.split('.').collect::<Vec<_>>(), label, body)
}
