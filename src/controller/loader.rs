use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::ast::Block;
use crate::ast::Body;
use crate::component::GetServiceData;
use crate::component::ModuleController;
use crate::component::OnExportsChange;
use crate::component::Registry;
use crate::config::BackoffPolicy;
use crate::dag::reduce;
use crate::dag::validate;
use crate::dag::walk_topological;
use crate::dag::Graph;
use crate::dag::Node;
use crate::dag::NodeId;
use crate::errors::ConfigError;
use crate::errors::Diagnostics;
use crate::errors::EvalError;
use crate::errors::WorkerPoolError;
use crate::eval::Scope;
use crate::metrics;
use crate::worker::WorkerPool;

use super::is_config_block;
use super::AnyNode;
use super::BuiltinNode;
use super::ConfigNode;
use super::CustomComponentRegistry;
use super::CustomNode;
use super::DeclareNode;
use super::ImportNode;
use super::ImportSource;
use super::NodeGlobals;
use super::NotifyFn;
use super::Queue;
use super::QueuedNode;
use super::ValueCache;
use super::DECLARE_BLOCK;
use super::IMPORT_BLOCK;
use super::LOGGING_BLOCK;
use super::TRACING_BLOCK;

/// Options for creating a [`Loader`].
pub struct LoaderOptions {
    /// Globally unique controller ID; empty for the root controller.
    pub controller_id: String,
    /// Component types available to this controller.
    pub registry: Arc<Registry>,
    /// Shared update queue nodes notify on export changes.
    pub queue: Arc<Queue>,
    /// Shared worker pool for dependant evaluation.
    pub worker_pool: Arc<WorkerPool>,
    /// Ambient service-data lookup handed to components.
    pub get_service_data: GetServiceData,
    /// Factory for nested modules, handed to components and custom nodes.
    pub module_controller: Arc<dyn ModuleController>,
    /// Upward export callback; present only when this loader backs a
    /// module.
    pub on_exports_change: Option<OnExportsChange>,
    /// Pre-parsed import content keyed by logical source name.
    pub import_source: ImportSource,
    /// Retry policy for full worker-pool queues.
    pub backoff: BackoffPolicy,
}

/// Per-apply inputs.
pub struct ApplyOptions {
    pub blocks: Vec<Block>,
    /// Module argument values provided by the enclosing controller.
    pub args: Map<String, Value>,
    /// Declare templates visible from the enclosing controller.
    pub custom_registry: Option<Arc<CustomComponentRegistry>>,
}

/// Reconciles block sets into a live node graph and keeps the graph's
/// values fresh as exports change.
///
/// `apply` performs the full pass: populate, wire, reduce, validate,
/// evaluate in dependency order, publish. `evaluate_dependants` performs
/// the incremental reactive pass, fanning dependants of updated nodes out
/// to the worker pool.
pub struct Loader {
    controller_id: String,
    registry: Arc<Registry>,
    worker_pool: Arc<WorkerPool>,
    on_exports_change: Option<OnExportsChange>,
    import_source: ImportSource,
    backoff: BackoffPolicy,
    globals: NodeGlobals,

    graph: ArcSwap<Graph<AnyNode>>,
    cache: Arc<ValueCache>,
    custom_registry: Arc<CustomComponentRegistry>,
    // Serializes apply passes (writer) against worker-lane evaluations
    // (readers): a lane must not write through to the cache or notify
    // module exports while apply is between clearing module exports and
    // publishing the new graph.
    eval_lock: tokio::sync::RwLock<()>,
    module_export_index: AtomicU64,
}

impl Loader {
    pub fn new(options: LoaderOptions) -> Self {
        let queue = options.queue;
        let notify: NotifyFn = Arc::new(move |node_id| queue.enqueue(node_id));

        let globals = NodeGlobals {
            controller_id: options.controller_id.clone(),
            notify,
            get_service_data: options.get_service_data,
            module_controller: options.module_controller,
        };

        Loader {
            controller_id: options.controller_id,
            registry: options.registry,
            worker_pool: options.worker_pool,
            on_exports_change: options.on_exports_change,
            import_source: options.import_source,
            backoff: options.backoff,
            globals,
            graph: ArcSwap::from_pointee(Graph::new()),
            cache: Arc::new(ValueCache::new()),
            custom_registry: CustomComponentRegistry::new(None),
            eval_lock: tokio::sync::RwLock::new(()),
            module_export_index: AtomicU64::new(0),
        }
    }

    /// Whether this loader backs a module rather than the root controller.
    fn is_module(&self) -> bool {
        self.on_exports_change.is_some() && !self.controller_id.is_empty()
    }

    /// The published graph snapshot.
    pub fn graph(&self) -> Arc<Graph<AnyNode>> {
        self.graph.load_full()
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    pub fn get_node(
        &self,
        id: &NodeId,
    ) -> Option<AnyNode> {
        self.graph.load().get_by_id(id).cloned()
    }

    /// Nodes the scheduler should keep running tasks for.
    pub fn runnables(&self) -> Vec<AnyNode> {
        self.graph
            .load()
            .nodes()
            .filter(|node| node.is_runnable())
            .cloned()
            .collect()
    }

    /// Performs a full reconciliation pass against the given blocks.
    ///
    /// Per-block configuration problems are recorded as diagnostics and
    /// the pass keeps going without the offending block. Duplicate block
    /// IDs and dependency cycles reject the whole pass: the previously
    /// published graph stays authoritative.
    pub async fn apply(
        &self,
        options: ApplyOptions,
    ) -> Diagnostics {
        let ApplyOptions {
            blocks,
            args,
            custom_registry,
        } = options;

        let _guard = self.eval_lock.write().await;
        let start = Instant::now();
        metrics::CONTROLLER_EVALUATION.set(1.0);

        for (label, value) in &args {
            self.cache.cache_module_argument(label, value.clone());
        }
        self.cache.sync_module_args(&args);
        self.custom_registry.set_parent(custom_registry);

        let mut diags = Diagnostics::new();
        let new_graph = match self.load_new_graph(&blocks, &args, &mut diags) {
            Some(graph) => graph,
            None => {
                metrics::CONTROLLER_EVALUATION.set(0.0);
                return diags;
            }
        };

        info!(controller_id = %self.controller_id, "starting complete graph evaluation");
        self.cache.clear_module_exports();

        let mut order = Vec::new();
        walk_topological(&new_graph, &new_graph.leaves(), |node| {
            order.push(node.clone());
            Ok(())
        })
        .expect("collecting the evaluation order cannot fail");

        for node in &order {
            let node_start = Instant::now();
            let scope = self.cache.build_scope();
            let result = node.evaluate(&scope).await;
            self.post_evaluate(node, result, &mut diags);

            metrics::NODE_EVALUATION_DURATION
                .with_label_values(&[&node.node_id().to_string()])
                .observe(node_start.elapsed().as_secs_f64());
        }

        let keep: HashSet<NodeId> = new_graph
            .nodes()
            .filter(|node| node.is_runnable())
            .map(|node| node.node_id().clone())
            .collect();

        self.graph.store(Arc::new(new_graph));
        self.cache.sync_ids(&keep);
        self.maybe_notify_module_exports();

        info!(
            controller_id = %self.controller_id,
            duration = ?start.elapsed(),
            "finished complete graph evaluation",
        );
        metrics::CONTROLLER_EVALUATION.set(0.0);
        diags
    }

    /// Builds and validates the working graph. Returns `None` when a
    /// structural problem (duplicate ID or cycle) invalidates the pass.
    fn load_new_graph(
        &self,
        blocks: &[Block],
        args: &Map<String, Value>,
        diags: &mut Diagnostics,
    ) -> Option<Graph<AnyNode>> {
        let previous = self.graph.load_full();
        let mut graph: Graph<AnyNode> = Graph::new();
        let mut structural_failure = false;

        let mut declare_blocks = Vec::new();
        let mut import_blocks = Vec::new();
        let mut config_blocks = Vec::new();
        let mut component_blocks = Vec::new();
        for block in blocks {
            let name = block.block_name();
            if name == DECLARE_BLOCK {
                declare_blocks.push(block.clone());
            } else if name == IMPORT_BLOCK {
                import_blocks.push(block.clone());
            } else if is_config_block(&name) {
                config_blocks.push(block.clone());
            } else {
                component_blocks.push(block.clone());
            }
        }

        // Imports and declares first: templates must be registered before
        // component blocks are classified.
        let mut import_namespaces = HashSet::new();
        for block in import_blocks {
            let id = NodeId::from_block(&block);
            if graph.contains(&id) {
                diags.add(Some(id.clone()), ConfigError::DuplicateBlock { id });
                structural_failure = true;
                continue;
            }

            let node = match self.reuse_or_create_import(&previous, block, diags) {
                Some(node) => node,
                None => continue,
            };
            if let ConfigNode::Import(import) = &*node {
                import_namespaces.insert(import.namespace().to_string());
                // Register eagerly with an empty scope; a failure here is
                // reported by the node's evaluation later in the pass.
                if let Err(err) = import.evaluate(&Scope::default()) {
                    debug!(node_id = %id, %err, "import registration deferred to evaluation");
                }
            }
            graph.add(AnyNode::Config(node));
        }
        self.custom_registry.sync_imports(&import_namespaces);

        let mut declare_names = HashSet::new();
        for block in declare_blocks {
            let id = NodeId::from_block(&block);
            if graph.contains(&id) {
                diags.add(Some(id.clone()), ConfigError::DuplicateBlock { id });
                structural_failure = true;
                continue;
            }

            let node = match self.reuse_or_create_declare(&previous, block, diags) {
                Some(node) => node,
                None => continue,
            };
            declare_names.insert(node.label().to_string());
            self.custom_registry
                .register_declare(node.label(), node.template_body());
            graph.add(AnyNode::Declare(node));
        }
        self.custom_registry.sync_declares(&declare_names);

        let mut argument_labels = HashSet::new();
        for block in config_blocks {
            let id = NodeId::from_block(&block);
            if graph.contains(&id) {
                diags.add(Some(id.clone()), ConfigError::DuplicateBlock { id });
                structural_failure = true;
                continue;
            }

            let node = match self.reuse_or_create_config(&previous, block, diags) {
                Some(node) => node,
                None => continue,
            };
            if let ConfigNode::Argument(argument) = &*node {
                argument_labels.insert(argument.label().to_string());
            }
            graph.add(AnyNode::Config(node));
        }

        if self.is_module() {
            for label in args.keys() {
                if !argument_labels.contains(label) {
                    diags.add(
                        None,
                        ConfigError::UnknownModuleArgument {
                            label: label.clone(),
                        },
                    );
                }
            }
        } else {
            // The root controller always carries logging and tracing
            // nodes so their defaults are evaluated and inspectable.
            let logging_id = NodeId::parse(LOGGING_BLOCK);
            if !graph.contains(&logging_id) {
                graph.add(AnyNode::Config(Arc::new(ConfigNode::default_logging())));
            }
            let tracing_id = NodeId::parse(TRACING_BLOCK);
            if !graph.contains(&tracing_id) {
                graph.add(AnyNode::Config(Arc::new(ConfigNode::default_tracing())));
            }
        }

        for block in component_blocks {
            let id = NodeId::from_block(&block);
            if graph.contains(&id) {
                diags.add(Some(id.clone()), ConfigError::DuplicateBlock { id });
                structural_failure = true;
                continue;
            }

            if let Some(node) = self.reuse_or_create_component(&previous, block, diags) {
                graph.add(node);
            }
        }

        self.wire_graph_edges(&mut graph);
        reduce(&mut graph);

        if let Err(err) = validate(&graph) {
            diags.add(None, err);
            return None;
        }
        if structural_failure {
            return None;
        }
        Some(graph)
    }

    fn reuse_or_create_declare(
        &self,
        previous: &Graph<AnyNode>,
        block: Block,
        diags: &mut Diagnostics,
    ) -> Option<Arc<DeclareNode>> {
        let id = NodeId::from_block(&block);
        if let Some(AnyNode::Declare(existing)) = previous.get_by_id(&id) {
            existing.update_block(block);
            return Some(Arc::clone(existing));
        }

        match DeclareNode::new(block) {
            Ok(node) => Some(node),
            Err(err) => {
                diags.add(Some(id), err);
                None
            }
        }
    }

    fn reuse_or_create_config(
        &self,
        previous: &Graph<AnyNode>,
        block: Block,
        diags: &mut Diagnostics,
    ) -> Option<Arc<ConfigNode>> {
        let id = NodeId::from_block(&block);
        if let Some(AnyNode::Config(existing)) = previous.get_by_id(&id) {
            existing.update_block(block);
            return Some(Arc::clone(existing));
        }

        match ConfigNode::new(block, self.is_module()) {
            Ok(node) => Some(Arc::new(node)),
            Err(err) => {
                diags.add(Some(id), err);
                None
            }
        }
    }

    fn reuse_or_create_import(
        &self,
        previous: &Graph<AnyNode>,
        block: Block,
        diags: &mut Diagnostics,
    ) -> Option<Arc<ConfigNode>> {
        let id = NodeId::from_block(&block);
        if let Some(AnyNode::Config(existing)) = previous.get_by_id(&id) {
            if matches!(&**existing, ConfigNode::Import(_)) {
                existing.update_block(block);
                return Some(Arc::clone(existing));
            }
        }

        let node = ImportNode::new(
            block,
            Arc::clone(&self.import_source),
            Arc::clone(&self.custom_registry),
        );
        match node {
            Ok(node) => Some(Arc::new(ConfigNode::Import(node))),
            Err(err) => {
                diags.add(Some(id), err);
                None
            }
        }
    }

    fn reuse_or_create_component(
        &self,
        previous: &Graph<AnyNode>,
        block: Block,
        diags: &mut Diagnostics,
    ) -> Option<AnyNode> {
        let id = NodeId::from_block(&block);
        let name = block.block_name();

        if self.registry.contains(&name) {
            if let Some(AnyNode::Builtin(existing)) = previous.get_by_id(&id) {
                existing.update_block(block);
                return Some(AnyNode::Builtin(Arc::clone(existing)));
            }

            let registration = match self.registry.get(&name) {
                Ok(registration) => registration.clone(),
                Err(err) => {
                    diags.add(Some(id), err);
                    return None;
                }
            };
            return Some(AnyNode::Builtin(BuiltinNode::new(
                block,
                registration,
                self.globals.clone(),
            )));
        }

        if self.custom_registry.contains(&name) {
            if let Some(AnyNode::Custom(existing)) = previous.get_by_id(&id) {
                existing.update_block(block);
                return Some(AnyNode::Custom(Arc::clone(existing)));
            }
            return Some(AnyNode::Custom(CustomNode::new(
                block,
                Arc::clone(&self.custom_registry),
                self.globals.clone(),
            )));
        }

        diags.add(Some(id), ConfigError::UnknownComponent { name });
        None
    }

    fn wire_graph_edges(
        &self,
        graph: &mut Graph<AnyNode>,
    ) {
        let nodes: Vec<AnyNode> = graph.nodes().cloned().collect();

        for node in &nodes {
            match node {
                AnyNode::Declare(declare) => {
                    // Declare nodes are wired to the templates their body
                    // instantiates so that mutually recursive declares
                    // show up as graph cycles.
                    for target in template_references(&declare.template_body(), graph) {
                        graph.add_edge(declare.node_id(), &target);
                    }
                    continue;
                }
                AnyNode::Custom(custom) => {
                    let declare_id = NodeId::new([DECLARE_BLOCK, custom.template_name()]);
                    if graph.contains(&declare_id) {
                        graph.add_edge(custom.node_id(), &declare_id);
                    } else if let Some(import_id) =
                        import_reference(custom.template_name(), graph)
                    {
                        graph.add_edge(custom.node_id(), &import_id);
                    }
                }
                _ => {}
            }

            for path in node.block().body.references() {
                if let Some(target) = longest_prefix_match(graph, &path) {
                    graph.add_edge(node.node_id(), &target);
                }
            }
        }
    }

    /// Fans the direct dependants of the updated nodes out to the worker
    /// pool. Dependants whose own exports change enqueue themselves,
    /// producing a concurrent breadth-first ripple through exactly the
    /// affected subgraph.
    ///
    /// Batching matters: enqueuing a whole batch before any evaluation
    /// starts lets rapid updates of shared dependencies collapse into
    /// fewer evaluations.
    pub async fn evaluate_dependants(
        self: &Arc<Self>,
        updated: Vec<QueuedNode>,
    ) {
        if updated.is_empty() {
            return;
        }
        metrics::CONTROLLER_EVALUATION.set(1.0);

        // The originator cache refresh below must not race an apply pass.
        let _guard = self.eval_lock.read().await;
        let graph = self.graph.load_full();

        let mut to_evaluate: IndexMap<NodeId, QueuedNode> = IndexMap::new();
        for queued in &updated {
            let Some(node) = graph.get_by_id(&queued.node_id) else {
                continue;
            };
            // Re-sync the cache with the originator's current exports.
            match node {
                AnyNode::Builtin(n) => self.cache.cache_exports(queued.node_id.clone(), n.exports()),
                AnyNode::Custom(n) => self.cache.cache_exports(queued.node_id.clone(), n.exports()),
                _ => {}
            }

            for dependant in graph.dependants(&queued.node_id) {
                to_evaluate.insert(dependant, queued.clone());
            }
        }

        for (dependant_id, originator) in to_evaluate {
            let Some(node) = graph.get_by_id(&dependant_id).cloned() else {
                continue;
            };
            self.submit_for_evaluation(node, originator).await;
        }

        metrics::EVALUATION_QUEUE_SIZE.set(self.worker_pool.queue_size() as i64);
        metrics::CONTROLLER_EVALUATION.set(0.0);
    }

    /// Submits one dependant evaluation, retrying with exponential
    /// backoff while the lane queue is full. A full queue means the
    /// controller cannot keep up; backing off gives workers a chance to
    /// drain it without log spam.
    async fn submit_for_evaluation(
        self: &Arc<Self>,
        node: AnyNode,
        originator: QueuedNode,
    ) {
        let key = self.globals.global_id(node.node_id());
        let mut delay = Duration::from_millis(self.backoff.base_delay_ms);
        let max_delay = Duration::from_millis(self.backoff.max_delay_ms);
        let mut retries = 0;

        loop {
            let loader = Arc::clone(self);
            let job_node = node.clone();
            let job_originator = originator.clone();
            let submitted = self.worker_pool.submit_with_key(&key, async move {
                loader.concurrent_evaluate(job_node, job_originator).await;
            });

            match submitted {
                Ok(()) => return,
                Err(WorkerPoolError::QueueFull) if retries < self.backoff.max_retries => {
                    error!(
                        node_id = %node.node_id(),
                        originator_id = %originator.node_id,
                        retries,
                        "failed to submit node for evaluation; the controller \
                         cannot keep up with evaluating components, will retry",
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                    retries += 1;
                }
                Err(err) => {
                    error!(
                        node_id = %node.node_id(),
                        %err,
                        "dropping node evaluation",
                    );
                    return;
                }
            }
        }
    }

    async fn concurrent_evaluate(
        self: Arc<Self>,
        node: AnyNode,
        originator: QueuedNode,
    ) {
        metrics::DEPENDENCY_WAIT_SECONDS.observe(originator.last_updated.elapsed().as_secs_f64());
        let start = Instant::now();

        let scope = self.cache.build_scope();
        let result = node.evaluate(&scope).await;

        // Cache write-through and the upward notification must not land
        // inside an in-flight apply pass.
        let _guard = self.eval_lock.read().await;
        let mut diags = Diagnostics::new();
        self.post_evaluate(&node, result, &mut diags);
        self.maybe_notify_module_exports();

        let node_id = node.node_id().to_string();
        metrics::NODE_EVALUATION_DURATION
            .with_label_values(&[&node_id])
            .observe(start.elapsed().as_secs_f64());
        debug!(node_id = %node_id, duration = ?start.elapsed(), "finished node evaluation");
    }

    /// Updates caches after a node evaluation and records any error.
    /// Arguments and exports are cached even on failure so the scope
    /// reflects the node's last known state.
    fn post_evaluate(
        &self,
        node: &AnyNode,
        result: Result<(), EvalError>,
        diags: &mut Diagnostics,
    ) {
        match node {
            AnyNode::Builtin(n) => {
                self.cache.cache_arguments(n.node_id().clone(), n.arguments());
                self.cache.cache_exports(n.node_id().clone(), n.exports());
            }
            AnyNode::Custom(n) => {
                self.cache.cache_arguments(n.node_id().clone(), n.arguments());
                self.cache.cache_exports(n.node_id().clone(), n.exports());
            }
            AnyNode::Config(config) => match &**config {
                ConfigNode::Argument(argument) => {
                    if self.cache.module_argument(argument.label()).is_none() {
                        if argument.optional() {
                            self.cache
                                .cache_module_argument(argument.label(), argument.default_value());
                        } else {
                            diags.add(
                                Some(node.node_id().clone()),
                                ConfigError::MissingModuleArgument {
                                    label: argument.label().to_string(),
                                },
                            );
                        }
                    }
                }
                ConfigNode::Export(export) => {
                    self.cache.cache_module_export(export.label(), export.value());
                }
                _ => {}
            },
            AnyNode::Declare(_) => {}
        }

        if let Err(err) = result {
            error!(node_id = %node.node_id(), %err, "failed to evaluate node");
            diags.add(Some(node.node_id().clone()), err);
        }
    }

    /// Pushes the module's exports upward when they changed since the
    /// last notification.
    fn maybe_notify_module_exports(&self) {
        let Some(on_exports_change) = &self.on_exports_change else {
            return;
        };
        let index = self.cache.export_change_index();
        if self.module_export_index.swap(index, Ordering::SeqCst) != index {
            on_exports_change(self.cache.module_exports());
        }
    }
}

/// The longest node ID that is a prefix of the reference path, if any.
/// Unmatched references are left for evaluation to report, since they may
/// resolve against scope entries that are not nodes.
fn longest_prefix_match(
    graph: &Graph<AnyNode>,
    path: &[String],
) -> Option<NodeId> {
    graph
        .node_ids()
        .filter(|id| id.is_prefix_of(path))
        .max_by_key(|id| id.len())
        .cloned()
}

/// IDs of declare nodes whose templates are instantiated anywhere inside
/// `body`, including nested blocks.
fn template_references(
    body: &Body,
    graph: &Graph<AnyNode>,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    collect_template_references(body, graph, &mut out);
    out
}

fn collect_template_references(
    body: &Body,
    graph: &Graph<AnyNode>,
    out: &mut Vec<NodeId>,
) {
    for block in &body.blocks {
        let declare_id = NodeId::new([DECLARE_BLOCK.to_string(), block.block_name()]);
        if graph.contains(&declare_id) && !out.contains(&declare_id) {
            out.push(declare_id);
        }
        if let Some(import_id) = import_reference(&block.block_name(), graph) {
            if !out.contains(&import_id) {
                out.push(import_id);
            }
        }
        collect_template_references(&block.body, graph, out);
    }
}

/// The import node backing a namespaced template name such as `math.add`,
/// if the graph has one.
fn import_reference(
    template_name: &str,
    graph: &Graph<AnyNode>,
) -> Option<NodeId> {
    let (namespace, _) = template_name.split_once('.')?;
    let import_id = NodeId::new([IMPORT_BLOCK, namespace]);
    graph.contains(&import_id).then_some(import_id)
}
