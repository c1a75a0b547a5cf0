use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::ast::Block;
use crate::ast::Body;
use crate::ast::Expr;
use crate::component::ComponentOptions;
use crate::component::OnExportsChange;
use crate::component::Registry;
use crate::config::BackoffPolicy;
use crate::dag::NodeId;
use crate::errors::Diagnostics;
use crate::test_utils::block;
use crate::test_utils::TestControl;
use crate::worker::WorkerPool;

use super::ApplyOptions;
use super::ImportSource;
use super::Loader;
use super::LoaderOptions;
use super::Queue;

fn new_loader(registry: Arc<Registry>) -> (Arc<Loader>, Arc<Queue>) {
    build_loader(registry, String::new(), None, Arc::new(|_| None))
}

fn new_loader_with_imports(
    registry: Arc<Registry>,
    import_source: ImportSource,
) -> (Arc<Loader>, Arc<Queue>) {
    build_loader(registry, String::new(), None, import_source)
}

fn new_module_loader(
    registry: Arc<Registry>,
    controller_id: &str,
    on_exports_change: OnExportsChange,
) -> (Arc<Loader>, Arc<Queue>) {
    build_loader(
        registry,
        controller_id.to_string(),
        Some(on_exports_change),
        Arc::new(|_| None),
    )
}

fn build_loader(
    registry: Arc<Registry>,
    controller_id: String,
    on_exports_change: Option<OnExportsChange>,
    import_source: ImportSource,
) -> (Arc<Loader>, Arc<Queue>) {
    let detached = ComponentOptions::detached("loader-test");
    let queue = Arc::new(Queue::new());
    let loader = Arc::new(Loader::new(LoaderOptions {
        controller_id,
        registry,
        queue: Arc::clone(&queue),
        worker_pool: Arc::new(WorkerPool::new(2, 64)),
        get_service_data: detached.get_service_data,
        module_controller: detached.module_controller,
        on_exports_change,
        import_source,
        backoff: BackoffPolicy::default(),
    }));
    (loader, queue)
}

/// A source serving one library with a single declare template.
fn single_template_source(
    source_name: &'static str,
    template_label: &'static str,
) -> ImportSource {
    let content = Body::new().with_block(Block::new(
        ["declare"],
        Some(template_label),
        Body::new().with_block(block("export", Some("out"), &[("value", Expr::number(7u64))])),
    ));
    Arc::new(move |name| (name == source_name).then(|| content.clone()))
}

fn two_type_registry(control: &Arc<TestControl>) -> Arc<Registry> {
    let mut registry = Registry::new();
    registry.register(control.registration("source"));
    registry.register(control.registration("sink"));
    Arc::new(registry)
}

async fn apply(
    loader: &Arc<Loader>,
    blocks: Vec<Block>,
) -> Diagnostics {
    loader
        .apply(ApplyOptions {
            blocks,
            args: Map::new(),
            custom_registry: None,
        })
        .await
}

async fn wait_for_args(
    control: &Arc<TestControl>,
    id: &str,
    expected: Value,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if control.args_of(id) == Some(expected.clone()) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "args of {id} never became {expected}; last seen {:?}",
            control.args_of(id),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn apply_builds_the_graph_and_wires_reference_edges() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![
            block("source", Some("a"), &[("value", Expr::number(1u64))]),
            block("sink", Some("b"), &[("input", Expr::reference(["source", "a"]))]),
        ],
    )
    .await;

    assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");

    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(graph.contains(&NodeId::parse("sink.b")));
    assert!(graph.contains(&NodeId::parse("logging")));
    assert!(graph.contains(&NodeId::parse("tracing")));
    assert_eq!(
        graph.dependencies(&NodeId::parse("sink.b")),
        vec![NodeId::parse("source.a")],
    );

    // Dependencies evaluated first: the sink decoded the source's exports.
    assert_eq!(control.args_of("sink.b"), Some(json!({"input": {}})));
    assert_eq!(control.build_count(), 2);
}

#[tokio::test]
async fn reapply_reuses_nodes_and_updates_changed_blocks() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    apply(&loader, vec![block("source", Some("a"), &[("value", Expr::number(1u64))])]).await;
    assert_eq!(control.build_count(), 1);

    apply(&loader, vec![block("source", Some("a"), &[("value", Expr::number(2u64))])]).await;
    assert_eq!(control.build_count(), 1);
    assert_eq!(control.update_count(), 1);
    assert_eq!(control.args_of("source.a"), Some(json!({"value": 2})));

    // An identical block decodes to the same arguments and skips the
    // component update entirely.
    apply(&loader, vec![block("source", Some("a"), &[("value", Expr::number(2u64))])]).await;
    assert_eq!(control.update_count(), 1);
}

#[tokio::test]
async fn duplicate_ids_reject_the_whole_pass() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    apply(&loader, vec![block("source", Some("a"), &[])]).await;

    let diags = apply(
        &loader,
        vec![
            block("source", Some("a"), &[("value", Expr::number(1u64))]),
            block("source", Some("a"), &[("value", Expr::number(2u64))]),
            block("sink", Some("b"), &[]),
        ],
    )
    .await;

    assert!(diags.has_errors());
    // The previous graph stays authoritative: the sink never made it in.
    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(!graph.contains(&NodeId::parse("sink.b")));
}

#[tokio::test]
async fn cycles_reject_the_whole_pass() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    apply(&loader, vec![block("source", Some("a"), &[])]).await;

    let diags = apply(
        &loader,
        vec![
            block("sink", Some("x"), &[("input", Expr::reference(["sink", "y"]))]),
            block("sink", Some("y"), &[("input", Expr::reference(["sink", "x"]))]),
        ],
    )
    .await;

    assert!(diags.has_errors());
    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(!graph.contains(&NodeId::parse("sink.x")));
}

#[tokio::test]
async fn self_reference_rejects_the_whole_pass() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![block("sink", Some("x"), &[("input", Expr::reference(["sink", "x"]))])],
    )
    .await;

    assert!(diags.has_errors());
    assert!(!loader.graph().contains(&NodeId::parse("sink.x")));
}

#[tokio::test]
async fn unknown_component_is_a_diagnostic_not_a_rejection() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![
            block("bogus", Some("x"), &[]),
            block("source", Some("a"), &[]),
        ],
    )
    .await;

    assert!(diags.has_errors());
    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(!graph.contains(&NodeId::parse("bogus.x")));
}

#[tokio::test]
async fn unresolved_reference_is_a_diagnostic_not_a_rejection() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![block("sink", Some("b"), &[("input", Expr::reference(["nope", "x"]))])],
    )
    .await;

    assert!(diags.has_errors());
    assert!(loader.graph().contains(&NodeId::parse("sink.b")));
}

#[tokio::test]
async fn dependency_chains_evaluate_without_diagnostics() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![
            block("sink", Some("c"), &[("input", Expr::reference(["sink", "b"]))]),
            block("sink", Some("b"), &[("input", Expr::reference(["source", "a"]))]),
            block("source", Some("a"), &[]),
        ],
    )
    .await;

    assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
    assert_eq!(control.args_of("sink.b"), Some(json!({"input": {}})));
    assert_eq!(control.args_of("sink.c"), Some(json!({"input": {}})));
}

#[tokio::test(flavor = "multi_thread")]
async fn export_changes_ripple_to_direct_dependants_only() {
    let control = TestControl::new();
    let (loader, queue) = new_loader(two_type_registry(&control));

    apply(
        &loader,
        vec![
            block("source", Some("a"), &[]),
            block("sink", Some("b"), &[("input", Expr::reference(["source", "a"]))]),
            block("sink", Some("c"), &[("input", Expr::reference(["sink", "b"]))]),
        ],
    )
    .await;

    // The component publishes new exports; the node enqueues itself.
    control.publish("source.a", json!({"value": 42}));
    let batch = queue.dequeue_all();
    assert_eq!(batch.len(), 1);

    loader.evaluate_dependants(batch).await;
    wait_for_args(&control, "sink.b", json!({"input": {"value": 42}})).await;

    // The middle component's exports did not change, so the chain stops.
    assert_eq!(control.args_of("sink.c"), Some(json!({"input": {}})));
    assert!(queue.is_empty());

    // Once the middle node's exports do change, the ripple continues.
    control.publish("sink.b", json!({"out": 1}));
    loader.evaluate_dependants(queue.dequeue_all()).await;
    wait_for_args(&control, "sink.c", json!({"input": {"out": 1}})).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_publishes_of_equal_exports_do_not_enqueue() {
    let control = TestControl::new();
    let (loader, queue) = new_loader(two_type_registry(&control));

    apply(&loader, vec![block("source", Some("a"), &[])]).await;

    control.publish("source.a", json!({"value": 1}));
    control.publish("source.a", json!({"value": 1}));
    assert_eq!(queue.dequeue_all().len(), 1);

    control.publish("source.a", json!({"value": 2}));
    assert_eq!(queue.dequeue_all().len(), 1);
}

#[tokio::test]
async fn removed_nodes_leave_the_cache_and_graph() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    apply(
        &loader,
        vec![
            block("source", Some("a"), &[]),
            block("sink", Some("b"), &[("input", Expr::reference(["source", "a"]))]),
        ],
    )
    .await;

    apply(&loader, vec![block("source", Some("a"), &[])]).await;

    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(!graph.contains(&NodeId::parse("sink.b")));

    let scope = loader.cache().build_scope();
    assert!(scope.lookup(&["source".to_string(), "a".to_string()]).is_some());
    assert!(scope.lookup(&["sink".to_string(), "b".to_string()]).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn module_export_notifications_are_never_partial_during_reload() {
    let control = TestControl::new();
    let notified: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notified);
    let on_exports: OnExportsChange = Arc::new(move |exports| sink.lock().push(exports));
    let (loader, queue) = new_module_loader(two_type_registry(&control), "mod", on_exports);

    let blocks = || {
        vec![
            block("source", Some("a"), &[]),
            block(
                "export",
                Some("first"),
                &[("value", Expr::reference(["source", "a"]))],
            ),
            block("export", Some("second"), &[("value", Expr::number(1u64))]),
        ]
    };

    let diags = apply(&loader, blocks()).await;
    assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");

    // A publisher drives reactive evaluations while the loader keeps
    // reloading the same configuration. Every upward notification must
    // carry the full export set, never a half-cleared one.
    let publisher_control = Arc::clone(&control);
    let publisher_loader = Arc::clone(&loader);
    let publisher_queue = Arc::clone(&queue);
    let publisher = tokio::spawn(async move {
        for tick in 0..50u64 {
            publisher_control.publish("mod.source.a", json!({ "tick": tick }));
            let batch = publisher_queue.dequeue_all();
            publisher_loader.evaluate_dependants(batch).await;
            tokio::task::yield_now().await;
        }
    });

    for _ in 0..20 {
        let diags = apply(&loader, blocks()).await;
        assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
    }
    publisher.await.expect("publisher task should finish");

    // Let in-flight worker evaluations land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let notifications = notified.lock();
    assert!(!notifications.is_empty());
    for exports in notifications.iter() {
        let object = exports.as_object().expect("module exports are an object");
        assert!(
            object.contains_key("first") && object.contains_key("second"),
            "partial module exports published: {exports}",
        );
    }
}

#[tokio::test]
async fn import_blocks_register_templates_without_diagnostics() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader_with_imports(
        two_type_registry(&control),
        single_template_source("mathlib", "adder"),
    );

    let diags = apply(
        &loader,
        vec![block("import", Some("math"), &[("source", Expr::string("mathlib"))])],
    )
    .await;

    assert!(!diags.has_errors(), "unexpected diagnostics: {diags}");
    assert!(loader.graph().contains(&NodeId::parse("import.math")));
}

#[tokio::test]
async fn custom_instances_depend_on_their_import() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader_with_imports(
        two_type_registry(&control),
        single_template_source("mathlib", "adder"),
    );

    apply(
        &loader,
        vec![
            block("import", Some("math"), &[("source", Expr::string("mathlib"))]),
            block("math.adder", Some("a"), &[]),
        ],
    )
    .await;

    // The instance was recognized as a custom node backed by the imported
    // template, and its edge guarantees templates register before it
    // evaluates.
    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("math.adder.a")));
    assert_eq!(
        graph.dependencies(&NodeId::parse("math.adder.a")),
        vec![NodeId::parse("import.math")],
    );
}

#[tokio::test]
async fn missing_import_content_is_a_diagnostic_not_a_rejection() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    let diags = apply(
        &loader,
        vec![
            block("import", Some("math"), &[("source", Expr::string("nowhere"))]),
            block("source", Some("a"), &[]),
        ],
    )
    .await;

    assert!(diags.has_errors());
    // The rest of the configuration still loaded.
    let graph = loader.graph();
    assert!(graph.contains(&NodeId::parse("source.a")));
    assert!(graph.contains(&NodeId::parse("import.math")));
}

#[tokio::test]
async fn import_labels_must_be_identifiers() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader_with_imports(
        two_type_registry(&control),
        single_template_source("mathlib", "adder"),
    );

    let diags = apply(
        &loader,
        vec![block("import", Some("no.dots"), &[("source", Expr::string("mathlib"))])],
    )
    .await;

    assert!(diags.has_errors());
    assert!(!loader.graph().contains(&NodeId::parse("import.no.dots")));
}

#[tokio::test]
async fn runnables_excludes_config_singletons() {
    let control = TestControl::new();
    let (loader, _queue) = new_loader(two_type_registry(&control));

    apply(
        &loader,
        vec![
            block("source", Some("a"), &[]),
            block("sink", Some("b"), &[]),
        ],
    )
    .await;

    assert_eq!(loader.runnables().len(), 2);
    // Config singletons are still in the graph.
    assert_eq!(loader.graph().node_count(), 4);
}
