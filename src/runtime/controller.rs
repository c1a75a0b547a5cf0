use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ast::Block;
use crate::ast::Body;
use crate::component::GetServiceData;
use crate::component::Module;
use crate::component::ModuleController;
use crate::component::OnExportsChange;
use crate::component::Registry;
use crate::config::RuntimeConfig;
use crate::controller::ApplyOptions;
use crate::controller::CustomComponentRegistry;
use crate::controller::ImportSource;
use crate::controller::Loader;
use crate::controller::LoaderOptions;
use crate::controller::Queue;
use crate::controller::Scheduler;
use crate::errors::ComponentError;
use crate::errors::Diagnostics;
use crate::errors::Error;
use crate::worker::WorkerPool;

/// Options for creating a root [`Runtime`].
pub struct RuntimeOptions {
    /// Component types available to this controller and its modules.
    pub registry: Arc<Registry>,
    /// Ambient service-data lookup handed to components.
    pub get_service_data: GetServiceData,
    /// Pre-parsed import content keyed by logical source name.
    pub import_source: ImportSource,
    pub config: RuntimeConfig,
}

impl RuntimeOptions {
    pub fn new(registry: Arc<Registry>) -> Self {
        RuntimeOptions {
            registry,
            get_service_data: Arc::new(|name| {
                Err(ComponentError::msg(format!("no service data for {name:?}")))
            }),
            import_source: Arc::new(|_| None),
            config: RuntimeConfig::default(),
        }
    }
}

/// One controller: a loader, its update queue, and a scheduler, driven by
/// [`Runtime::run`]. The root runtime owns the worker pool; module
/// runtimes share it.
pub struct Runtime {
    loader: Arc<Loader>,
    queue: Arc<Queue>,
    scheduler: Scheduler,
    worker_pool: Arc<WorkerPool>,
    owns_pool: bool,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Self {
        let worker_pool = Arc::new(WorkerPool::new(
            options.config.workers,
            options.config.queue_capacity,
        ));
        let module_ids = Arc::new(DashMap::new());

        Self::build(
            String::new(),
            options.registry,
            options.get_service_data,
            options.import_source,
            options.config,
            worker_pool,
            true,
            module_ids,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        controller_id: String,
        registry: Arc<Registry>,
        get_service_data: GetServiceData,
        import_source: ImportSource,
        config: RuntimeConfig,
        worker_pool: Arc<WorkerPool>,
        owns_pool: bool,
        module_ids: Arc<DashMap<String, ()>>,
        on_exports_change: Option<OnExportsChange>,
    ) -> Self {
        let queue = Arc::new(Queue::new());

        let module_controller = Arc::new(RuntimeModuleController {
            registry: Arc::clone(&registry),
            get_service_data: Arc::clone(&get_service_data),
            import_source: Arc::clone(&import_source),
            config: config.clone(),
            worker_pool: Arc::clone(&worker_pool),
            module_ids,
        });

        let loader = Arc::new(Loader::new(LoaderOptions {
            controller_id,
            registry,
            queue: Arc::clone(&queue),
            worker_pool: Arc::clone(&worker_pool),
            get_service_data,
            module_controller,
            on_exports_change,
            import_source,
            backoff: config.evaluation_retry,
        }));

        Runtime {
            loader,
            queue,
            scheduler: Scheduler::new(),
            worker_pool,
            owns_pool,
        }
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    /// Applies a new block set and synchronizes running tasks with the
    /// resulting graph. The scheduler is synchronized even when the apply
    /// reported diagnostics, since a partially-updated graph may still
    /// have gained or lost runnable nodes.
    pub async fn apply(
        &self,
        blocks: Vec<Block>,
    ) -> Diagnostics {
        self.apply_inner(blocks, Map::new(), None).await
    }

    async fn apply_inner(
        &self,
        blocks: Vec<Block>,
        args: Map<String, Value>,
        custom_registry: Option<Arc<CustomComponentRegistry>>,
    ) -> Diagnostics {
        let diags = self
            .loader
            .apply(ApplyOptions {
                blocks,
                args,
                custom_registry,
            })
            .await;

        self.scheduler.synchronize(self.loader.runnables()).await;
        diags
    }

    /// Drives the reactive cycle until shutdown: wait for the queue
    /// signal, drain the batch, re-evaluate dependants. On shutdown the
    /// scheduler is closed, and the worker pool stopped when owned.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) {
        info!("controller started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.queue.changed() => {
                    let batch = self.queue.dequeue_all();
                    if batch.is_empty() {
                        continue;
                    }
                    debug!(batch_size = batch.len(), "evaluating dependants of updated nodes");
                    self.loader.evaluate_dependants(batch).await;
                }
            }
        }

        self.scheduler.close().await;
        if self.owns_pool {
            if let Err(err) = self.worker_pool.stop().await {
                warn!(%err, "failed to stop worker pool cleanly");
            }
        }
        info!("controller stopped");
    }
}

/// Creates module runtimes on behalf of custom nodes and module-aware
/// components. Module IDs are tracked in one map shared across the whole
/// controller tree, so collisions are caught wherever they happen.
struct RuntimeModuleController {
    registry: Arc<Registry>,
    get_service_data: GetServiceData,
    import_source: ImportSource,
    config: RuntimeConfig,
    worker_pool: Arc<WorkerPool>,
    module_ids: Arc<DashMap<String, ()>>,
}

impl ModuleController for RuntimeModuleController {
    fn new_module(
        &self,
        id: &str,
        on_exports: OnExportsChange,
    ) -> std::result::Result<Arc<dyn Module>, ComponentError> {
        match self.module_ids.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ComponentError::msg(format!(
                    "module ID {id:?} is already in use"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let runtime = Runtime::build(
            id.to_string(),
            Arc::clone(&self.registry),
            Arc::clone(&self.get_service_data),
            Arc::clone(&self.import_source),
            self.config.clone(),
            Arc::clone(&self.worker_pool),
            false,
            Arc::clone(&self.module_ids),
            Some(on_exports),
        );

        Ok(Arc::new(RuntimeModule {
            id: id.to_string(),
            runtime,
            module_ids: Arc::clone(&self.module_ids),
        }))
    }

    fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .module_ids
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

/// A nested sub-graph: its own runtime sharing the root worker pool.
struct RuntimeModule {
    id: String,
    runtime: Runtime,
    module_ids: Arc<DashMap<String, ()>>,
}

#[async_trait]
impl Module for RuntimeModule {
    async fn load_body(
        &self,
        body: Body,
        args: Map<String, Value>,
        registry: Arc<CustomComponentRegistry>,
    ) -> std::result::Result<(), Error> {
        let diags = self
            .runtime
            .apply_inner(body.blocks, args, Some(registry))
            .await;

        if diags.has_errors() {
            return Err(ComponentError::msg(format!(
                "loading module {:?}: {diags}",
                self.id,
            ))
            .into());
        }
        Ok(())
    }

    async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), ComponentError> {
        self.runtime.run(shutdown).await;
        Ok(())
    }
}

impl Drop for RuntimeModule {
    fn drop(&mut self) {
        self.module_ids.remove(&self.id);
    }
}
