//! The managed-unit contract.
//!
//! Components are the business logic that plugs into the controller: an
//! HTTP exporter, a file watcher, anything with a long-lived run loop.
//! The controller only sees this trait surface; concrete component
//! implementations live outside the core.

mod health;
mod registry;
pub use health::*;
pub use registry::*;

#[cfg(test)]
mod component_test;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ast::Body;
use crate::controller::CustomComponentRegistry;
use crate::errors::ComponentError;
use crate::errors::Error;

/// Decoded input configuration of a component.
pub type Arguments = Value;

/// Published output of a component, referenceable by other blocks.
pub type Exports = Value;

/// Callback a component invokes, any number of times from any thread,
/// with its full exports value.
pub type OnExportsChange = Arc<dyn Fn(Exports) + Send + Sync>;

/// Lookup from a logical service name to an opaque data value, for
/// components that need ambient infrastructure without a dependency edge.
pub type GetServiceData =
    Arc<dyn Fn(&str) -> std::result::Result<Value, ComponentError> + Send + Sync>;

/// A managed unit. `run` blocks until shutdown is requested; `update`
/// applies new decoded arguments to a live instance.
///
/// Health and debug info are optional capabilities: implementations that
/// expose them override the defaulted methods.
#[async_trait]
pub trait Component: Send + Sync {
    async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), ComponentError>;

    async fn update(
        &self,
        args: Arguments,
    ) -> std::result::Result<(), ComponentError>;

    fn current_health(&self) -> Option<Health> {
        None
    }

    fn debug_info(&self) -> Option<Value> {
        None
    }
}

/// Per-instance options handed to a component's build function.
#[derive(Clone)]
pub struct ComponentOptions {
    /// Globally unique component ID (controller ID joined with the node ID).
    pub id: String,
    /// Informs the controller that the component has new exports.
    pub on_state_change: OnExportsChange,
    /// Ambient service-data lookup.
    pub get_service_data: GetServiceData,
    /// Creates nested, independently-scheduled sub-graphs.
    pub module_controller: Arc<dyn ModuleController>,
}

impl ComponentOptions {
    /// Options wired to no-op callbacks, for tests and detached builds.
    pub fn detached(id: impl Into<String>) -> Self {
        ComponentOptions {
            id: id.into(),
            on_state_change: Arc::new(|_| {}),
            get_service_data: Arc::new(|name| {
                Err(ComponentError::msg(format!("no service data for {name:?}")))
            }),
            module_controller: Arc::new(NoOpModuleController),
        }
    }
}

/// Creates nested modules: independently lifecycled sub-graphs with their
/// own export callback.
pub trait ModuleController: Send + Sync {
    fn new_module(
        &self,
        id: &str,
        on_exports: OnExportsChange,
    ) -> std::result::Result<Arc<dyn Module>, ComponentError>;

    fn module_ids(&self) -> Vec<String>;
}

/// A nested sub-graph driven by a custom component or a module-aware
/// builtin. `load_body` reconciles the module's configuration; `run`
/// drives its scheduler until shutdown.
#[async_trait]
pub trait Module: Send + Sync {
    async fn load_body(
        &self,
        body: Body,
        args: serde_json::Map<String, Value>,
        registry: Arc<CustomComponentRegistry>,
    ) -> std::result::Result<(), Error>;

    async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), ComponentError>;
}

struct NoOpModuleController;

impl ModuleController for NoOpModuleController {
    fn new_module(
        &self,
        _id: &str,
        _on_exports: OnExportsChange,
    ) -> std::result::Result<Arc<dyn Module>, ComponentError> {
        Err(ComponentError::msg("module creation is not supported here"))
    }

    fn module_ids(&self) -> Vec<String> {
        Vec::new()
    }
}
