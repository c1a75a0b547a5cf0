//! Graph reconciliation and node lifecycle.
//!
//! The [`Loader`] turns blocks into a DAG of nodes and evaluates them in
//! dependency order; the [`Scheduler`] keeps one task per runnable node;
//! the [`Queue`] collapses export-change notifications between controller
//! loop iterations; the [`ValueCache`] exposes cached exports as the
//! evaluation scope.

mod custom_registry;
mod loader;
mod node;
mod node_builtin;
mod node_config;
mod node_custom;
mod queue;
mod scheduler;
mod value_cache;

pub use custom_registry::*;
pub use loader::*;
pub use node::*;
pub use node_builtin::*;
pub use node_config::*;
pub use node_custom::*;
pub use queue::*;
pub use scheduler::*;
pub use value_cache::*;

#[cfg(test)]
mod loader_test;
