//! A reactive dependency-graph configuration controller.
//!
//! A declarative set of named, typed blocks becomes a live pipeline of
//! concurrently running components. Cross-references between blocks form
//! a DAG; configuration reloads reconcile against the running graph
//! preserving node identity; export changes ripple through exactly the
//! affected subgraph.

pub mod ast;
pub mod component;
pub mod config;
pub mod controller;
pub mod dag;
pub mod errors;
pub mod eval;
pub mod metrics;
pub mod runtime;
pub mod worker;

pub use component::*;
pub use config::*;
pub use errors::*;
pub use runtime::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
