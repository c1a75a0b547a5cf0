//! The controller loop.
//!
//! A [`Runtime`] owns one [`crate::controller::Loader`] plus its queue and
//! scheduler and drives the reactive cycle: drain the update queue, fan
//! dependants out to the worker pool, keep one task per runnable node.
//! Nested modules get their own `Runtime` sharing the root worker pool.

mod controller;
pub use controller::*;
