//! Controller Error Hierarchy
//!
//! Defines error types for the reactive configuration controller,
//! categorized by where in the reconciliation pipeline they surface.

use std::time::Duration;

use tokio::task::JoinError;

use crate::dag::NodeId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Per-block configuration problems found while reconciling
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Structural graph problems which invalidate an entire apply pass
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Expression decoding and managed-component build/update failures
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Failures reported by a managed component itself
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// Worker pool submission failures
    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),

    /// Failures while running a node's long-lived task
    #[error(transparent)]
    Run(#[from] RunError),

    /// Settings loading/validation failures
    #[error(transparent)]
    Settings(#[from] config::ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Configuration errors are scoped to a single offending block. They are
/// collected into [`Diagnostics`] so that one bad block never aborts the
/// rest of a reconciliation pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("component {id} already declared")]
    DuplicateBlock { id: NodeId },

    #[error("unknown component type {name:?}")]
    UnknownComponent { name: String },

    #[error("component {name:?} is below the minimum stability level {minimum}")]
    BelowStability { name: String, minimum: &'static str },

    #[error("block {name:?} requires a label")]
    MissingLabel { name: String },

    #[error("{0:?} is not a valid label for a declare block")]
    InvalidDeclareLabel(String),

    #[error("{0:?} is not a valid label for an import block")]
    InvalidImportLabel(String),

    #[error("missing required argument {label:?} to module")]
    MissingModuleArgument { label: String },

    #[error("provided argument {label:?} is not defined by the module")]
    UnknownModuleArgument { label: String },

    #[error("{kind} blocks are not allowed inside a module")]
    NotAllowedInModule { kind: &'static str },

    #[error("{kind} blocks are only allowed inside a module")]
    OnlyAllowedInModule { kind: &'static str },
}

/// Structural errors invalidate the whole pending reconciliation; the
/// previously published graph stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },

    #[error("node {id} has a self-dependency")]
    SelfLoop { id: NodeId },
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("decoding attribute {attribute:?}: {message}")]
    Decode { attribute: String, message: String },

    #[error("unresolved reference {}", path.join("."))]
    UnresolvedReference { path: Vec<String> },

    #[error("building component: {0}")]
    Build(#[source] ComponentError),

    #[error("updating component: {0}")]
    Update(#[source] ComponentError),

    #[error("could not retrieve custom component template {name:?}")]
    MissingTemplate { name: String },

    #[error("import source {name:?}: {message}")]
    Import { name: String, message: String },

    #[error("creating module controller: {0}")]
    NewModule(String),

    #[error("loading module body: {0}")]
    LoadModule(String),
}

/// Errors surfaced by managed component implementations across the
/// component boundary.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ComponentError {
    pub fn msg(msg: impl Into<String>) -> Self {
        ComponentError::Message(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool queue is full")]
    QueueFull,

    #[error("worker pool is stopped")]
    Stopped,

    #[error("worker lane task failed: {0}")]
    LaneFailed(#[from] JoinError),

    #[error("submit retries exhausted after {0:?}")]
    RetryTimeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Returned when Run is called before a first successful evaluation.
    #[error("managed component not built")]
    Unevaluated,

    #[error("component exited with error: {0}")]
    Exited(#[source] ComponentError),
}

/// The severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// A single per-block problem reported during an apply pass.
#[derive(Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub node_id: Option<NodeId>,
    pub error: Error,
}

/// An ordered collection of per-block problems. An apply pass keeps going
/// after recording a diagnostic for an offending block; only structural
/// errors abort the pass.
#[derive(Debug, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node_id: Option<NodeId>, error: impl Into<Error>) {
        self.0.push(Diagnostic {
            severity: Severity::Error,
            node_id,
            error: error.into(),
        });
    }

    pub fn add_warn(&mut self, node_id: Option<NodeId>, error: impl Into<Error>) {
        self.0.push(Diagnostic {
            severity: Severity::Warn,
            node_id,
            error: error.into(),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match &d.node_id {
                Some(id) => write!(f, "{id}: {}", d.error)?,
                None => write!(f, "{}", d.error)?,
            }
        }
        Ok(())
    }
}
