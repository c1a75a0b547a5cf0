use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ast::Block;
use crate::component::GetServiceData;
use crate::component::Health;
use crate::component::ModuleController;
use crate::dag::Node;
use crate::dag::NodeId;
use crate::errors::EvalError;
use crate::errors::RunError;
use crate::eval::Scope;

use super::BuiltinNode;
use super::ConfigNode;
use super::CustomNode;
use super::DeclareNode;

/// Callback a node uses to tell the controller its exports changed; the
/// controller enqueues the node for dependant re-evaluation.
pub type NotifyFn = Arc<dyn Fn(NodeId) + Send + Sync>;

/// Ambient data shared by every node one loader creates.
#[derive(Clone)]
pub struct NodeGlobals {
    /// ID of the owning controller; empty for the root controller.
    /// Joined with node IDs to form globally unique keys.
    pub controller_id: String,
    pub notify: NotifyFn,
    pub get_service_data: GetServiceData,
    pub module_controller: Arc<dyn ModuleController>,
}

impl NodeGlobals {
    /// The globally unique string key for a node under this controller.
    pub fn global_id(
        &self,
        node_id: &NodeId,
    ) -> String {
        if self.controller_id.is_empty() {
            node_id.to_string()
        } else {
            format!("{}.{node_id}", self.controller_id)
        }
    }
}

/// Every vertex the controller graph can hold. Cloning is cheap; clones
/// share the underlying node.
#[derive(Clone)]
pub enum AnyNode {
    /// A registered component type managing a long-running unit.
    Builtin(Arc<BuiltinNode>),
    /// An instance of a declare template, driving a nested module.
    Custom(Arc<CustomNode>),
    /// A template definition; holds a body for custom nodes to stamp out.
    Declare(Arc<DeclareNode>),
    /// A controller-owned singleton (logging, tracing, argument, export,
    /// import).
    Config(Arc<ConfigNode>),
}

impl AnyNode {
    /// The most recently applied block for this node.
    pub fn block(&self) -> Block {
        match self {
            AnyNode::Builtin(n) => n.block(),
            AnyNode::Custom(n) => n.block(),
            AnyNode::Declare(n) => n.block(),
            AnyNode::Config(n) => n.block(),
        }
    }

    /// Replaces the node's block in place, preserving node identity.
    /// Panics when the new block computes to a different node ID.
    pub fn update_block(
        &self,
        block: Block,
    ) {
        match self {
            AnyNode::Builtin(n) => n.update_block(block),
            AnyNode::Custom(n) => n.update_block(block),
            AnyNode::Declare(n) => n.update_block(block),
            AnyNode::Config(n) => n.update_block(block),
        }
    }

    /// Re-evaluates the node against the scope. Declare nodes are inert;
    /// everything else decodes its block body and reacts to the result.
    pub async fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        match self {
            AnyNode::Builtin(n) => n.evaluate(scope).await,
            AnyNode::Custom(n) => n.evaluate(scope).await,
            AnyNode::Declare(_) => Ok(()),
            AnyNode::Config(n) => n.evaluate(scope),
        }
    }

    /// Whether the scheduler should keep a running task for this node.
    pub fn is_runnable(&self) -> bool {
        matches!(self, AnyNode::Builtin(_) | AnyNode::Custom(_))
    }

    /// Runs the node until shutdown. Only runnable nodes ever get here;
    /// the rest return immediately.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<(), RunError> {
        match self {
            AnyNode::Builtin(n) => n.run(shutdown).await,
            AnyNode::Custom(n) => n.run(shutdown).await,
            AnyNode::Declare(_) | AnyNode::Config(_) => Ok(()),
        }
    }

    pub fn health(&self) -> Option<Health> {
        match self {
            AnyNode::Builtin(n) => Some(n.current_health()),
            AnyNode::Custom(n) => Some(n.current_health()),
            AnyNode::Declare(_) | AnyNode::Config(_) => None,
        }
    }
}

impl Node for AnyNode {
    fn node_id(&self) -> &NodeId {
        match self {
            AnyNode::Builtin(n) => n.node_id(),
            AnyNode::Custom(n) => n.node_id(),
            AnyNode::Declare(n) => n.node_id(),
            AnyNode::Config(n) => n.node_id(),
        }
    }

    fn same_node(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (AnyNode::Builtin(a), AnyNode::Builtin(b)) => Arc::ptr_eq(a, b),
            (AnyNode::Custom(a), AnyNode::Custom(b)) => Arc::ptr_eq(a, b),
            (AnyNode::Declare(a), AnyNode::Declare(b)) => Arc::ptr_eq(a, b),
            (AnyNode::Config(a), AnyNode::Config(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for AnyNode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let kind = match self {
            AnyNode::Builtin(_) => "builtin",
            AnyNode::Custom(_) => "custom",
            AnyNode::Declare(_) => "declare",
            AnyNode::Config(_) => "config",
        };
        write!(f, "AnyNode::{kind}({})", self.node_id())
    }
}
