use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::Block;
use crate::ast::Body;
use crate::component::least_healthy;
use crate::component::Exports;
use crate::component::Health;
use crate::component::HealthType;
use crate::component::Module;
use crate::component::ModuleController;
use crate::component::OnExportsChange;
use crate::dag::NodeId;
use crate::errors::ConfigError;
use crate::errors::EvalError;
use crate::errors::RunError;
use crate::eval::Evaluator;
use crate::eval::Scope;

use super::CustomComponentRegistry;
use super::NodeGlobals;
use super::NotifyFn;

pub const DECLARE_BLOCK: &str = "declare";

/// A template definition. Declare nodes are inert during evaluation;
/// their body is registered in the [`CustomComponentRegistry`] during the
/// apply pass so custom nodes can stamp it out.
pub struct DeclareNode {
    id: NodeId,
    label: String,
    block: Mutex<Block>,
}

impl DeclareNode {
    pub fn new(block: Block) -> Result<Arc<Self>, ConfigError> {
        let label = match &block.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => {
                return Err(ConfigError::MissingLabel {
                    name: DECLARE_BLOCK.to_string(),
                })
            }
        };
        if label == DECLARE_BLOCK || !is_valid_identifier(&label) {
            return Err(ConfigError::InvalidDeclareLabel(label));
        }

        Ok(Arc::new(DeclareNode {
            id: NodeId::from_block(&block),
            label,
            block: Mutex::new(block),
        }))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block(&self) -> Block {
        self.block.lock().clone()
    }

    /// The template content custom nodes instantiate.
    pub fn template_body(&self) -> Body {
        self.block.lock().body.clone()
    }

    pub fn update_block(
        &self,
        block: Block,
    ) {
        assert_eq!(
            NodeId::from_block(&block),
            self.id,
            "update_block called with a block for a different node ID",
        );
        *self.block.lock() = block;
    }
}

/// An instance of a declare template.
///
/// Evaluation resolves the template through the registry chain and feeds
/// the decoded arguments into a nested module, reloading the module body
/// so template redefinitions take effect on the next evaluation. The
/// module's exports become this node's exports.
pub struct CustomNode {
    id: NodeId,
    global_id: String,
    template_name: String,
    registry: Arc<CustomComponentRegistry>,
    module_controller: Arc<dyn ModuleController>,
    notify: NotifyFn,
    on_exports: OnExportsChange,

    state: Mutex<CustomState>,
    exports: RwLock<Value>,
    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
}

struct CustomState {
    block: Block,
    evaluator: Evaluator,
    args: Option<Value>,
    module: Option<Arc<dyn Module>>,
}

impl CustomNode {
    pub fn new(
        block: Block,
        registry: Arc<CustomComponentRegistry>,
        globals: NodeGlobals,
    ) -> Arc<Self> {
        let id = NodeId::from_block(&block);
        let global_id = globals.global_id(&id);
        let template_name = block.block_name();

        Arc::new_cyclic(|weak: &Weak<CustomNode>| {
            let exports_weak = Weak::clone(weak);
            let on_exports: OnExportsChange = Arc::new(move |exports| {
                if let Some(node) = exports_weak.upgrade() {
                    node.set_exports(exports);
                }
            });

            CustomNode {
                id,
                global_id,
                template_name,
                registry,
                module_controller: Arc::clone(&globals.module_controller),
                notify: Arc::clone(&globals.notify),
                on_exports,
                state: Mutex::new(CustomState {
                    evaluator: Evaluator::new(block.body.clone()),
                    block,
                    args: None,
                    module: None,
                }),
                exports: RwLock::new(Value::Object(Map::new())),
                eval_health: Mutex::new(Health::unknown("node created")),
                run_health: Mutex::new(Health::unknown("node created")),
            }
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn block(&self) -> Block {
        self.state.lock().block.clone()
    }

    pub fn update_block(
        &self,
        block: Block,
    ) {
        assert_eq!(
            NodeId::from_block(&block),
            self.id,
            "update_block called with a block for a different node ID",
        );

        let mut state = self.state.lock();
        state.evaluator = Evaluator::new(block.body.clone());
        state.block = block;
    }

    /// Decodes arguments, resolves the template, and reloads the nested
    /// module body. The module reconciles internally, so reloading with
    /// unchanged content is cheap and template redefinitions are always
    /// picked up.
    pub async fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let result = self.evaluate_inner(scope).await;

        match &result {
            Ok(()) => *self.eval_health.lock() = Health::new(HealthType::Healthy, "node evaluated"),
            Err(err) => {
                *self.eval_health.lock() = Health::new(HealthType::Unhealthy, err.to_string())
            }
        }
        result
    }

    async fn evaluate_inner(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let evaluator = self.state.lock().evaluator.clone();
        let args = evaluator.evaluate(scope)?;
        let args_map = match &args {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let template =
            self.registry
                .get(&self.template_name)
                .ok_or_else(|| EvalError::MissingTemplate {
                    name: self.template_name.clone(),
                })?;

        let module = {
            let existing = self.state.lock().module.clone();
            match existing {
                Some(module) => module,
                None => {
                    let module = self
                        .module_controller
                        .new_module(&self.global_id, Arc::clone(&self.on_exports))
                        .map_err(|err| EvalError::NewModule(err.to_string()))?;
                    debug!(node_id = %self.id, "created module for custom component");
                    self.state.lock().module = Some(Arc::clone(&module));
                    module
                }
            }
        };

        let template_scope = CustomComponentRegistry::new(Some(template.scope));
        module
            .load_body(template.body, args_map, template_scope)
            .await
            .map_err(|err| EvalError::LoadModule(err.to_string()))?;

        self.state.lock().args = Some(args);
        Ok(())
    }

    /// Runs the nested module until shutdown. Requires a successful
    /// evaluation first.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<(), RunError> {
        let module = self
            .state
            .lock()
            .module
            .clone()
            .ok_or(RunError::Unevaluated)?;

        *self.run_health.lock() = Health::new(HealthType::Healthy, "started module");

        match module.run(shutdown).await {
            Ok(()) => {
                *self.run_health.lock() = Health::new(HealthType::Exited, "module shut down");
                Ok(())
            }
            Err(err) => {
                *self.run_health.lock() =
                    Health::new(HealthType::Exited, format!("module exited: {err}"));
                Err(RunError::Exited(err))
            }
        }
    }

    /// Records exports published by the nested module's export nodes.
    fn set_exports(
        &self,
        exports: Exports,
    ) {
        let changed = {
            let mut current = self.exports.write();
            if *current == exports {
                false
            } else {
                *current = exports;
                true
            }
        };

        if changed {
            (self.notify)(self.id.clone());
        }
    }

    pub fn exports(&self) -> Value {
        self.exports.read().clone()
    }

    pub fn arguments(&self) -> Value {
        self.state
            .lock()
            .args
            .clone()
            .unwrap_or(Value::Object(Map::new()))
    }

    pub fn current_health(&self) -> Health {
        let run = self.run_health.lock().clone();
        let eval = self.eval_health.lock().clone();
        least_healthy(&run, std::iter::once(&eval)).clone()
    }
}

pub(crate) fn is_valid_identifier(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
