use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::ast::Block;
use crate::component::least_healthy;
use crate::component::Component;
use crate::component::ComponentOptions;
use crate::component::Exports;
use crate::component::Health;
use crate::component::HealthType;
use crate::component::Registration;
use crate::dag::NodeId;
use crate::errors::EvalError;
use crate::errors::RunError;
use crate::eval::Evaluator;
use crate::eval::Scope;

use super::NodeGlobals;
use super::NotifyFn;

/// A graph node wrapping a registered component type.
///
/// The managed component is built on the first successful evaluation and
/// updated on later ones; an evaluation whose decoded arguments equal the
/// previous ones skips the update entirely. Export publications that
/// repeat the current value are suppressed.
pub struct BuiltinNode {
    id: NodeId,
    global_id: String,
    registration: Registration,
    opts: ComponentOptions,
    notify: NotifyFn,

    state: Mutex<BuiltinState>,
    exports: RwLock<Value>,
    eval_health: Mutex<Health>,
    run_health: Mutex<Health>,
}

struct BuiltinState {
    block: Block,
    evaluator: Evaluator,
    args: Option<Value>,
    managed: Option<Arc<dyn Component>>,
}

impl BuiltinNode {
    pub fn new(
        block: Block,
        registration: Registration,
        globals: NodeGlobals,
    ) -> Arc<Self> {
        let id = NodeId::from_block(&block);
        let global_id = globals.global_id(&id);

        Arc::new_cyclic(|weak: &Weak<BuiltinNode>| {
            let exports_weak = Weak::clone(weak);
            let opts = ComponentOptions {
                id: global_id.clone(),
                on_state_change: Arc::new(move |exports| {
                    if let Some(node) = exports_weak.upgrade() {
                        node.set_exports(exports);
                    }
                }),
                get_service_data: Arc::clone(&globals.get_service_data),
                module_controller: Arc::clone(&globals.module_controller),
            };

            let initial_exports = registration
                .default_exports
                .clone()
                .unwrap_or(Value::Object(Map::new()));

            BuiltinNode {
                id,
                global_id,
                registration,
                opts,
                notify: Arc::clone(&globals.notify),
                state: Mutex::new(BuiltinState {
                    evaluator: Evaluator::new(block.body.clone()),
                    block,
                    args: None,
                    managed: None,
                }),
                exports: RwLock::new(initial_exports),
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

    pub fn block(&self) -> Block {
        self.state.lock().block.clone()
    }

    /// Replaces the node's block ahead of re-evaluation. Panics when the
    /// block computes to a different ID; the loader must only pair a node
    /// with blocks sharing its identity.
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

    /// Decodes arguments against the scope and applies them to the
    /// managed component, building it on first success.
    pub async fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let result = self.evaluate_inner(scope).await;

        match &result {
            Ok(()) => self.set_eval_health(HealthType::Healthy, "node evaluated"),
            Err(err) => self.set_eval_health(HealthType::Unhealthy, err.to_string()),
        }
        result
    }

    async fn evaluate_inner(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let (evaluator, prev_args, managed) = {
            let state = self.state.lock();
            (state.evaluator.clone(), state.args.clone(), state.managed.clone())
        };

        let args = evaluator.evaluate(scope)?;

        match managed {
            None => {
                let built = (self.registration.build)(self.opts.clone(), args.clone())
                    .map_err(EvalError::Build)?;
                debug!(node_id = %self.id, "built managed component");

                let mut state = self.state.lock();
                state.managed = Some(built);
                state.args = Some(args);
            }
            Some(component) => {
                if prev_args.as_ref() == Some(&args) {
                    trace!(node_id = %self.id, "arguments unchanged; skipping update");
                    return Ok(());
                }

                component.update(args.clone()).await.map_err(EvalError::Update)?;
                self.state.lock().args = Some(args);
            }
        }

        Ok(())
    }

    /// Runs the managed component until shutdown. Requires a successful
    /// evaluation first.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<(), RunError> {
        let managed = self
            .state
            .lock()
            .managed
            .clone()
            .ok_or(RunError::Unevaluated)?;

        self.set_run_health(HealthType::Healthy, "started component");

        match managed.run(shutdown).await {
            Ok(()) => {
                self.set_run_health(HealthType::Exited, "component shut down");
                Ok(())
            }
            Err(err) => {
                self.set_run_health(HealthType::Exited, format!("component exited: {err}"));
                Err(RunError::Exited(err))
            }
        }
    }

    /// Records newly published exports, suppressing value-equal repeats.
    ///
    /// Panics when the component type declares no exports schema yet
    /// publishes a value, since that is a bug in the component.
    pub fn set_exports(
        &self,
        exports: Exports,
    ) {
        if self.registration.default_exports.is_none() && exports != Value::Null {
            panic!(
                "component {} published exports but registered none",
                self.global_id,
            );
        }

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

    /// The most recently decoded arguments, or the registration default
    /// before the first successful evaluation.
    pub fn arguments(&self) -> Value {
        self.state
            .lock()
            .args
            .clone()
            .unwrap_or_else(|| self.registration.default_args.clone())
    }

    /// Combined node health: the worst of run health, evaluation health,
    /// and the component's self-reported health when it exposes one.
    pub fn current_health(&self) -> Health {
        let run = self.run_health.lock().clone();
        let eval = self.eval_health.lock().clone();
        let component = self
            .state
            .lock()
            .managed
            .as_ref()
            .and_then(|managed| managed.current_health());

        least_healthy(&run, std::iter::once(&eval).chain(component.iter())).clone()
    }

    pub fn debug_info(&self) -> Option<Value> {
        let managed = self.state.lock().managed.clone()?;
        managed.debug_info()
    }

    fn set_eval_health(
        &self,
        health: HealthType,
        message: impl Into<String>,
    ) {
        *self.eval_health.lock() = Health::new(health, message);
    }

    fn set_run_health(
        &self,
        health: HealthType,
        message: impl Into<String>,
    ) {
        *self.run_health.lock() = Health::new(health, message);
    }
}
