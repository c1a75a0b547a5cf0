//! Expression evaluation boundary.
//!
//! The real parser/evaluator is an external collaborator; the controller
//! only requires deterministic decoding and the ability to bind an
//! evaluator to a block body once and reuse it across evaluations. This
//! module provides that contract plus a small reference implementation
//! that resolves traversals against a [`Scope`].

mod scope;
pub use scope::*;


use serde_json::Map;
use serde_json::Value;

use crate::ast::Body;
use crate::ast::Expr;
use crate::errors::EvalError;

/// An evaluator bound to a block body. Construction is cheap and the
/// evaluator is reused across repeated evaluations of the same block.
#[derive(Debug, Clone)]
pub struct Evaluator {
    body: Body,
}

impl Evaluator {
    pub fn new(body: Body) -> Self {
        Evaluator { body }
    }

    /// Decodes the bound body against the given scope into an object
    /// value: one entry per attribute, plus one entry per nested block
    /// keyed by its block name (labeled nested blocks nest one level
    /// deeper under their label).
    pub fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<Value, EvalError> {
        self.evaluate_body(&self.body, scope)
    }

    fn evaluate_body(
        &self,
        body: &Body,
        scope: &Scope,
    ) -> Result<Value, EvalError> {
        let mut object = Map::new();

        for (name, expr) in &body.attributes {
            let value = self.evaluate_expr(expr, scope).map_err(|err| match err {
                EvalError::UnresolvedReference { path } => EvalError::Decode {
                    attribute: name.clone(),
                    message: format!("unresolved reference {}", path.join(".")),
                },
                other => other,
            })?;
            object.insert(name.clone(), value);
        }

        for block in &body.blocks {
            let inner = self.evaluate_body(&block.body, scope)?;
            match &block.label {
                Some(label) => {
                    let slot = object
                        .entry(block.block_name())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(entries) = slot {
                        entries.insert(label.clone(), inner);
                    }
                }
                None => {
                    object.insert(block.block_name(), inner);
                }
            }
        }

        Ok(Value::Object(object))
    }

    fn evaluate_expr(
        &self,
        expr: &Expr,
        scope: &Scope,
    ) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(n.clone())),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate_expr(item, scope)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Object(entries) => {
                let mut object = Map::new();
                for (key, item) in entries {
                    object.insert(key.clone(), self.evaluate_expr(item, scope)?);
                }
                Ok(Value::Object(object))
            }
            Expr::Ref(path) => scope
                .lookup(path)
                .ok_or_else(|| EvalError::UnresolvedReference { path: path.clone() }),
        }
    }
}
