use std::collections::BTreeMap;

use serde_json::Number;
use serde_json::Value;

/// An unevaluated expression inside a block body.
///
/// `Ref` is a traversal rooted at some other node's identity; it is the
/// only variant that produces graph edges. Everything else is a literal
/// or a composite of literals and references.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Expr>),
    Object(BTreeMap<String, Expr>),
    /// A traversal such as `a.b.output.inner`, stored as its path
    /// fragments. The node-ID boundary inside the path is unknown until
    /// resolution time.
    Ref(Vec<String>),
}

impl Expr {
    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    pub fn number(n: impl Into<Number>) -> Self {
        Expr::Number(n.into())
    }

    pub fn reference(path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Expr::Ref(path.into_iter().map(Into::into).collect())
    }

    /// Converts a literal JSON value into the equivalent expression tree.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Expr::Null,
            Value::Bool(b) => Expr::Bool(*b),
            Value::Number(n) => Expr::Number(n.clone()),
            Value::String(s) => Expr::String(s.clone()),
            Value::Array(items) => Expr::Array(items.iter().map(Expr::from_value).collect()),
            Value::Object(entries) => Expr::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Expr::from_value(v)))
                    .collect(),
            ),
        }
    }

    pub(crate) fn collect_references(
        &self,
        out: &mut Vec<Vec<String>>,
    ) {
        match self {
            Expr::Ref(path) => out.push(path.clone()),
            Expr::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Expr::Object(entries) => {
                for item in entries.values() {
                    item.collect_references(out);
                }
            }
            _ => {}
        }
    }
}
