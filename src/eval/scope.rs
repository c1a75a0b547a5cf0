use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;

/// A nested name-to-value mapping exposed to expression evaluation.
///
/// Scopes chain: a module's scope has the enclosing controller's scope as
/// its parent, so traversals fall back to the ancestor chain when the
/// root fragment is not found locally.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    parent: Option<Arc<Scope>>,
    pub variables: Map<String, Value>,
}

impl Scope {
    pub fn new(variables: Map<String, Value>) -> Self {
        Scope {
            parent: None,
            variables,
        }
    }

    pub fn with_parent(
        parent: Arc<Scope>,
        variables: Map<String, Value>,
    ) -> Self {
        Scope {
            parent: Some(parent),
            variables,
        }
    }

    /// Resolves a traversal path to a value. The root fragment selects a
    /// variable; remaining fragments index into nested objects. When the
    /// root fragment is unknown locally, lookup retries on the parent.
    pub fn lookup(
        &self,
        path: &[String],
    ) -> Option<Value> {
        let (root, rest) = path.split_first()?;

        match self.variables.get(root) {
            Some(mut current) => {
                for fragment in rest {
                    match current {
                        Value::Object(entries) => current = entries.get(fragment)?,
                        _ => return None,
                    }
                }
                Some(current.clone())
            }
            None => self.parent.as_ref()?.lookup(path),
        }
    }
}
