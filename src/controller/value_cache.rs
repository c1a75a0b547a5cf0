use std::collections::HashMap;
use std::collections::HashSet;

use parking_lot::RwLock;
use serde_json::Map;
use serde_json::Value;

use crate::dag::NodeId;
use crate::eval::Scope;

/// Caches node arguments and exports so they can be exposed as the
/// evaluation scope for other nodes.
///
/// Arguments are cached for introspection but never exposed in the scope;
/// only exports are referenceable. Module arguments appear in the scope
/// under `argument.<name>.value`.
#[derive(Default)]
pub struct ValueCache {
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    arguments: HashMap<NodeId, Value>,
    exports: HashMap<NodeId, Value>,
    module_arguments: Map<String, Value>,
    module_exports: Map<String, Value>,
    // Incremented on every module-export change; the loader compares it
    // with the value at the last upward notification.
    module_change_index: u64,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_arguments(
        &self,
        id: NodeId,
        args: Value,
    ) {
        self.inner.write().arguments.insert(id, args);
    }

    pub fn cache_exports(
        &self,
        id: NodeId,
        exports: Value,
    ) {
        self.inner.write().exports.insert(id, exports);
    }

    pub fn cache_module_argument(
        &self,
        label: impl Into<String>,
        value: Value,
    ) {
        self.inner.write().module_arguments.insert(label.into(), value);
    }

    pub fn module_argument(
        &self,
        label: &str,
    ) -> Option<Value> {
        self.inner.read().module_arguments.get(label).cloned()
    }

    /// Stores the value of one module export, bumping the change index
    /// when the value is new or differs from the cached one.
    pub fn cache_module_export(
        &self,
        label: impl Into<String>,
        value: Value,
    ) {
        let label = label.into();
        let mut inner = self.inner.write();
        if inner.module_exports.get(&label) != Some(&value) {
            inner.module_change_index += 1;
        }
        inner.module_exports.insert(label, value);
    }

    /// Empties the module exports ahead of a full re-evaluation. Counts
    /// as a change so the next apply re-notifies the enclosing controller.
    pub fn clear_module_exports(&self) {
        let mut inner = self.inner.write();
        inner.module_change_index += 1;
        inner.module_exports.clear();
    }

    pub fn module_exports(&self) -> Value {
        Value::Object(self.inner.read().module_exports.clone())
    }

    pub fn export_change_index(&self) -> u64 {
        self.inner.read().module_change_index
    }

    /// Drops cached arguments and exports for nodes no longer in the
    /// graph. Called after an apply pass swaps in the new graph.
    pub fn sync_ids(
        &self,
        keep: &HashSet<NodeId>,
    ) {
        let mut inner = self.inner.write();
        inner.arguments.retain(|id, _| keep.contains(id));
        inner.exports.retain(|id, _| keep.contains(id));
    }

    /// Drops module arguments whose labels are not provided anymore.
    pub fn sync_module_args(
        &self,
        provided: &Map<String, Value>,
    ) {
        self.inner
            .write()
            .module_arguments
            .retain(|label, _| provided.contains_key(label));
    }

    /// Builds the evaluation scope from the cached exports: node IDs are
    /// partitioned fragment by fragment into nested objects whose leaves
    /// are export values. `remote.http.a` and `remote.http.b` become
    /// `remote.http.{a, b}`.
    pub fn build_scope(&self) -> Scope {
        let inner = self.inner.read();
        let mut variables = Map::new();

        for (id, exports) in &inner.exports {
            insert_nested(&mut variables, id.fragments(), exports.clone());
        }

        if !inner.module_arguments.is_empty() {
            let mut arguments = Map::new();
            for (label, value) in &inner.module_arguments {
                let mut slot = Map::new();
                slot.insert("value".to_string(), value.clone());
                arguments.insert(label.clone(), Value::Object(slot));
            }
            variables.insert("argument".to_string(), Value::Object(arguments));
        }

        Scope::new(variables)
    }
}

fn insert_nested(
    target: &mut Map<String, Value>,
    fragments: &[String],
    value: Value,
) {
    match fragments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let slot = target
                .entry(first.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(entries) = slot {
                insert_nested(entries, rest, value);
            }
        }
    }
}
