use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ast::Body;

/// A declare template resolved through the registry chain.
#[derive(Clone)]
pub struct CustomComponentTemplate {
    pub name: String,
    pub body: Body,
    /// The registry in which the template was found. Modules stamped out
    /// from the template resolve their own template references against a
    /// child of this scope, giving lexical scoping across nesting levels.
    pub scope: Arc<CustomComponentRegistry>,
}

/// Declare and import templates visible to one controller, chained to the
/// enclosing controller's registry. Lookup walks the ancestor chain on
/// every call; templates registered by an apply pass become visible to
/// evaluations immediately.
///
/// Imported templates live under a namespace and resolve as
/// `<namespace>.<name>`. Each import gets its own detached registry, so
/// imported templates see their siblings but never the importing scope.
#[derive(Default)]
pub struct CustomComponentRegistry {
    parent: RwLock<Option<Arc<CustomComponentRegistry>>>,
    templates: RwLock<HashMap<String, Body>>,
    imports: RwLock<HashMap<String, Arc<CustomComponentRegistry>>>,
}

impl CustomComponentRegistry {
    pub fn new(parent: Option<Arc<CustomComponentRegistry>>) -> Arc<Self> {
        Arc::new(CustomComponentRegistry {
            parent: RwLock::new(parent),
            templates: RwLock::new(HashMap::new()),
            imports: RwLock::new(HashMap::new()),
        })
    }

    /// Re-points the parent scope. Called at the start of an apply pass,
    /// since a module may be reloaded under a different enclosing scope.
    pub fn set_parent(
        &self,
        parent: Option<Arc<CustomComponentRegistry>>,
    ) {
        *self.parent.write() = parent;
    }

    /// Registers (or redefines) a declare template under `name`.
    pub fn register_declare(
        &self,
        name: impl Into<String>,
        body: Body,
    ) {
        self.templates.write().insert(name.into(), body);
    }

    /// Drops local templates whose names are not in `keep`. Called after
    /// populating a new graph so stale declares stop resolving.
    pub fn sync_declares(
        &self,
        keep: &HashSet<String>,
    ) {
        self.templates.write().retain(|name, _| keep.contains(name));
    }

    /// Replaces the templates imported under `namespace`. The templates
    /// are held in a detached registry of their own, so they resolve
    /// against each other and nothing from the importing scope.
    pub fn register_import(
        &self,
        namespace: impl Into<String>,
        templates: Vec<(String, Body)>,
    ) {
        let scope = CustomComponentRegistry::new(None);
        for (name, body) in templates {
            scope.register_declare(name, body);
        }
        self.imports.write().insert(namespace.into(), scope);
    }

    /// Drops imported namespaces not in `keep`, the import counterpart of
    /// [`sync_declares`](Self::sync_declares).
    pub fn sync_imports(
        &self,
        keep: &HashSet<String>,
    ) {
        self.imports.write().retain(|namespace, _| keep.contains(namespace));
    }

    /// Resolves a template by walking this registry and then its ancestor
    /// chain. Closer definitions shadow outer ones. A dotted name such as
    /// `math.add` resolves through the imported namespace `math`.
    pub fn get(
        self: &Arc<Self>,
        name: &str,
    ) -> Option<CustomComponentTemplate> {
        if let Some(body) = self.templates.read().get(name) {
            return Some(CustomComponentTemplate {
                name: name.to_string(),
                body: body.clone(),
                scope: Arc::clone(self),
            });
        }
        if let Some((namespace, rest)) = name.split_once('.') {
            let imported = self.imports.read().get(namespace).cloned();
            if let Some(template) = imported.and_then(|scope| scope.get(rest)) {
                return Some(template);
            }
        }
        let parent = self.parent.read().clone();
        parent.as_ref()?.get(name)
    }

    /// Whether a template with this name is visible from here.
    pub fn contains(
        self: &Arc<Self>,
        name: &str,
    ) -> bool {
        self.get(name).is_some()
    }

    /// Names registered locally, not including ancestors.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Namespaces imported locally, not including ancestors.
    pub fn import_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.imports.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }
}
