use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::Arguments;
use super::Component;
use super::ComponentOptions;
use crate::errors::ComponentError;
use crate::errors::ConfigError;

/// Maturity gate for registered component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stability {
    Experimental,
    Beta,
    Stable,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Experimental => "experimental",
            Stability::Beta => "beta",
            Stability::Stable => "stable",
        }
    }
}

/// Build function turning options plus decoded arguments into a live
/// component instance.
pub type BuildFn = Arc<
    dyn Fn(ComponentOptions, Arguments) -> std::result::Result<Arc<dyn Component>, ComponentError>
        + Send
        + Sync,
>;

/// A registered component type.
#[derive(Clone)]
pub struct Registration {
    /// Fully-qualified type name, e.g. `remote.http`.
    pub name: &'static str,
    pub stability: Stability,
    /// Zero value for the component's arguments schema, used for
    /// defaulting before the first evaluation.
    pub default_args: Value,
    /// Zero value for the exports schema, or `None` when the component
    /// type never publishes exports.
    pub default_exports: Option<Value>,
    pub build: BuildFn,
}

impl fmt::Debug for Registration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("stability", &self.stability)
            .finish_non_exhaustive()
    }
}

/// An explicit registry of component types, constructed at startup and
/// passed by reference into the Loader. There is deliberately no global
/// registry: the set of available types is injectable and testable.
#[derive(Debug, Default)]
pub struct Registry {
    components: HashMap<&'static str, Registration>,
    min_stability: Option<Stability>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_stability(min_stability: Stability) -> Self {
        Registry {
            components: HashMap::new(),
            min_stability: Some(min_stability),
        }
    }

    /// Registers a component type. Panics on a duplicate name, since two
    /// registrations for one type indicate a bug in startup wiring.
    pub fn register(
        &mut self,
        registration: Registration,
    ) {
        let name = registration.name;
        if self.components.insert(name, registration).is_some() {
            panic!("component type {name:?} registered twice");
        }
    }

    /// Looks up a registration by fully-qualified type name, applying the
    /// minimum-stability gate.
    pub fn get(
        &self,
        name: &str,
    ) -> std::result::Result<&Registration, ConfigError> {
        let registration =
            self.components
                .get(name)
                .ok_or_else(|| ConfigError::UnknownComponent {
                    name: name.to_string(),
                })?;

        if let Some(minimum) = self.min_stability {
            if registration.stability < minimum {
                return Err(ConfigError::BelowStability {
                    name: name.to_string(),
                    minimum: minimum.as_str(),
                });
            }
        }

        Ok(registration)
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.components.contains_key(name)
    }
}
