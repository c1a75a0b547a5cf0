use std::sync::Arc;

use serde_json::json;

use crate::component::least_healthy;
use crate::component::Health;
use crate::component::HealthType;
use crate::component::Registration;
use crate::component::Registry;
use crate::component::Stability;
use crate::errors::ConfigError;
use crate::test_utils::TestComponent;

fn test_registration(name: &'static str, stability: Stability) -> Registration {
    Registration {
        name,
        stability,
        default_args: json!({}),
        default_exports: Some(json!({})),
        build: Arc::new(|opts, args| Ok(Arc::new(TestComponent::new(opts, args)) as _)),
    }
}

#[test]
fn test_least_healthy_picks_worst() {
    let healthy = Health::new(HealthType::Healthy, "ok");
    let unhealthy = Health::new(HealthType::Unhealthy, "broken");
    let exited = Health::new(HealthType::Exited, "done");

    assert_eq!(least_healthy(&healthy, [&unhealthy]).health, HealthType::Unhealthy);
    assert_eq!(
        least_healthy(&exited, [&unhealthy, &healthy]).health,
        HealthType::Exited
    );
    assert_eq!(least_healthy(&healthy, []).health, HealthType::Healthy);
}

#[test]
fn test_least_healthy_tie_keeps_first() {
    let run = Health::new(HealthType::Unhealthy, "run failed");
    let eval = Health::new(HealthType::Unhealthy, "eval failed");

    assert_eq!(least_healthy(&run, [&eval]).message, "run failed");
}

#[test]
fn test_registry_lookup() {
    let mut registry = Registry::new();
    registry.register(test_registration("remote.http", Stability::Stable));

    assert!(registry.get("remote.http").is_ok());
    assert!(matches!(
        registry.get("remote.nope"),
        Err(ConfigError::UnknownComponent { .. })
    ));
}

#[test]
fn test_registry_stability_gate() {
    let mut registry = Registry::with_min_stability(Stability::Beta);
    registry.register(test_registration("exp.thing", Stability::Experimental));
    registry.register(test_registration("beta.thing", Stability::Beta));

    assert!(matches!(
        registry.get("exp.thing"),
        Err(ConfigError::BelowStability { .. })
    ));
    assert!(registry.get("beta.thing").is_ok());
}

#[test]
#[should_panic(expected = "registered twice")]
fn test_registry_rejects_duplicate_registration() {
    let mut registry = Registry::new();
    registry.register(test_registration("dup.thing", Stability::Stable));
    registry.register(test_registration("dup.thing", Stability::Stable));
}
