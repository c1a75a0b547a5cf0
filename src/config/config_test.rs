use crate::config::BackoffPolicy;
use crate::config::RuntimeConfig;

#[test]
fn test_defaults_are_valid() {
    let config = RuntimeConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.workers > 0);
    assert!(config.queue_capacity > 0);
}

#[test]
fn test_zero_workers_rejected() {
    let config = RuntimeConfig {
        workers: 0,
        ..RuntimeConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_queue_capacity_rejected() {
    let config = RuntimeConfig {
        queue_capacity: 0,
        ..RuntimeConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_inverted_backoff_rejected() {
    let config = RuntimeConfig {
        evaluation_retry: BackoffPolicy {
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 100,
        },
        ..RuntimeConfig::default()
    };
    assert!(config.validate().is_err());
}
