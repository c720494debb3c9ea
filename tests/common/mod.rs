//! Common test utilities for integration tests
//!
//! Shared fixtures for building orchestrators over scripted mock sages.

#![allow(dead_code)]

use std::sync::Arc;

use sage_council::adapters::sages::MockSage;
use sage_council::{Config, ConsultationOrchestrator, Sage, SageRegistry};

/// Defaults shrunk so recovery paths finish in milliseconds.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.circuit_breaker.failure_threshold = 2;
    config.recovery.initial_backoff_ms = 5;
    config.recovery.max_backoff_ms = 20;
    config.recovery.resource_retry_delay_ms = 5;
    config.orchestrator.agent_timeout_ms = 500;
    config.orchestrator.default_deadline_ms = 2_000;
    config
}

pub fn council(config: &Config, sages: &[Arc<MockSage>]) -> ConsultationOrchestrator {
    let registry = SageRegistry::from_sages(
        sages.iter().map(|s| Arc::clone(s) as Arc<dyn Sage>),
    )
    .expect("mock sages register");
    ConsultationOrchestrator::new(config, registry)
}

/// Initializes a test-writer subscriber; safe to call more than once.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
