//! Circuit breaker pattern for sage failure detection.
//!
//! One circuit per sage. A circuit opens when failures inside the sliding
//! window reach the threshold, blocks calls for the cooldown, then lets
//! exactly one trial call through. The trial's outcome alone decides
//! whether the circuit closes or re-opens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::CircuitBreakerSettings;

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures within the window that opens the circuit.
    pub failure_threshold: u32,
    /// Window size for tracking failures (older failures are forgotten).
    pub failure_window: Duration,
    /// Duration to keep circuit open before allowing a trial call.
    pub cooldown: Duration,
    /// Whether to enable circuit breakers.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            failure_window: Duration::seconds(i64::try_from(settings.failure_window_secs).unwrap_or(i64::MAX / 1000)),
            cooldown: Duration::seconds(i64::try_from(settings.cooldown_secs).unwrap_or(i64::MAX / 1000)),
            enabled: settings.enabled,
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the sage has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A failure record for tracking purposes.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// When the failure occurred.
    pub timestamp: DateTime<Utc>,
    /// Error message or description.
    pub error: String,
}

impl FailureRecord {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            error: error.into(),
        }
    }
}

/// Individual circuit breaker state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Sage this circuit guards.
    pub agent: String,
    /// Current state.
    pub state: CircuitState,
    /// Recent failures.
    pub failures: Vec<FailureRecord>,
    /// When the circuit was opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// When the half-open trial call was granted, if one is outstanding.
    pub trial_started_at: Option<DateTime<Utc>>,
    /// When state last changed.
    pub state_changed_at: DateTime<Utc>,
    /// Total times circuit opened.
    pub open_count: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            state: CircuitState::Closed,
            failures: Vec::new(),
            opened_at: None,
            trial_started_at: None,
            state_changed_at: Utc::now(),
            open_count: 0,
        }
    }

    /// Record a failure.
    pub fn record_failure(&mut self, failure: FailureRecord, config: &CircuitBreakerConfig) {
        self.failures.push(failure);
        self.prune(config);

        match self.state {
            CircuitState::Closed => {
                if self.failures.len() >= config.failure_threshold as usize {
                    self.open();
                }
            }
            // A failed trial re-opens and restarts the cooldown
            CircuitState::HalfOpen => self.open(),
            CircuitState::Open => {}
        }
    }

    /// Record a success.
    ///
    /// In the closed state this leaves the window untouched; failures only
    /// age out.
    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.close();
        }
    }

    fn prune(&mut self, config: &CircuitBreakerConfig) {
        let cutoff = Utc::now() - config.failure_window;
        self.failures.retain(|f| f.timestamp > cutoff);
    }

    /// Open the circuit.
    fn open(&mut self) {
        let now = Utc::now();
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
        self.state_changed_at = now;
        self.open_count += 1;
    }

    /// Close the circuit.
    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_started_at = None;
        self.state_changed_at = Utc::now();
        self.failures.clear();
    }

    /// Transition to half-open and grant the trial call.
    fn half_open(&mut self) {
        let now = Utc::now();
        self.state = CircuitState::HalfOpen;
        self.trial_started_at = Some(now);
        self.state_changed_at = now;
    }

    /// Decide whether the next call may proceed.
    pub fn admit(&mut self, config: &CircuitBreakerConfig) -> Admission {
        let now = Utc::now();
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => match self.opened_at {
                Some(opened_at) if now >= opened_at + config.cooldown => {
                    self.half_open();
                    Admission::Trial
                }
                _ => Admission::Blocked,
            },
            CircuitState::HalfOpen => match self.trial_started_at {
                // An abandoned trial (never reported) frees the slot after one cooldown
                Some(started) if now >= started + config.cooldown => {
                    self.trial_started_at = Some(now);
                    Admission::Trial
                }
                Some(_) => Admission::Blocked,
                None => {
                    self.trial_started_at = Some(now);
                    Admission::Trial
                }
            },
        }
    }

    /// Get recent failure count within the window.
    pub fn recent_failure_count(&self, config: &CircuitBreakerConfig) -> usize {
        let cutoff = Utc::now() - config.failure_window;
        self.failures.iter().filter(|f| f.timestamp > cutoff).count()
    }

    /// Manually reset the circuit.
    pub fn reset(&mut self) {
        self.close();
        self.open_count = 0;
    }
}

/// Internal admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Trial,
    Blocked,
}

/// Result of a circuit breaker check.
#[derive(Debug, Clone)]
pub enum CircuitCheckResult {
    /// Request is allowed.
    Allowed,
    /// Request is blocked by an open circuit (or an outstanding trial).
    Blocked {
        agent: String,
        opened_at: Option<DateTime<Utc>>,
        retry_after: Option<DateTime<Utc>>,
    },
    /// This request is the single half-open trial.
    Trial { agent: String },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Trial { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub agent: String,
    pub state: CircuitState,
    pub failure_count: usize,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

/// Service for managing per-sage circuit breakers.
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerService {
    /// Create a new circuit breaker service.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Check if a call to `agent` is allowed, consuming the half-open trial if granted.
    pub async fn check(&self, agent: &str) -> CircuitCheckResult {
        if !self.config.enabled {
            return CircuitCheckResult::Allowed;
        }

        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(agent.to_string())
            .or_insert_with(|| CircuitBreaker::new(agent));

        match circuit.admit(&self.config) {
            Admission::Allowed => CircuitCheckResult::Allowed,
            Admission::Trial => {
                tracing::info!(agent, "circuit half-open, granting trial call");
                CircuitCheckResult::Trial {
                    agent: agent.to_string(),
                }
            }
            Admission::Blocked => CircuitCheckResult::Blocked {
                agent: agent.to_string(),
                opened_at: circuit.opened_at,
                retry_after: circuit.opened_at.map(|t| t + self.config.cooldown),
            },
        }
    }

    /// Record a failure for the given sage.
    pub async fn record_failure(&self, agent: &str, error: impl Into<String>) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(agent.to_string())
            .or_insert_with(|| CircuitBreaker::new(agent));

        let before = circuit.state;
        circuit.record_failure(FailureRecord::new(error), &self.config);

        if before != CircuitState::Open && circuit.state == CircuitState::Open {
            tracing::warn!(
                agent,
                open_count = circuit.open_count,
                recent_failures = circuit.failures.len(),
                "circuit opened"
            );
        }
    }

    /// Record a success for the given sage.
    pub async fn record_success(&self, agent: &str) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(agent) {
            let before = circuit.state;
            circuit.record_success();
            if before == CircuitState::HalfOpen {
                tracing::info!(agent, "circuit closed after successful trial");
            }
        }
    }

    /// Current state of a circuit without side effects (closed when never seen).
    ///
    /// An open circuit whose cooldown has elapsed still reads `Open` here;
    /// only [`check`](Self::check) moves it to half-open.
    pub async fn state(&self, agent: &str) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        let circuits = self.circuits.read().await;
        circuits
            .get(agent)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Whether a call would currently be rejected outright.
    ///
    /// True for open circuits still inside their cooldown; read-only.
    pub async fn is_blocking(&self, agent: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let circuits = self.circuits.read().await;
        circuits.get(agent).is_some_and(|c| match (c.state, c.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Utc::now() < opened_at + self.config.cooldown,
            (CircuitState::Open, None) => true,
            _ => false,
        })
    }

    /// Get statistics for all circuits, ordered by sage name.
    pub async fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read().await;
        let mut stats: Vec<CircuitStats> = circuits
            .values()
            .map(|c| CircuitStats {
                agent: c.agent.clone(),
                state: c.state,
                failure_count: c.recent_failure_count(&self.config),
                open_count: c.open_count,
                opened_at: c.opened_at,
                state_changed_at: c.state_changed_at,
            })
            .collect();
        stats.sort_by(|a, b| a.agent.cmp(&b.agent));
        stats
    }

    /// Get open circuits.
    pub async fn open_circuits(&self) -> Vec<String> {
        let circuits = self.circuits.read().await;
        let mut open: Vec<String> = circuits
            .iter()
            .filter(|(_, c)| c.state == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect();
        open.sort();
        open
    }

    /// Manually reset a circuit.
    pub async fn reset(&self, agent: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(agent) {
            circuit.reset();
        }
    }

    /// Reset all circuits.
    pub async fn reset_all(&self) {
        let mut circuits = self.circuits.write().await;
        for circuit in circuits.values_mut() {
            circuit.reset();
        }
    }

    /// Get configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::minutes(10),
            cooldown: Duration::minutes(5),
            enabled: true,
        }
    }

    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::seconds(30));
        assert!(config.enabled);
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let mut circuit = CircuitBreaker::new("knowledge");
        let config = config(3);

        circuit.record_failure(FailureRecord::new("error 1"), &config);
        circuit.record_failure(FailureRecord::new("error 2"), &config);
        assert_eq!(circuit.state, CircuitState::Closed);

        circuit.record_failure(FailureRecord::new("error 3"), &config);
        assert_eq!(circuit.state, CircuitState::Open);
        assert!(circuit.opened_at.is_some());
        assert_eq!(circuit.open_count, 1);
        assert_eq!(circuit.admit(&config), Admission::Blocked);
    }

    #[test]
    fn test_success_does_not_clear_closed_window() {
        let mut circuit = CircuitBreaker::new("knowledge");
        let config = config(2);

        circuit.record_failure(FailureRecord::new("error 1"), &config);
        circuit.record_success();
        assert_eq!(circuit.failures.len(), 1);

        circuit.record_failure(FailureRecord::new("error 2"), &config);
        assert_eq!(circuit.state, CircuitState::Open);
    }

    #[test]
    fn test_old_failures_age_out_of_window() {
        let mut circuit = CircuitBreaker::new("knowledge");
        let config = config(2);

        circuit.failures.push(FailureRecord {
            timestamp: Utc::now() - Duration::minutes(11),
            error: "ancient".to_string(),
        });
        circuit.record_failure(FailureRecord::new("fresh"), &config);
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.failures.len(), 1);
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let mut circuit = CircuitBreaker::new("task");
        let config = config(1);

        circuit.record_failure(FailureRecord::new("boom"), &config);
        assert_eq!(circuit.state, CircuitState::Open);

        // Pretend the cooldown already elapsed
        circuit.opened_at = Some(Utc::now() - Duration::minutes(6));

        assert_eq!(circuit.admit(&config), Admission::Trial);
        assert_eq!(circuit.state, CircuitState::HalfOpen);
        assert_eq!(circuit.admit(&config), Admission::Blocked);
    }

    #[test]
    fn test_trial_success_closes_and_resets() {
        let mut circuit = CircuitBreaker::new("task");
        let config = config(1);

        circuit.record_failure(FailureRecord::new("boom"), &config);
        circuit.opened_at = Some(Utc::now() - Duration::minutes(6));
        assert_eq!(circuit.admit(&config), Admission::Trial);

        circuit.record_success();
        assert_eq!(circuit.state, CircuitState::Closed);
        assert!(circuit.failures.is_empty());
        assert_eq!(circuit.admit(&config), Admission::Allowed);
    }

    #[test]
    fn test_trial_failure_reopens_and_restarts_cooldown() {
        let mut circuit = CircuitBreaker::new("task");
        let config = config(3);

        for i in 0..3 {
            circuit.record_failure(FailureRecord::new(format!("error {i}")), &config);
        }
        circuit.opened_at = Some(Utc::now() - Duration::minutes(6));
        assert_eq!(circuit.admit(&config), Admission::Trial);

        circuit.record_failure(FailureRecord::new("trial failed"), &config);
        assert_eq!(circuit.state, CircuitState::Open);
        assert_eq!(circuit.open_count, 2);
        assert!(circuit.opened_at.unwrap() > Utc::now() - Duration::seconds(5));
        assert_eq!(circuit.admit(&config), Admission::Blocked);
    }

    #[test]
    fn test_abandoned_trial_is_regranted() {
        let mut circuit = CircuitBreaker::new("task");
        let config = config(1);

        circuit.record_failure(FailureRecord::new("boom"), &config);
        circuit.opened_at = Some(Utc::now() - Duration::minutes(6));
        assert_eq!(circuit.admit(&config), Admission::Trial);

        circuit.trial_started_at = Some(Utc::now() - Duration::minutes(6));
        assert_eq!(circuit.admit(&config), Admission::Trial);
    }

    #[test]
    fn test_circuit_reset() {
        let mut circuit = CircuitBreaker::new("search");
        let config = config(2);

        circuit.record_failure(FailureRecord::new("error 1"), &config);
        circuit.record_failure(FailureRecord::new("error 2"), &config);
        assert_eq!(circuit.state, CircuitState::Open);

        circuit.reset();
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.open_count, 0);
        assert!(circuit.failures.is_empty());
    }

    #[tokio::test]
    async fn test_service_blocks_after_threshold() {
        let service = CircuitBreakerService::new(config(3));

        assert!(service.check("incident").await.is_allowed());

        service.record_failure("incident", "error 1").await;
        service.record_failure("incident", "error 2").await;
        assert!(service.check("incident").await.is_allowed());

        service.record_failure("incident", "error 3").await;
        assert!(service.check("incident").await.is_blocked());
        assert!(service.is_blocking("incident").await);
        assert_eq!(service.state("incident").await, CircuitState::Open);
        assert_eq!(service.open_circuits().await, vec!["incident".to_string()]);
    }

    #[tokio::test]
    async fn test_service_trial_after_real_cooldown() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 1,
            failure_window: Duration::minutes(1),
            cooldown: Duration::milliseconds(50),
            enabled: true,
        });

        service.record_failure("search", "down").await;
        assert!(service.check("search").await.is_blocked());

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        assert!(matches!(service.check("search").await, CircuitCheckResult::Trial { .. }));
        assert!(service.check("search").await.is_blocked());

        service.record_success("search").await;
        assert_eq!(service.state("search").await, CircuitState::Closed);
        assert!(matches!(service.check("search").await, CircuitCheckResult::Allowed));
    }

    #[tokio::test]
    async fn test_service_stats_sorted() {
        let service = CircuitBreakerService::with_defaults();

        service.record_failure("zeta", "error").await;
        service.record_failure("alpha", "error").await;

        let stats = service.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].agent, "alpha");
        assert_eq!(stats[1].failure_count, 1);
    }

    #[tokio::test]
    async fn test_service_disabled() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            ..Default::default()
        });

        for _ in 0..10 {
            service.record_failure("any", "error").await;
        }

        assert!(service.check("any").await.is_allowed());
        assert_eq!(service.state("any").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_service_reset_all() {
        let service = CircuitBreakerService::new(config(1));
        service.record_failure("a", "x").await;
        service.record_failure("b", "y").await;
        assert_eq!(service.open_circuits().await.len(), 2);

        service.reset_all().await;
        assert!(service.open_circuits().await.is_empty());
    }
}
