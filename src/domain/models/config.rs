use serde::{Deserialize, Serialize};

/// Main configuration structure for the sage council
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-sage circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Health/state store configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// Error recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stdout only when absent)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Whether to also log to stdout when a log directory is set
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    /// Whether circuit breaking is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failures within the window that open a circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Sliding failure window in seconds
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Seconds an open circuit waits before allowing a trial call
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_secs() -> u64 {
    60
}

const fn default_cooldown_secs() -> u64 {
    30
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Health/state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Heartbeat age after which a record reads as unknown
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Upper bound on a single `health_check` probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

const fn default_ttl_secs() -> u64 {
    300
}

const fn default_probe_timeout_ms() -> u64 {
    2000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Error recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// Retry cap for network failures
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,

    /// First backoff delay for network retries
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Largest backoff delay for network retries
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Fraction of the agent timeout granted to the timeout retry
    #[serde(default = "default_timeout_retry_factor")]
    pub timeout_retry_factor: f64,

    /// Delay before retrying after resource exhaustion
    #[serde(default = "default_resource_retry_delay_ms")]
    pub resource_retry_delay_ms: u64,

    /// How many other sages to try as cross-agent fallback
    #[serde(default = "default_max_cross_agent_attempts")]
    pub max_cross_agent_attempts: usize,

    /// Confidence multiplier for last-known-good cached answers
    #[serde(default = "default_cached_confidence_factor")]
    pub cached_confidence_factor: f64,

    /// Recovery journal capacity
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

const fn default_max_network_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    2000
}

const fn default_timeout_retry_factor() -> f64 {
    0.5
}

const fn default_resource_retry_delay_ms() -> u64 {
    250
}

const fn default_max_cross_agent_attempts() -> usize {
    2
}

const fn default_cached_confidence_factor() -> f64 {
    0.5
}

const fn default_journal_capacity() -> usize {
    10_000
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_network_retries: default_max_network_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_retry_factor: default_timeout_retry_factor(),
            resource_retry_delay_ms: default_resource_retry_delay_ms(),
            max_cross_agent_attempts: default_max_cross_agent_attempts(),
            cached_confidence_factor: default_cached_confidence_factor(),
            journal_capacity: default_journal_capacity(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Consultation deadline when the query sets none
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,

    /// Upper bound on a single sage invocation
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    /// Largest sage set selected for one consultation
    #[serde(default = "default_max_agents")]
    pub max_agents_per_consultation: usize,

    /// Delegation depth below the hierarchical supervisor
    #[serde(default = "default_max_hierarchy_depth")]
    pub max_hierarchy_depth: usize,

    /// Longest accepted query content, in bytes
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

const fn default_deadline_ms() -> u64 {
    30_000
}

const fn default_agent_timeout_ms() -> u64 {
    10_000
}

const fn default_max_agents() -> usize {
    4
}

const fn default_max_hierarchy_depth() -> usize {
    2
}

const fn default_max_content_length() -> usize {
    16_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: default_deadline_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
            max_agents_per_consultation: default_max_agents(),
            max_hierarchy_depth: default_max_hierarchy_depth(),
            max_content_length: default_max_content_length(),
        }
    }
}
