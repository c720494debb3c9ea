use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Environment variable prefix; nested keys use `__`.
pub const ENV_PREFIX: &str = "SAGE_COUNCIL_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid max_agents_per_consultation: {0}. Must be between 1 and 32")]
    InvalidMaxAgents(usize),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid {field}: {value}. Must be within [0, 1]")]
    InvalidFactor { field: &'static str, value: f64 },

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .sage-council/config.yaml
    /// 3. .sage-council/local.yaml (optional overrides)
    /// 4. Environment variables (SAGE_COUNCIL_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sage-council/config.yaml"))
            .merge(Yaml::file(".sage-council/local.yaml"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment variables still win.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        let breaker = &config.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(0));
        }
        if breaker.failure_window_secs == 0 {
            return Err(ConfigError::NotPositive("circuit_breaker.failure_window_secs"));
        }
        if breaker.cooldown_secs == 0 {
            return Err(ConfigError::NotPositive("circuit_breaker.cooldown_secs"));
        }

        if config.health.ttl_secs == 0 {
            return Err(ConfigError::NotPositive("health.ttl_secs"));
        }
        if config.health.probe_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("health.probe_timeout_ms"));
        }

        let recovery = &config.recovery;
        if recovery.initial_backoff_ms >= recovery.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                recovery.initial_backoff_ms,
                recovery.max_backoff_ms,
            ));
        }
        if !(recovery.timeout_retry_factor > 0.0 && recovery.timeout_retry_factor <= 1.0) {
            return Err(ConfigError::InvalidFactor {
                field: "recovery.timeout_retry_factor",
                value: recovery.timeout_retry_factor,
            });
        }
        if !(0.0..=1.0).contains(&recovery.cached_confidence_factor) {
            return Err(ConfigError::InvalidFactor {
                field: "recovery.cached_confidence_factor",
                value: recovery.cached_confidence_factor,
            });
        }
        if recovery.journal_capacity == 0 {
            return Err(ConfigError::NotPositive("recovery.journal_capacity"));
        }

        let orchestrator = &config.orchestrator;
        if orchestrator.max_agents_per_consultation == 0
            || orchestrator.max_agents_per_consultation > 32
        {
            return Err(ConfigError::InvalidMaxAgents(
                orchestrator.max_agents_per_consultation,
            ));
        }
        if orchestrator.default_deadline_ms == 0 {
            return Err(ConfigError::NotPositive("orchestrator.default_deadline_ms"));
        }
        if orchestrator.agent_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("orchestrator.agent_timeout_ms"));
        }
        if orchestrator.max_content_length == 0 {
            return Err(ConfigError::NotPositive("orchestrator.max_content_length"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.health.ttl_secs, 300);
        assert_eq!(config.orchestrator.max_agents_per_consultation, 4);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: json
circuit_breaker:
  failure_threshold: 3
  cooldown_secs: 10
orchestrator:
  agent_timeout_ms: 2500
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_secs, 10);
        assert_eq!(config.circuit_breaker.failure_window_secs, 60);
        assert_eq!(config.orchestrator.agent_timeout_ms, 2500);
        assert_eq!(config.recovery.max_network_retries, 3);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel("invalid".to_string()))
        );
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_zero_failure_threshold() {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 0;

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidFailureThreshold(0))
        );
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.recovery.initial_backoff_ms = 3000;
        config.recovery.max_backoff_ms = 1000;

        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(3000, 1000))
        );
    }

    #[test]
    fn test_validate_factors() {
        let mut config = Config::default();
        config.recovery.timeout_retry_factor = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidFactor { field: "recovery.timeout_retry_factor", .. })
        ));

        let mut config = Config::default();
        config.recovery.cached_confidence_factor = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidFactor { field: "recovery.cached_confidence_factor", .. })
        ));
    }

    #[test]
    fn test_validate_agent_bounds() {
        let mut config = Config::default();
        config.orchestrator.max_agents_per_consultation = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxAgents(0))
        );

        config.orchestrator.max_agents_per_consultation = 4;
        config.orchestrator.agent_timeout_ms = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::NotPositive("orchestrator.agent_timeout_ms"))
        );
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "health:\n  ttl_secs: 60\nrecovery:\n  journal_capacity: 50").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.health.ttl_secs, 60);
        assert_eq!(config.health.probe_timeout_ms, 2000);
        assert_eq!(config.recovery.journal_capacity, 50);
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        assert!(ConfigLoader::load_from_file("/nonexistent/sage-council.yaml").is_err());
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: loud").unwrap();
        file.flush().unwrap();

        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "circuit_breaker:\n  failure_threshold: 3").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("SAGE_COUNCIL_CIRCUIT_BREAKER__FAILURE_THRESHOLD", Some("7")),
                ("SAGE_COUNCIL_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.circuit_breaker.failure_threshold, 7);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "orchestrator:\n  agent_timeout_ms: 5000\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "orchestrator:\n  agent_timeout_ms: 1500\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.orchestrator.agent_timeout_ms, 1500, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
