//! Sage health records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for the rolling latency average.
const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Liveness status of a sage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Processing,
    Error,
    Maintenance,
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the orchestrator should route to a sage in this status.
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Idle | Self::Processing | Self::Error)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling performance counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_consultations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub last_error: Option<String>,
}

impl PerformanceMetrics {
    /// Fold one finished invocation into the counters.
    pub fn record(&mut self, success: bool, latency_ms: u64, error: Option<String>) {
        self.total_consultations += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.last_error = error;
        }

        #[allow(clippy::cast_precision_loss)]
        let latency = latency_ms as f64;
        self.avg_latency_ms = if self.total_consultations == 1 {
            latency
        } else {
            LATENCY_EMA_ALPHA.mul_add(latency, (1.0 - LATENCY_EMA_ALPHA) * self.avg_latency_ms)
        };
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_consultations == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.succeeded as f64 / self.total_consultations as f64;
        rate
    }
}

/// What a sage reports from `health_check`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: AgentStatus,
    #[serde(default)]
    pub metrics: PerformanceMetrics,
}

impl HealthReport {
    pub fn idle() -> Self {
        Self {
            status: AgentStatus::Idle,
            metrics: PerformanceMetrics::default(),
        }
    }

    pub fn with_status(status: AgentStatus) -> Self {
        Self {
            status,
            metrics: PerformanceMetrics::default(),
        }
    }
}

/// Health record held by the store for one sage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthRecord {
    pub agent_name: String,
    pub status: AgentStatus,
    pub active_consultations: u32,
    pub metrics: PerformanceMetrics,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentHealthRecord {
    pub fn new(agent_name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            agent_name: agent_name.into(),
            status,
            active_consultations: 0,
            metrics: PerformanceMetrics::default(),
            last_heartbeat: Utc::now(),
        }
    }

    /// Record for a sage the store knows nothing about.
    pub fn unknown(agent_name: impl Into<String>) -> Self {
        Self::new(agent_name, AgentStatus::Unknown)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_heartbeat > ttl
    }

    /// Status as seen at `now`: stale records read as `Unknown`.
    pub fn effective_at(&self, now: DateTime<Utc>, ttl: Duration) -> Self {
        if self.is_stale_at(now, ttl) {
            Self {
                status: AgentStatus::Unknown,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_record_reads_unknown() {
        let mut record = AgentHealthRecord::new("knowledge", AgentStatus::Idle);
        record.last_heartbeat = Utc::now() - Duration::minutes(6);

        let effective = record.effective_at(Utc::now(), Duration::minutes(5));
        assert_eq!(effective.status, AgentStatus::Unknown);
        assert_eq!(record.status, AgentStatus::Idle);
    }

    #[test]
    fn test_fresh_record_keeps_status() {
        let record = AgentHealthRecord::new("task", AgentStatus::Maintenance);
        let effective = record.effective_at(Utc::now(), Duration::minutes(5));
        assert_eq!(effective.status, AgentStatus::Maintenance);
    }

    #[test]
    fn test_metrics_record_and_success_rate() {
        let mut metrics = PerformanceMetrics::default();
        assert!((metrics.success_rate() - 1.0).abs() < f64::EPSILON);

        metrics.record(true, 100, None);
        assert!((metrics.avg_latency_ms - 100.0).abs() < f64::EPSILON);

        metrics.record(false, 200, Some("boom".to_string()));
        assert_eq!(metrics.total_consultations, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.last_error.as_deref(), Some("boom"));
        assert!((metrics.avg_latency_ms - 120.0).abs() < 1e-9);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_routable_statuses() {
        assert!(AgentStatus::Idle.is_routable());
        assert!(AgentStatus::Error.is_routable());
        assert!(!AgentStatus::Maintenance.is_routable());
        assert!(!AgentStatus::Unknown.is_routable());
    }
}
