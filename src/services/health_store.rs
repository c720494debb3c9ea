//! Health/state store for sages.
//!
//! Records expire to `unknown` once their heartbeat is older than the TTL.
//! Expiry is evaluated on read, so a stale record is never reported with
//! its last explicit status. Maintenance set through
//! [`HealthStateStore::set_maintenance`] is the exception: it holds until
//! it is lifted, whatever the sage reports and however old the record is.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::{AgentHealthRecord, AgentStatus, HealthConfig, HealthReport};

/// Aggregate, read-only view of every known sage.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Effective records ordered by sage name.
    pub agents: Vec<AgentHealthRecord>,
    pub status_counts: BTreeMap<String, usize>,
    pub active_consultations: u32,
}

impl HealthSnapshot {
    pub fn record(&self, agent: &str) -> Option<&AgentHealthRecord> {
        self.agents
            .binary_search_by(|r| r.agent_name.as_str().cmp(agent))
            .ok()
            .map(|idx| &self.agents[idx])
    }
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, AgentHealthRecord>,
    /// Operator-held maintenance, immune to TTL expiry and self-reports.
    maintenance: HashSet<String>,
}

impl StoreState {
    fn record_mut(&mut self, agent: &str) -> &mut AgentHealthRecord {
        self.records
            .entry(agent.to_string())
            .or_insert_with(|| AgentHealthRecord::unknown(agent))
    }

    fn effective(&self, record: &AgentHealthRecord, now: DateTime<Utc>, ttl: Duration) -> AgentHealthRecord {
        let mut effective = record.effective_at(now, ttl);
        if self.maintenance.contains(&record.agent_name) {
            effective.status = AgentStatus::Maintenance;
        }
        effective
    }
}

/// Concurrent TTL-bounded store of [`AgentHealthRecord`]s.
pub struct HealthStateStore {
    ttl: Duration,
    state: Arc<RwLock<StoreState>>,
}

impl HealthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(Duration::seconds(
            i64::try_from(config.ttl_secs).unwrap_or(i64::MAX / 1000),
        ))
    }

    /// Store with the default five minute TTL.
    pub fn with_defaults() -> Self {
        Self::from_config(&HealthConfig::default())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Upsert a record; the heartbeat is reset to now.
    pub async fn update_state(&self, mut record: AgentHealthRecord) {
        record.last_heartbeat = Utc::now();
        let mut state = self.state.write().await;
        state.records.insert(record.agent_name.clone(), record);
    }

    /// Fold a sage's own health report into its record.
    pub async fn apply_report(&self, agent: &str, report: HealthReport) {
        let mut state = self.state.write().await;
        let held = state.maintenance.contains(agent);
        let record = state.record_mut(agent);
        record.status = if held {
            if report.status != AgentStatus::Maintenance {
                tracing::debug!(agent, reported = %report.status, "sage in maintenance, reported status ignored");
            }
            AgentStatus::Maintenance
        } else if record.active_consultations > 0 && report.status == AgentStatus::Idle {
            // The store's own in-flight count wins over the sage's view
            AgentStatus::Processing
        } else {
            report.status
        };
        if report.metrics.total_consultations > record.metrics.total_consultations {
            record.metrics = report.metrics;
        }
        record.last_heartbeat = Utc::now();
    }

    /// Effective record for `agent`; missing or stale records read as unknown.
    pub async fn get_state(&self, agent: &str) -> AgentHealthRecord {
        let state = self.state.read().await;
        let now = Utc::now();
        match state.records.get(agent) {
            Some(record) => state.effective(record, now, self.ttl),
            None => AgentHealthRecord::unknown(agent),
        }
    }

    /// Mark a sage as handling one more consultation.
    pub async fn begin_consultation(&self, agent: &str) {
        let mut state = self.state.write().await;
        let held = state.maintenance.contains(agent);
        let record = state.record_mut(agent);
        record.active_consultations += 1;
        if !held {
            record.status = AgentStatus::Processing;
        }
        record.last_heartbeat = Utc::now();
    }

    /// Mark one consultation finished and update the rolling metrics.
    pub async fn finish_consultation(
        &self,
        agent: &str,
        success: bool,
        latency_ms: u64,
        error: Option<String>,
    ) {
        let mut state = self.state.write().await;
        let held = state.maintenance.contains(agent);
        let record = state.record_mut(agent);
        record.active_consultations = record.active_consultations.saturating_sub(1);
        record.metrics.record(success, latency_ms, error);
        if !held {
            record.status = if !success {
                AgentStatus::Error
            } else if record.active_consultations > 0 {
                AgentStatus::Processing
            } else {
                AgentStatus::Idle
            };
        }
        record.last_heartbeat = Utc::now();
    }

    /// Put a sage into (or take it out of) maintenance.
    pub async fn set_maintenance(&self, agent: &str, maintenance: bool) {
        let mut state = self.state.write().await;
        if maintenance {
            state.maintenance.insert(agent.to_string());
        } else {
            state.maintenance.remove(agent);
        }
        let record = state.record_mut(agent);
        record.status = if maintenance {
            AgentStatus::Maintenance
        } else {
            AgentStatus::Idle
        };
        record.last_heartbeat = Utc::now();
        tracing::info!(agent, maintenance, "maintenance updated");
    }

    /// Snapshot for external reporting. Never used for control decisions.
    pub async fn system_health(&self) -> HealthSnapshot {
        let now = Utc::now();
        let state = self.state.read().await;

        let mut agents: Vec<AgentHealthRecord> = state
            .records
            .values()
            .map(|r| state.effective(r, now, self.ttl))
            .collect();
        agents.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));

        let mut status_counts = BTreeMap::new();
        for record in &agents {
            *status_counts
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        let active_consultations = agents.iter().map(|r| r.active_consultations).sum();

        HealthSnapshot {
            taken_at: now,
            agents,
            status_counts,
            active_consultations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_record_is_unknown() {
        let store = HealthStateStore::with_defaults();
        let record = store.get_state("ghost").await;
        assert_eq!(record.status, AgentStatus::Unknown);
        assert_eq!(record.agent_name, "ghost");
    }

    #[tokio::test]
    async fn test_update_and_read_back() {
        let store = HealthStateStore::with_defaults();
        store
            .update_state(AgentHealthRecord::new("knowledge", AgentStatus::Idle))
            .await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_ttl_expiry_reports_unknown() {
        let store = HealthStateStore::new(Duration::milliseconds(40));
        store
            .update_state(AgentHealthRecord::new("task", AgentStatus::Idle))
            .await;
        assert_eq!(store.get_state("task").await.status, AgentStatus::Idle);

        tokio::time::sleep(std::time::Duration::from_millis(70)).await;

        assert_eq!(store.get_state("task").await.status, AgentStatus::Unknown);
        let snapshot = store.system_health().await;
        assert_eq!(snapshot.record("task").map(|r| r.status), Some(AgentStatus::Unknown));
    }

    #[tokio::test]
    async fn test_update_resets_ttl() {
        let store = HealthStateStore::new(Duration::milliseconds(60));
        let mut record = AgentHealthRecord::new("search", AgentStatus::Idle);
        record.last_heartbeat = Utc::now() - Duration::hours(1);
        store.update_state(record).await;
        assert_eq!(store.get_state("search").await.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_consultation_lifecycle_updates_counts() {
        let store = HealthStateStore::with_defaults();

        store.begin_consultation("incident").await;
        store.begin_consultation("incident").await;
        let record = store.get_state("incident").await;
        assert_eq!(record.status, AgentStatus::Processing);
        assert_eq!(record.active_consultations, 2);

        store.finish_consultation("incident", true, 30, None).await;
        assert_eq!(store.get_state("incident").await.status, AgentStatus::Processing);

        store
            .finish_consultation("incident", false, 50, Some("boom".to_string()))
            .await;
        let record = store.get_state("incident").await;
        assert_eq!(record.status, AgentStatus::Error);
        assert_eq!(record.active_consultations, 0);
        assert_eq!(record.metrics.total_consultations, 2);
        assert_eq!(record.metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_maintenance_survives_consultations() {
        let store = HealthStateStore::with_defaults();
        store.set_maintenance("knowledge", true).await;
        store.begin_consultation("knowledge").await;
        store.finish_consultation("knowledge", true, 10, None).await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Maintenance);

        store.set_maintenance("knowledge", false).await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_system_health_aggregates() {
        let store = HealthStateStore::with_defaults();
        store
            .update_state(AgentHealthRecord::new("b", AgentStatus::Idle))
            .await;
        store
            .update_state(AgentHealthRecord::new("a", AgentStatus::Maintenance))
            .await;
        store.begin_consultation("c").await;

        let snapshot = store.system_health().await;
        let names: Vec<&str> = snapshot.agents.iter().map(|r| r.agent_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(snapshot.status_counts.get("idle"), Some(&1));
        assert_eq!(snapshot.status_counts.get("maintenance"), Some(&1));
        assert_eq!(snapshot.active_consultations, 1);
    }

    #[tokio::test]
    async fn test_apply_report_refreshes_heartbeat() {
        let store = HealthStateStore::new(Duration::milliseconds(40));
        store.apply_report("task", HealthReport::idle()).await;
        assert_eq!(store.get_state("task").await.status, AgentStatus::Idle);
        tokio::time::sleep(std::time::Duration::from_millis(70)).await;
        assert_eq!(store.get_state("task").await.status, AgentStatus::Unknown);
        store
            .apply_report("task", HealthReport::with_status(AgentStatus::Maintenance))
            .await;
        assert_eq!(store.get_state("task").await.status, AgentStatus::Maintenance);
    }

    #[tokio::test]
    async fn test_maintenance_outlives_ttl_and_self_reports() {
        let store = HealthStateStore::new(Duration::milliseconds(40));
        store.set_maintenance("knowledge", true).await;

        tokio::time::sleep(std::time::Duration::from_millis(70)).await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Maintenance);

        store.apply_report("knowledge", HealthReport::idle()).await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Maintenance);
        let snapshot = store.system_health().await;
        assert_eq!(snapshot.status_counts.get("maintenance"), Some(&1));

        store.set_maintenance("knowledge", false).await;
        store.apply_report("knowledge", HealthReport::idle()).await;
        assert_eq!(store.get_state("knowledge").await.status, AgentStatus::Idle);
    }
}
