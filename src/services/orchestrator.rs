//! Consultation orchestrator.
//!
//! Entry point for callers. A consultation moves through
//! `Received → RequirementAnalyzed → Dispatched → Synthesizing` and ends in
//! `Completed` or `Degraded`. Only a malformed query is reported as an
//! error; every sage-side problem becomes part of the audit trail.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitStats};
use super::collaboration::{AgentOutcome, CollaborationExecutor, ExecutionPlan, ExecutionReport};
use super::error_recovery::ErrorRecoveryManager;
use super::health_store::{HealthSnapshot, HealthStateStore};
use super::sage_registry::SageRegistry;
use super::synthesis::synthesize;
use crate::domain::errors::ConsultationError;
use crate::domain::models::{
    AgentHealthRecord, AgentStatus, AuditTrail, CollaborationPattern, CollaborativeResponse,
    Config, ConsultationPhase, ConsultationQuery, HealthConfig, OrchestratorConfig, QueryKind,
    ResponseQuality, SkipReason,
};

/// Context key adding sages to the selection.
pub const REQUIRED_AGENTS_KEY: &str = "required_agents";
/// Context key removing sages from the selection.
pub const EXCLUDED_AGENTS_KEY: &str = "excluded_agents";
/// Context key forcing a collaboration pattern.
pub const PATTERN_KEY: &str = "collaboration_pattern";
/// Context key naming the hierarchical supervisor.
pub const SUPERVISOR_KEY: &str = "supervisor";

/// Result of requirement analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirements {
    /// Query kinds the selection was built from (empty means every sage).
    pub kinds: BTreeSet<QueryKind>,
    /// Selected sages, required ones first.
    pub agents: Vec<String>,
    pub pattern: CollaborationPattern,
    pub supervisor: Option<String>,
}

/// Read-only snapshot for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub taken_at: DateTime<Utc>,
    /// Effective health of every registered sage, ordered by name.
    pub agents: Vec<AgentHealthRecord>,
    pub status_counts: BTreeMap<String, usize>,
    /// Consultations currently inside `consult`.
    pub active_consultations: usize,
    /// Sage invocations currently in flight.
    pub in_flight_invocations: u32,
    pub circuits: Vec<CircuitStats>,
}

/// Kinds suggested by words in free-form content.
fn infer_kinds(content: &str) -> BTreeSet<QueryKind> {
    let lowered = content.to_lowercase();
    let mut kinds = BTreeSet::new();
    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        let kind = match word {
            "incident" | "outage" | "error" | "errors" | "failure" | "down" => {
                QueryKind::IncidentAnalysis
            }
            "plan" | "estimate" | "schedule" | "roadmap" => QueryKind::TaskPlanning,
            "search" | "find" | "locate" => QueryKind::InformationSearch,
            "how" | "what" | "why" | "explain" => QueryKind::KnowledgeLookup,
            _ => continue,
        };
        kinds.insert(kind);
    }
    kinds
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Routes consultations to sages and merges their answers.
pub struct ConsultationOrchestrator {
    config: OrchestratorConfig,
    health_config: HealthConfig,
    registry: Arc<SageRegistry>,
    health: Arc<HealthStateStore>,
    circuits: Arc<CircuitBreakerService>,
    recovery: Arc<ErrorRecoveryManager>,
    executor: CollaborationExecutor,
    active: AtomicUsize,
}

impl ConsultationOrchestrator {
    pub fn new(config: &Config, registry: SageRegistry) -> Self {
        let registry = Arc::new(registry);
        let circuits = Arc::new(CircuitBreakerService::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        )));
        let health = Arc::new(HealthStateStore::from_config(&config.health));
        let agent_timeout = Duration::from_millis(config.orchestrator.agent_timeout_ms);
        let recovery = Arc::new(
            ErrorRecoveryManager::new(
                config.recovery.clone(),
                agent_timeout,
                Arc::clone(&registry),
                Arc::clone(&circuits),
            )
            .with_health_store(Arc::clone(&health)),
        );
        let executor = CollaborationExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&circuits),
            Arc::clone(&health),
            Arc::clone(&recovery),
            agent_timeout,
            config.orchestrator.max_hierarchy_depth,
        );

        Self {
            config: config.orchestrator.clone(),
            health_config: config.health.clone(),
            registry,
            health,
            circuits,
            recovery,
            executor,
            active: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SageRegistry> {
        &self.registry
    }

    pub fn health_store(&self) -> &Arc<HealthStateStore> {
        &self.health
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerService> {
        &self.circuits
    }

    /// Recovery manager, for registering fallbacks and reading the journal.
    pub fn recovery(&self) -> &Arc<ErrorRecoveryManager> {
        &self.recovery
    }

    pub async fn consult(
        &self,
        query: ConsultationQuery,
    ) -> Result<CollaborativeResponse, ConsultationError> {
        self.consult_with_cancellation(query, CancellationToken::new())
            .await
    }

    /// Run a consultation that the caller may cancel.
    ///
    /// Cancellation stops dispatching and marks unfinished sages as
    /// skipped; the response is still returned.
    #[instrument(skip_all, fields(query_id = %query.id, kind = %query.kind, priority = query.priority.as_str()))]
    pub async fn consult_with_cancellation(
        &self,
        query: ConsultationQuery,
        cancel: CancellationToken,
    ) -> Result<CollaborativeResponse, ConsultationError> {
        if let Err(err) = query.validate(self.config.max_content_length) {
            tracing::warn!(error = %err, "consultation rejected");
            return Err(err);
        }

        let _active = ActiveGuard::enter(&self.active);
        let started = std::time::Instant::now();
        let budget = query.timeout_ms.unwrap_or(self.config.default_deadline_ms);
        let deadline = Instant::now() + Duration::from_millis(budget);
        let mut phases = vec![ConsultationPhase::Received];

        let requirements = self.analyze(&query);
        Self::advance(&mut phases, ConsultationPhase::RequirementAnalyzed);
        tracing::info!(
            agents = ?requirements.agents,
            pattern = %requirements.pattern,
            "requirements analysed"
        );

        let (healthy, mut outcomes) = self.filter_by_health(&requirements.agents).await;

        let mut dispatch = Vec::with_capacity(healthy.len());
        for agent in healthy {
            if self.circuits.is_blocking(&agent).await {
                tracing::info!(agent = %agent, "circuit open, skipping dispatch");
                outcomes.push(
                    self.executor
                        .circuit_blocked(&agent, &query, deadline, &cancel, &requirements.agents)
                        .await,
                );
            } else {
                dispatch.push(agent);
            }
        }
        Self::advance(&mut phases, ConsultationPhase::Dispatched);

        let report = if dispatch.is_empty() {
            ExecutionReport {
                pattern: requirements.pattern.resolve(query.priority, 0),
                outcomes: Vec::new(),
            }
        } else {
            let plan = ExecutionPlan {
                pattern: requirements.pattern,
                agents: dispatch,
                supervisor: requirements.supervisor.clone(),
            };
            self.executor.execute(&plan, &query, deadline, &cancel).await
        };
        Self::advance(&mut phases, ConsultationPhase::Synthesizing);

        outcomes.extend(report.outcomes);
        let synthesis = synthesize(&outcomes);
        let terminal = match synthesis.quality {
            ResponseQuality::Complete => ConsultationPhase::Completed,
            ResponseQuality::Degraded => ConsultationPhase::Degraded,
        };
        Self::advance(&mut phases, terminal);

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            pattern = %report.pattern,
            quality = ?synthesis.quality,
            confidence = synthesis.confidence,
            contributors = synthesis.responses.len(),
            selected = outcomes.len(),
            duration_ms,
            "consultation finished"
        );

        Ok(CollaborativeResponse {
            query_id: query.id,
            pattern: report.pattern,
            quality: synthesis.quality,
            phase: terminal,
            confidence: synthesis.confidence,
            responses: synthesis.responses,
            sources: synthesis.sources,
            suggestions: synthesis.suggestions,
            next_actions: synthesis.next_actions,
            audit: AuditTrail {
                entries: synthesis.audit,
                phases,
            },
            completed_at: Utc::now(),
            duration_ms,
        })
    }

    fn advance(phases: &mut Vec<ConsultationPhase>, next: ConsultationPhase) {
        if let Some(current) = phases.last() {
            if !current.can_transition_to(next) {
                tracing::error!(from = ?current, to = ?next, "invalid consultation phase transition");
            }
        }
        phases.push(next);
    }

    /// Select sages and a pattern for `query`.
    pub fn analyze(&self, query: &ConsultationQuery) -> Requirements {
        let kinds: BTreeSet<QueryKind> = if query.kind == QueryKind::GeneralCollaboration {
            infer_kinds(&query.content)
        } else {
            BTreeSet::from([query.kind])
        };

        let mut candidates: BTreeSet<String> = if kinds.is_empty() {
            self.registry.names().into_iter().collect()
        } else {
            kinds
                .iter()
                .flat_map(|kind| self.registry.with_capability(*kind))
                .collect()
        };
        if query.kind == QueryKind::GeneralCollaboration {
            candidates.extend(self.registry.with_capability(QueryKind::GeneralCollaboration));
        }

        let excluded: BTreeSet<String> = query.context_str_list(EXCLUDED_AGENTS_KEY).into_iter().collect();
        let supervisor = query
            .context_str(SUPERVISOR_KEY)
            .filter(|s| self.registry.contains(s) && !excluded.contains(*s))
            .map(str::to_string);

        let mut required: Vec<String> = Vec::new();
        for name in supervisor
            .iter()
            .cloned()
            .chain(query.context_str_list(REQUIRED_AGENTS_KEY))
        {
            if !self.registry.contains(&name) {
                tracing::warn!(agent = %name, "required sage is not registered");
                continue;
            }
            if !required.contains(&name) {
                required.push(name);
            }
        }

        let mut agents: Vec<String> = required
            .into_iter()
            .chain(candidates)
            .filter(|name| !excluded.contains(name))
            .fold(Vec::new(), |mut acc, name| {
                if !acc.contains(&name) {
                    acc.push(name);
                }
                acc
            });
        agents.truncate(self.config.max_agents_per_consultation.max(1));

        let forced = query
            .context_str(PATTERN_KEY)
            .and_then(CollaborationPattern::parse_str);
        let pattern = match forced {
            Some(pattern) => pattern,
            None if supervisor.is_some() => CollaborationPattern::Hierarchical,
            None if agents.len() == 1 => CollaborationPattern::Sequential,
            None => CollaborationPattern::Adaptive,
        };

        Requirements {
            kinds,
            agents,
            pattern,
            supervisor,
        }
    }

    /// Split the selection into dispatchable sages and pre-dispatch skips.
    ///
    /// Unknown sages are probed first. When nothing healthy remains, unknown
    /// sages are dispatched anyway; maintenance sages never are.
    async fn filter_by_health(&self, agents: &[String]) -> (Vec<String>, Vec<AgentOutcome>) {
        let statuses = join_all(agents.iter().map(|agent| self.effective_status(agent))).await;

        let mut healthy = Vec::new();
        let mut unknown = Vec::new();
        let mut skipped = Vec::new();
        for (agent, status) in agents.iter().zip(statuses) {
            if status.is_routable() {
                healthy.push(agent.clone());
            } else if status == AgentStatus::Maintenance {
                skipped.push(AgentOutcome::skipped(agent, SkipReason::Maintenance));
            } else {
                unknown.push(agent.clone());
            }
        }

        if healthy.is_empty() && !unknown.is_empty() {
            tracing::warn!(agents = ?unknown, "no healthy sages, dispatching sages of unknown health");
            return (unknown, skipped);
        }
        skipped.extend(
            unknown
                .into_iter()
                .map(|agent| AgentOutcome::skipped(agent, SkipReason::UnknownHealth)),
        );
        (healthy, skipped)
    }

    async fn effective_status(&self, agent: &str) -> AgentStatus {
        let status = self.health.get_state(agent).await.status;
        if status != AgentStatus::Unknown {
            return status;
        }
        if self.probe(agent).await {
            self.health.get_state(agent).await.status
        } else {
            AgentStatus::Unknown
        }
    }

    /// Ask a sage for its health under the probe timeout.
    async fn probe(&self, agent: &str) -> bool {
        let Some(sage) = self.registry.get(agent) else {
            return false;
        };
        let limit = Duration::from_millis(self.health_config.probe_timeout_ms);
        match tokio::time::timeout(limit, sage.health_check()).await {
            Ok(report) => {
                self.health.apply_report(agent, report).await;
                true
            }
            Err(_) => {
                tracing::warn!(agent, timeout_ms = self.health_config.probe_timeout_ms, "health probe timed out");
                false
            }
        }
    }

    /// Probe every registered sage and return the resulting snapshot.
    pub async fn refresh_health(&self) -> HealthSnapshot {
        let names = self.registry.names();
        join_all(names.iter().map(|name| self.probe(name))).await;
        self.health.system_health().await
    }

    /// Snapshot of sage health, active consultations and circuit states.
    pub async fn system_health(&self) -> SystemHealth {
        let snapshot = self.health.system_health().await;
        let mut agents = Vec::with_capacity(self.registry.len());
        for name in self.registry.names() {
            let record = snapshot
                .record(&name)
                .cloned()
                .unwrap_or_else(|| AgentHealthRecord::unknown(name));
            agents.push(record);
        }

        let mut status_counts = BTreeMap::new();
        for record in &agents {
            *status_counts
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        SystemHealth {
            taken_at: snapshot.taken_at,
            agents,
            status_counts,
            active_consultations: self.active.load(Ordering::SeqCst),
            in_flight_invocations: snapshot.active_consultations,
            circuits: self.circuits.stats().await,
        }
    }
}
