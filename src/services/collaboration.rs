//! Collaboration patterns.
//!
//! The executor runs a set of sages under one of four patterns and reports
//! one [`AgentOutcome`] per selected sage. It never fails: every problem
//! ends up as an outcome status that the orchestrator turns into an audit
//! entry.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::circuit_breaker::CircuitBreakerService;
use super::error_recovery::{call_with_timeout, remaining, ErrorRecoveryManager};
use super::health_store::HealthStateStore;
use super::sage_registry::SageRegistry;
use crate::domain::errors::{AgentError, FailureKind};
use crate::domain::models::{
    AuditDisposition, CollaborationPattern, ConsultationContext, ConsultationQuery,
    ConsultationResponse, ErrorRecoveryResult, RecoveryStrategy, SkipReason,
};

/// Which sages to run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub pattern: CollaborationPattern,
    /// Dispatch order for sequential; any order otherwise.
    pub agents: Vec<String>,
    /// Explicit supervisor for the hierarchical pattern.
    pub supervisor: Option<String>,
}

impl ExecutionPlan {
    pub fn new(pattern: CollaborationPattern, agents: Vec<String>) -> Self {
        Self {
            pattern,
            agents,
            supervisor: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: impl Into<String>) -> Self {
        self.supervisor = Some(supervisor.into());
        self
    }
}

/// What happened to one sage.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Contributed(ConsultationResponse),
    Recovered {
        response: ConsultationResponse,
        strategy: RecoveryStrategy,
    },
    Failed {
        kind: FailureKind,
        diagnostic: String,
    },
    TimedOut,
    Skipped(SkipReason),
}

/// Outcome for one selected sage (the slot), whoever answered for it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub agent: String,
    pub status: OutcomeStatus,
}

impl AgentOutcome {
    pub fn new(agent: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            agent: agent.into(),
            status,
        }
    }

    pub fn skipped(agent: impl Into<String>, reason: SkipReason) -> Self {
        Self::new(agent, OutcomeStatus::Skipped(reason))
    }

    /// Response usable for synthesis, if any.
    pub fn response(&self) -> Option<&ConsultationResponse> {
        match &self.status {
            OutcomeStatus::Contributed(response) | OutcomeStatus::Recovered { response, .. } => {
                Some(response)
            }
            _ => None,
        }
    }

    /// Skipped before any call was attempted.
    pub fn is_pre_dispatch_skip(&self) -> bool {
        matches!(&self.status, OutcomeStatus::Skipped(reason) if reason.is_pre_dispatch())
    }

    pub fn disposition(&self) -> AuditDisposition {
        match &self.status {
            OutcomeStatus::Contributed(_) => AuditDisposition::Contributed,
            OutcomeStatus::Recovered { response, strategy } => AuditDisposition::Recovered {
                strategy: *strategy,
                responder: response.agent_name.clone(),
            },
            OutcomeStatus::Failed { kind, diagnostic } => AuditDisposition::Failed {
                kind: *kind,
                diagnostic: diagnostic.clone(),
            },
            OutcomeStatus::TimedOut => AuditDisposition::TimedOut,
            OutcomeStatus::Skipped(reason) => AuditDisposition::Skipped { reason: *reason },
        }
    }
}

/// Outcomes of one execution plus the concrete pattern that ran.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub pattern: CollaborationPattern,
    pub outcomes: Vec<AgentOutcome>,
}

/// Runs collaboration patterns over guarded sage invocations.
#[derive(Clone)]
pub struct CollaborationExecutor {
    registry: Arc<SageRegistry>,
    circuits: Arc<CircuitBreakerService>,
    health: Arc<HealthStateStore>,
    recovery: Arc<ErrorRecoveryManager>,
    agent_timeout: Duration,
    max_hierarchy_depth: usize,
}

impl CollaborationExecutor {
    pub fn new(
        registry: Arc<SageRegistry>,
        circuits: Arc<CircuitBreakerService>,
        health: Arc<HealthStateStore>,
        recovery: Arc<ErrorRecoveryManager>,
        agent_timeout: Duration,
        max_hierarchy_depth: usize,
    ) -> Self {
        Self {
            registry,
            circuits,
            health,
            recovery,
            agent_timeout,
            max_hierarchy_depth,
        }
    }

    /// Run `plan` for `query`. `Adaptive` is resolved here from the
    /// query priority and the number of sages in the plan.
    #[instrument(skip_all, fields(query_id = %query.id, pattern = %plan.pattern, agents = plan.agents.len()))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let pattern = plan.pattern.resolve(query.priority, plan.agents.len());
        if pattern != plan.pattern {
            tracing::debug!(resolved = %pattern, "adaptive pattern resolved");
        }

        let outcomes = match pattern {
            CollaborationPattern::Sequential => {
                self.run_sequential(&plan.agents, query, deadline, cancel, &plan.agents)
                    .await
            }
            CollaborationPattern::Hierarchical => {
                self.run_hierarchical(plan, query, deadline, cancel).await
            }
            CollaborationPattern::Parallel | CollaborationPattern::Adaptive => {
                self.run_parallel(&plan.agents, query, deadline, cancel, &plan.agents)
                    .await
            }
        };

        ExecutionReport { pattern, outcomes }
    }

    /// Outcome for a sage whose circuit refuses calls: straight to fallback.
    pub async fn circuit_blocked(
        &self,
        agent: &str,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> AgentOutcome {
        let error = AgentError::circuit_open(agent);
        let Some(result) = self
            .recovery
            .recover(agent, &error, query, deadline, cancel, consulted)
            .await
        else {
            return AgentOutcome::skipped(agent, SkipReason::Cancelled);
        };
        match Self::recovered(result) {
            Some(status) => AgentOutcome::new(agent, status),
            None => AgentOutcome::skipped(agent, SkipReason::CircuitOpen),
        }
    }

    /// One guarded invocation: circuit check, health bookkeeping, bounded
    /// call, then circuit accounting or recovery.
    #[instrument(skip(self, query, deadline, cancel, consulted), fields(query_id = %query.id))]
    pub async fn invoke(
        &self,
        agent: &str,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> AgentOutcome {
        let Some(sage) = self.registry.get(agent) else {
            return AgentOutcome::new(
                agent,
                OutcomeStatus::Failed {
                    kind: FailureKind::Validation,
                    diagnostic: format!("sage '{agent}' is not registered"),
                },
            );
        };
        if cancel.is_cancelled() {
            return AgentOutcome::skipped(agent, SkipReason::Cancelled);
        }
        let Some(left) = remaining(deadline) else {
            return AgentOutcome::skipped(agent, SkipReason::DeadlineExceeded);
        };

        if self.circuits.check(agent).await.is_blocked() {
            return self
                .circuit_blocked(agent, query, deadline, cancel, consulted)
                .await;
        }

        self.health.begin_consultation(agent).await;
        let started = std::time::Instant::now();
        let result = tokio::select! {
            result = call_with_timeout(&sage, query, self.agent_timeout.min(left)) => Some(result),
            () = cancel.cancelled() => None,
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let Some(result) = result else {
            self.health
                .finish_consultation(agent, false, latency_ms, Some("cancelled".to_string()))
                .await;
            return AgentOutcome::skipped(agent, SkipReason::Cancelled);
        };

        self.health
            .finish_consultation(
                agent,
                result.is_ok(),
                latency_ms,
                result.as_ref().err().map(ToString::to_string),
            )
            .await;

        match result {
            Ok(response) => {
                self.circuits.record_success(agent).await;
                self.recovery.remember_success(agent, &response).await;
                tracing::debug!(agent, confidence = response.confidence, latency_ms, "sage answered");
                AgentOutcome::new(agent, OutcomeStatus::Contributed(response))
            }
            Err(error) => {
                tracing::warn!(agent, kind = %error.kind, error = %error.message, "sage invocation failed");
                let Some(result) = self
                    .recovery
                    .recover(agent, &error, query, deadline, cancel, consulted)
                    .await
                else {
                    return AgentOutcome::skipped(agent, SkipReason::Cancelled);
                };
                let kind = result.kind;
                let diagnostic = result.diagnostic.clone();
                Self::recovered(result).map_or_else(
                    || {
                        let status = if kind == FailureKind::Timeout {
                            OutcomeStatus::TimedOut
                        } else {
                            OutcomeStatus::Failed { kind, diagnostic }
                        };
                        AgentOutcome::new(agent, status)
                    },
                    |status| AgentOutcome::new(agent, status),
                )
            }
        }
    }

    fn recovered(result: ErrorRecoveryResult) -> Option<OutcomeStatus> {
        if !result.recovered {
            return None;
        }
        let strategy = result.strategy;
        result
            .response
            .map(|response| OutcomeStatus::Recovered { response, strategy })
    }

    /// Strict order; each sage sees every earlier response in its context.
    async fn run_sequential(
        &self,
        agents: &[String],
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> Vec<AgentOutcome> {
        let mut context = ConsultationContext::new(query.context.clone());
        let mut outcomes = Vec::with_capacity(agents.len());

        for agent in agents {
            if cancel.is_cancelled() {
                outcomes.push(AgentOutcome::skipped(agent, SkipReason::Cancelled));
                continue;
            }
            if remaining(deadline).is_none() {
                outcomes.push(AgentOutcome::skipped(agent, SkipReason::DeadlineExceeded));
                continue;
            }

            let step_query = query.with_context(context.materialize());
            let outcome = self
                .invoke(agent, &step_query, deadline, cancel, consulted)
                .await;
            if let Some(response) = outcome.response() {
                context = context.append(agent.clone(), response.clone());
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Concurrent dispatch under one shared deadline; outcomes sorted by name.
    async fn run_parallel(
        &self,
        agents: &[String],
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> Vec<AgentOutcome> {
        let child = cancel.child_token();
        let consulted: Arc<[String]> = consulted.into();
        let mut pending = FuturesUnordered::new();

        for agent in agents {
            let executor = self.clone();
            let agent = agent.clone();
            let query = query.clone();
            let token = child.clone();
            let consulted = Arc::clone(&consulted);
            let handle = tokio::spawn({
                let agent = agent.clone();
                async move {
                    executor
                        .invoke(&agent, &query, deadline, &token, &consulted)
                        .await
                }
            });
            pending.push(async move { (agent, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(agents.len());
        let mut finished = HashSet::new();
        let deadline_sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline_sleep);

        let unfinished = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Some(SkipReason::Cancelled),
                () = &mut deadline_sleep => break None,
                next = pending.next() => match next {
                    Some((agent, Ok(outcome))) => {
                        finished.insert(agent);
                        outcomes.push(outcome);
                    }
                    Some((agent, Err(join_error))) => {
                        tracing::error!(agent = %agent, error = %join_error, "sage task aborted");
                        finished.insert(agent.clone());
                        outcomes.push(AgentOutcome::new(
                            agent,
                            OutcomeStatus::Failed {
                                kind: FailureKind::ModelError,
                                diagnostic: format!("sage task aborted: {join_error}"),
                            },
                        ));
                    }
                    None => break None,
                },
            }
        };

        // Late results are discarded
        child.cancel();
        for agent in agents {
            if !finished.contains(agent) {
                outcomes.push(match unfinished {
                    Some(reason) => AgentOutcome::skipped(agent, reason),
                    None => AgentOutcome::new(agent, OutcomeStatus::TimedOut),
                });
            }
        }

        outcomes.sort_by(|a, b| a.agent.cmp(&b.agent));
        outcomes
    }

    /// Supervisor first, then waves of designated sages.
    async fn run_hierarchical(
        &self,
        plan: &ExecutionPlan,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<AgentOutcome> {
        let selected: BTreeSet<&str> = plan.agents.iter().map(String::as_str).collect();
        let supervisor = plan
            .supervisor
            .as_deref()
            .filter(|s| selected.contains(s))
            .or_else(|| plan.agents.first().map(String::as_str));
        let Some(supervisor) = supervisor.map(str::to_string) else {
            return Vec::new();
        };

        let supervisor_outcome = self
            .invoke(&supervisor, query, deadline, cancel, &plan.agents)
            .await;
        let mut visited: BTreeSet<String> = BTreeSet::from([supervisor.clone()]);
        let mut outcomes = Vec::with_capacity(plan.agents.len());

        let Some(supervisor_response) = supervisor_outcome.response().cloned() else {
            tracing::warn!(supervisor = %supervisor, "supervisor could not contribute, falling back to parallel");
            outcomes.push(supervisor_outcome);
            let rest: Vec<String> = plan
                .agents
                .iter()
                .filter(|a| !visited.contains(*a))
                .cloned()
                .collect();
            outcomes.extend(
                self.run_parallel(&rest, query, deadline, cancel, &plan.agents)
                    .await,
            );
            outcomes.sort_by(|a, b| a.agent.cmp(&b.agent));
            return outcomes;
        };
        outcomes.push(supervisor_outcome);

        let mut context = ConsultationContext::new(query.context.clone())
            .append(supervisor.clone(), supervisor_response.clone());
        let mut wave = Self::designated(&[supervisor_response], &selected, &visited);
        let mut depth = 1;

        while !wave.is_empty() && depth <= self.max_hierarchy_depth {
            visited.extend(wave.iter().cloned());
            let wave_query = query.with_context(context.materialize());
            let wave_outcomes = self
                .run_parallel(&wave, &wave_query, deadline, cancel, &plan.agents)
                .await;

            let responses: Vec<ConsultationResponse> = wave_outcomes
                .iter()
                .filter_map(AgentOutcome::response)
                .cloned()
                .collect();
            for (outcome, response) in wave_outcomes
                .iter()
                .filter_map(|o| o.response().map(|r| (o, r)))
            {
                context = context.append(outcome.agent.clone(), response.clone());
            }
            outcomes.extend(wave_outcomes);

            wave = Self::designated(&responses, &selected, &visited);
            depth += 1;
        }

        for agent in &plan.agents {
            if !visited.contains(agent) {
                outcomes.push(AgentOutcome::skipped(agent, SkipReason::NotDesignated));
            }
        }

        outcomes.sort_by(|a, b| a.agent.cmp(&b.agent));
        outcomes
    }

    /// Selected, not yet visited sages named in `delegate_to`, sorted.
    fn designated(
        responses: &[ConsultationResponse],
        selected: &BTreeSet<&str>,
        visited: &BTreeSet<String>,
    ) -> Vec<String> {
        let mut next = BTreeSet::new();
        for response in responses {
            for name in response.delegates() {
                if visited.contains(&name) {
                    continue;
                }
                if selected.contains(name.as_str()) {
                    next.insert(name);
                } else {
                    tracing::debug!(
                        delegate = %name,
                        from = %response.agent_name,
                        "ignoring delegation to a sage outside the selection"
                    );
                }
            }
        }
        next.into_iter().collect()
    }
}
