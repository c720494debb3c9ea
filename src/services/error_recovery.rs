//! Error recovery for failed sage invocations.
//!
//! Recovery runs in a fixed order: the per-kind handler (usually a bounded
//! retry of the same sage), then the sage's registered fallback, then other
//! sages sharing a capability. The first step that yields a response wins.
//! Every completed recovery, successful or not, is appended to the recovery
//! journal. A cancelled consultation stops recovery at the next await.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::circuit_breaker::CircuitBreakerService;
use super::health_store::HealthStateStore;
use super::recovery_journal::RecoveryJournal;
use super::sage_registry::SageRegistry;
use crate::domain::errors::{AgentError, FailureKind};
use crate::domain::models::{
    AgentStatus, ConsultationQuery, ConsultationResponse, ErrorRecoveryResult, RecoveryAttempt, RecoveryConfig,
    RecoveryRecord, RecoveryStrategy,
};
use crate::domain::ports::Sage;

/// Metadata key set on responses produced by a fallback.
pub const FALLBACK_METADATA_KEY: &str = "fallback";

/// Caller-supplied fallback logic for one sage.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Produce a substitute answer, or `None` to continue recovery.
    async fn fallback(
        &self,
        agent: &str,
        query: &ConsultationQuery,
        error: &AgentError,
    ) -> Option<ConsultationResponse>;
}

/// Fallback registered for a sage.
#[derive(Clone)]
pub enum FallbackStrategy {
    /// Re-serve the sage's last successful response with reduced confidence.
    LastKnownGood,
    /// Answer with fixed content.
    Static { content: Value, confidence: f64 },
    Custom(Arc<dyn FallbackHandler>),
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastKnownGood => "last_known_good",
            Self::Static { .. } => "static",
            Self::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LastKnownGood => f.write_str("LastKnownGood"),
            Self::Static { content, confidence } => f
                .debug_struct("Static")
                .field("content", content)
                .field("confidence", confidence)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Time left before `deadline`, `None` once it has passed.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    (!left.is_zero()).then_some(left)
}

/// Invoke a sage under a time limit.
///
/// Elapsed limits become `Timeout` errors, and a response addressed to a
/// different query is rejected as `DataCorruption`.
pub(crate) async fn call_with_timeout(
    sage: &Arc<dyn Sage>,
    query: &ConsultationQuery,
    limit: Duration,
) -> Result<ConsultationResponse, AgentError> {
    let response = tokio::time::timeout(limit, sage.process_consultation(query))
        .await
        .map_err(|_| AgentError::timeout(format!("no answer within {} ms", limit.as_millis())))??;

    if response.query_id != query.id {
        return Err(AgentError::data_corruption(format!(
            "response addressed to query {} instead of {}",
            response.query_id, query.id
        )));
    }
    Ok(response)
}

/// Recovery manager shared by every collaboration pattern.
pub struct ErrorRecoveryManager {
    config: RecoveryConfig,
    agent_timeout: Duration,
    registry: Arc<SageRegistry>,
    circuits: Arc<CircuitBreakerService>,
    health: Option<Arc<HealthStateStore>>,
    fallbacks: Arc<RwLock<HashMap<String, FallbackStrategy>>>,
    last_known_good: Arc<RwLock<HashMap<String, ConsultationResponse>>>,
    journal: Arc<RecoveryJournal>,
}

impl ErrorRecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        agent_timeout: Duration,
        registry: Arc<SageRegistry>,
        circuits: Arc<CircuitBreakerService>,
    ) -> Self {
        let journal = Arc::new(RecoveryJournal::new(config.journal_capacity));
        Self {
            config,
            agent_timeout,
            registry,
            circuits,
            health: None,
            fallbacks: Arc::new(RwLock::new(HashMap::new())),
            last_known_good: Arc::new(RwLock::new(HashMap::new())),
            journal,
        }
    }

    /// Skip cross-agent candidates that the store reports in maintenance.
    pub fn with_health_store(mut self, health: Arc<HealthStateStore>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn journal(&self) -> Arc<RecoveryJournal> {
        Arc::clone(&self.journal)
    }

    pub async fn register_fallback(&self, agent: impl Into<String>, strategy: FallbackStrategy) {
        self.fallbacks.write().await.insert(agent.into(), strategy);
    }

    /// Remember a successful response for [`FallbackStrategy::LastKnownGood`].
    pub async fn remember_success(&self, agent: &str, response: &ConsultationResponse) {
        self.last_known_good
            .write()
            .await
            .insert(agent.to_string(), response.clone());
    }

    pub async fn last_known_good(&self, agent: &str) -> Option<ConsultationResponse> {
        self.last_known_good.read().await.get(agent).cloned()
    }

    /// Recover from `error` raised by `agent` while answering `query`.
    ///
    /// Sages listed in `consulted` already take part in the consultation
    /// and are not asked again as cross-agent fallbacks. An unrecoverable
    /// invocation yields `recovered = false` with the last diagnostic.
    ///
    /// Returns `None` once `cancel` fires: pending back-off sleeps and sage
    /// calls are abandoned, no further calls start and nothing is journaled.
    #[instrument(skip(self, error, query, deadline, cancel, consulted), fields(query_id = %query.id, kind = %error.kind))]
    pub async fn recover(
        &self,
        agent: &str,
        error: &AgentError,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> Option<ErrorRecoveryResult> {
        let Ok(result) = self
            .run_recovery(agent, error, query, deadline, cancel, consulted)
            .await
        else {
            tracing::debug!(agent, "recovery abandoned, consultation cancelled");
            return None;
        };

        if result.recovered {
            tracing::info!(
                agent,
                strategy = result.strategy.as_str(),
                responder = result.responder().unwrap_or_default(),
                "sage failure recovered"
            );
        } else {
            tracing::warn!(
                agent,
                attempts = result.attempts.len(),
                diagnostic = %result.diagnostic,
                "sage failure not recovered"
            );
        }

        self.journal
            .append(RecoveryRecord::from_result(query.id, agent, &error.message, &result))
            .await;
        Some(result)
    }

    async fn run_recovery(
        &self,
        agent: &str,
        error: &AgentError,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
    ) -> Step<ErrorRecoveryResult> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let kind = error.kind;
        let mut attempts = Vec::new();

        // A fallback re-issue that fails is reported to the originating recovery as-is.
        if query.is_fallback() {
            self.circuits.record_failure(agent, error.message.clone()).await;
            return Ok(ErrorRecoveryResult::unrecovered(kind, error.to_string(), attempts));
        }

        let mut diagnostic = error.to_string();

        if kind != FailureKind::CircuitOpen {
            if let Some(sage) = self.registry.get(agent) {
                match self
                    .retry(&sage, error, query, deadline, cancel, &mut attempts)
                    .await?
                {
                    Ok(response) => {
                        self.circuits.record_success(agent).await;
                        self.remember_success(agent, &response).await;
                        return Ok(ErrorRecoveryResult::recovered(
                            response,
                            RecoveryStrategy::Retry,
                            kind,
                            diagnostic,
                            attempts,
                        ));
                    }
                    Err(last) => diagnostic = last.to_string(),
                }
            }
            self.circuits.record_failure(agent, diagnostic.clone()).await;
        }

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if let Some(response) = self.agent_fallback(agent, error, query, &mut attempts).await {
            return Ok(ErrorRecoveryResult::recovered(
                response,
                RecoveryStrategy::AgentFallback,
                kind,
                diagnostic,
                attempts,
            ));
        }

        if let Some(response) = self
            .cross_agent_fallback(agent, query, deadline, cancel, consulted, &mut attempts)
            .await?
        {
            return Ok(ErrorRecoveryResult::recovered(
                response,
                RecoveryStrategy::CrossAgentFallback,
                kind,
                diagnostic,
                attempts,
            ));
        }

        if let Some(last) = attempts.iter().rev().find(|a| !a.succeeded) {
            diagnostic = format!("{diagnostic}; last attempt on {}: {}", last.target, last.detail);
        }
        Ok(ErrorRecoveryResult::unrecovered(kind, diagnostic, attempts))
    }

    /// Per-kind handler. The inner result carries the last error when
    /// nothing succeeded.
    async fn retry(
        &self,
        sage: &Arc<dyn Sage>,
        error: &AgentError,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        attempts: &mut Vec<RecoveryAttempt>,
    ) -> Step<Result<ConsultationResponse, AgentError>> {
        match error.kind {
            FailureKind::Timeout => {
                let limit = self.shortened_timeout();
                self.retry_once(sage, query, limit, deadline, cancel, attempts)
                    .await
            }
            FailureKind::ResourceExhaustion => {
                let delay = Duration::from_millis(self.config.resource_retry_delay_ms);
                match remaining(deadline) {
                    Some(left) if left > delay => {
                        sleep_unless_cancelled(delay, cancel).await?;
                        self.retry_once(sage, query, self.agent_timeout, deadline, cancel, attempts)
                            .await
                    }
                    _ => Ok(Err(AgentError::timeout("deadline too close to retry"))),
                }
            }
            FailureKind::NetworkFailure => {
                self.retry_network(sage, error, query, deadline, cancel, attempts)
                    .await
            }
            FailureKind::DataCorruption
            | FailureKind::ModelError
            | FailureKind::CircuitOpen
            | FailureKind::Validation => Ok(Err(error.clone())),
        }
    }

    fn shortened_timeout(&self) -> Duration {
        let factor = if self.config.timeout_retry_factor.is_finite() {
            self.config.timeout_retry_factor.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(self.agent_timeout.as_secs_f64() * factor)
    }

    async fn retry_once(
        &self,
        sage: &Arc<dyn Sage>,
        query: &ConsultationQuery,
        limit: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
        attempts: &mut Vec<RecoveryAttempt>,
    ) -> Step<Result<ConsultationResponse, AgentError>> {
        let Some(left) = remaining(deadline) else {
            return Ok(Err(AgentError::timeout("consultation deadline exceeded")));
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled),
            result = call_with_timeout(sage, query, limit.min(left)) => result,
        };
        attempts.push(match &result {
            Ok(_) => RecoveryAttempt::succeeded(RecoveryStrategy::Retry, sage.name(), "retry answered"),
            Err(err) => RecoveryAttempt::failed(RecoveryStrategy::Retry, sage.name(), err.to_string()),
        });
        Ok(result)
    }

    /// Exponential backoff retries while the failure stays a network failure.
    async fn retry_network(
        &self,
        sage: &Arc<dyn Sage>,
        error: &AgentError,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        attempts: &mut Vec<RecoveryAttempt>,
    ) -> Step<Result<ConsultationResponse, AgentError>> {
        let mut policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_randomization_factor(0.2)
            .with_max_elapsed_time(None)
            .build();

        let mut last = error.clone();
        for _ in 0..self.config.max_network_retries {
            let Some(delay) = policy.next_backoff() else {
                break;
            };
            match remaining(deadline) {
                Some(left) if left > delay => sleep_unless_cancelled(delay, cancel).await?,
                _ => break,
            }

            match self
                .retry_once(sage, query, self.agent_timeout, deadline, cancel, attempts)
                .await?
            {
                Ok(response) => return Ok(Ok(response)),
                Err(err) if err.kind == FailureKind::NetworkFailure => last = err,
                Err(err) => return Ok(Err(err)),
            }
        }
        Ok(Err(last))
    }

    async fn agent_fallback(
        &self,
        agent: &str,
        error: &AgentError,
        query: &ConsultationQuery,
        attempts: &mut Vec<RecoveryAttempt>,
    ) -> Option<ConsultationResponse> {
        let strategy = self.fallbacks.read().await.get(agent).cloned()?;
        let label = strategy.as_str();

        let response = match strategy {
            FallbackStrategy::LastKnownGood => self.last_known_good(agent).await.map(|cached| {
                let mut response =
                    cached.retarget(query.id, self.config.cached_confidence_factor);
                response
                    .metadata
                    .insert(FALLBACK_METADATA_KEY.to_string(), json!(label));
                response
            }),
            FallbackStrategy::Static { content, confidence } => Some(
                ConsultationResponse::builder(query.id, agent)
                    .content(content)
                    .confidence(confidence)
                    .metadata(FALLBACK_METADATA_KEY, json!(label))
                    .build(),
            ),
            FallbackStrategy::Custom(handler) => handler
                .fallback(agent, query, error)
                .await
                .map(|mut response| {
                    response.query_id = query.id;
                    response
                        .metadata
                        .entry(FALLBACK_METADATA_KEY.to_string())
                        .or_insert_with(|| json!(label));
                    response
                }),
        };

        attempts.push(match response {
            Some(_) => RecoveryAttempt::succeeded(RecoveryStrategy::AgentFallback, agent, label),
            None => RecoveryAttempt::failed(
                RecoveryStrategy::AgentFallback,
                agent,
                format!("{label} fallback had nothing to offer"),
            ),
        });
        response
    }

    async fn in_maintenance(&self, agent: &str) -> bool {
        match &self.health {
            Some(store) => store.get_state(agent).await.status == AgentStatus::Maintenance,
            None => false,
        }
    }

    /// Fallback call to `candidate`, counted in its health record like any
    /// other invocation.
    async fn call_candidate(
        &self,
        candidate: &str,
        sage: &Arc<dyn Sage>,
        query: &ConsultationQuery,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Step<Result<ConsultationResponse, AgentError>> {
        if let Some(store) = &self.health {
            store.begin_consultation(candidate).await;
        }
        let started = std::time::Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = call_with_timeout(sage, query, limit) => Some(result),
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Some(store) = &self.health {
            let (success, error) = match &result {
                Some(Ok(_)) => (true, None),
                Some(Err(err)) => (false, Some(err.to_string())),
                None => (false, Some("cancelled".to_string())),
            };
            store
                .finish_consultation(candidate, success, latency_ms, error)
                .await;
        }
        result.ok_or(Cancelled)
    }

    /// Ask other sages with an overlapping capability, in name order.
    async fn cross_agent_fallback(
        &self,
        agent: &str,
        query: &ConsultationQuery,
        deadline: Instant,
        cancel: &CancellationToken,
        consulted: &[String],
        attempts: &mut Vec<RecoveryAttempt>,
    ) -> Step<Option<ConsultationResponse>> {
        let fallback_query = query.as_fallback_for(agent);
        let mut tried = 0;

        for candidate in self.registry.overlapping(agent) {
            if tried >= self.config.max_cross_agent_attempts {
                break;
            }
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if consulted.contains(&candidate) || self.in_maintenance(&candidate).await {
                continue;
            }
            let Some(left) = remaining(deadline) else {
                return Ok(None);
            };
            let Some(sage) = self.registry.get(&candidate) else {
                continue;
            };
            if self.circuits.check(&candidate).await.is_blocked() {
                attempts.push(RecoveryAttempt::failed(
                    RecoveryStrategy::CrossAgentFallback,
                    &candidate,
                    "circuit open",
                ));
                continue;
            }

            tried += 1;
            let limit = self.agent_timeout.min(left);
            match self
                .call_candidate(&candidate, &sage, &fallback_query, limit, cancel)
                .await?
            {
                Ok(response) => {
                    self.circuits.record_success(&candidate).await;
                    self.remember_success(&candidate, &response).await;
                    attempts.push(RecoveryAttempt::succeeded(
                        RecoveryStrategy::CrossAgentFallback,
                        &candidate,
                        format!("answered for {agent}"),
                    ));
                    return Ok(Some(response));
                }
                Err(err) => {
                    self.circuits.record_failure(&candidate, err.to_string()).await;
                    attempts.push(RecoveryAttempt::failed(
                        RecoveryStrategy::CrossAgentFallback,
                        &candidate,
                        err.to_string(),
                    ));
                }
            }
        }
        Ok(None)
    }
}

/// Recovery abandoned because the consultation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cancelled;

type Step<T> = Result<T, Cancelled>;

async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> Step<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
