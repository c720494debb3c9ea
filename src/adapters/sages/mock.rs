//! Scriptable mock sage for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::domain::errors::AgentError;
use crate::domain::models::{
    AgentStatus, ConsultationQuery, ConsultationResponse, HealthReport, PerformanceMetrics, QueryKind,
};
use crate::domain::ports::Sage;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    /// Response content
    pub content: Value,
    /// Reported confidence
    pub confidence: f64,
    pub sources: Vec<String>,
    pub suggestions: Vec<String>,
    pub next_actions: Vec<String>,
    /// Sages designated for the next hierarchical wave
    pub delegate_to: Vec<String>,
    /// Error to raise instead of answering
    pub error: Option<AgentError>,
    /// Simulated processing time
    pub delay_ms: u64,
}

impl Default for MockReply {
    fn default() -> Self {
        Self {
            content: Value::String("Mock consultation answered.".to_string()),
            confidence: 0.8,
            sources: Vec::new(),
            suggestions: Vec::new(),
            next_actions: Vec::new(),
            delegate_to: Vec::new(),
            error: None,
            delay_ms: 0,
        }
    }
}

impl MockReply {
    pub fn success(confidence: f64) -> Self {
        Self {
            confidence,
            ..Default::default()
        }
    }

    pub fn failure(error: AgentError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_next_action(mut self, action: impl Into<String>) -> Self {
        self.next_actions.push(action.into());
        self
    }

    pub fn delegating_to<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delegate_to = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Mock sage.
///
/// Replies come from a FIFO script first and fall back to the default
/// reply once the script is drained. Every received query is recorded so
/// tests can inspect the context each invocation saw.
pub struct MockSage {
    name: String,
    capabilities: BTreeSet<QueryKind>,
    default_reply: MockReply,
    script: Arc<RwLock<VecDeque<MockReply>>>,
    health_status: Arc<RwLock<AgentStatus>>,
    health_delay_ms: u64,
    calls: AtomicUsize,
    received: Arc<RwLock<Vec<ConsultationQuery>>>,
}

impl MockSage {
    pub fn new<I>(name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = QueryKind>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
            default_reply: MockReply::default(),
            script: Arc::new(RwLock::new(VecDeque::new())),
            health_status: Arc::new(RwLock::new(AgentStatus::Idle)),
            health_delay_ms: 0,
            calls: AtomicUsize::new(0),
            received: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_default_reply(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Queue replies consumed before the default reply.
    pub fn with_script<I>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = MockReply>,
    {
        let script = replies.into_iter().collect();
        Self {
            script: Arc::new(RwLock::new(script)),
            ..self
        }
    }

    pub fn with_health_status(self, status: AgentStatus) -> Self {
        Self {
            health_status: Arc::new(RwLock::new(status)),
            ..self
        }
    }

    /// Make `health_check` slow, to exercise probe timeouts.
    pub fn with_health_delay_ms(mut self, delay_ms: u64) -> Self {
        self.health_delay_ms = delay_ms;
        self
    }

    pub async fn push_reply(&self, reply: MockReply) {
        self.script.write().await.push_back(reply);
    }

    pub async fn set_health_status(&self, status: AgentStatus) {
        *self.health_status.write().await = status;
    }

    /// Number of `process_consultation` calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received so far, in arrival order.
    pub async fn received_queries(&self) -> Vec<ConsultationQuery> {
        self.received.read().await.clone()
    }

    async fn next_reply(&self) -> MockReply {
        let mut script = self.script.write().await;
        script.pop_front().unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl Sage for MockSage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_consultation(
        &self,
        query: &ConsultationQuery,
    ) -> Result<ConsultationResponse, AgentError> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.write().await.push(query.clone());

        let reply = self.next_reply().await;
        if reply.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(reply.delay_ms)).await;
        }

        if let Some(error) = reply.error {
            return Err(error);
        }

        let mut builder = ConsultationResponse::builder(query.id, &self.name)
            .content(reply.content)
            .confidence(reply.confidence)
            .sources(reply.sources)
            .processing_time_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        for suggestion in reply.suggestions {
            builder = builder.suggestion(suggestion);
        }
        for action in reply.next_actions {
            builder = builder.next_action(action);
        }
        if !reply.delegate_to.is_empty() {
            builder = builder.delegate_to(reply.delegate_to);
        }

        Ok(builder.build())
    }

    async fn health_check(&self) -> HealthReport {
        if self.health_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.health_delay_ms)).await;
        }
        HealthReport {
            status: *self.health_status.read().await,
            metrics: PerformanceMetrics::default(),
        }
    }

    fn capabilities(&self) -> BTreeSet<QueryKind> {
        self.capabilities.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::FailureKind;

    #[tokio::test]
    async fn test_script_then_default() {
        let sage = MockSage::new("knowledge", [QueryKind::KnowledgeLookup])
            .with_script([MockReply::failure(AgentError::network("reset"))])
            .with_default_reply(MockReply::success(0.6));
        let query = ConsultationQuery::new(QueryKind::KnowledgeLookup, "what is raft", "tester");

        let first = sage.process_consultation(&query).await;
        assert_eq!(first.unwrap_err().kind, FailureKind::NetworkFailure);

        let second = sage.process_consultation(&query).await.unwrap();
        assert_eq!(second.query_id, query.id);
        assert_eq!(second.agent_name, "knowledge");
        assert!((second.confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(sage.call_count(), 2);
        assert_eq!(sage.received_queries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delegation_reply() {
        let sage = MockSage::new("lead", [QueryKind::GeneralCollaboration])
            .with_default_reply(MockReply::success(0.9).delegating_to(["search"]));
        let query = ConsultationQuery::new(QueryKind::GeneralCollaboration, "coordinate", "tester");
        let response = sage.process_consultation(&query).await.unwrap();
        assert_eq!(response.delegates(), vec!["search"]);
    }

    #[tokio::test]
    async fn test_health_status_is_settable() {
        let sage = MockSage::new("task", [QueryKind::TaskPlanning]);
        assert_eq!(sage.health_check().await.status, AgentStatus::Idle);
        sage.set_health_status(AgentStatus::Maintenance).await;
        assert_eq!(sage.health_check().await.status, AgentStatus::Maintenance);
    }
}
