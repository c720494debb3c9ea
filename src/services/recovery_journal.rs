//! Append-only journal of recovery attempts.
//!
//! Every failed invocation that reaches the recovery manager leaves one
//! record here, whether or not it was recovered, so failure patterns can be
//! analysed later. Records are never edited; the oldest are evicted once
//! the capacity is reached.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::FailureKind;
use crate::domain::models::{RecoveryRecord, RecoveryStrategy};

/// Filter for querying the journal.
#[derive(Debug, Clone, Default)]
pub struct JournalFilter {
    pub agent: Option<String>,
    pub kind: Option<FailureKind>,
    pub query_id: Option<Uuid>,
    pub recovered: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl JournalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_query(mut self, query_id: Uuid) -> Self {
        self.query_id = Some(query_id);
        self
    }

    pub fn with_recovered(mut self, recovered: bool) -> Self {
        self.recovered = Some(recovered);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &RecoveryRecord) -> bool {
        if let Some(ref agent) = self.agent {
            if &record.agent != agent {
                return false;
            }
        }

        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }

        if let Some(query_id) = self.query_id {
            if record.query_id != query_id {
                return false;
            }
        }

        if let Some(recovered) = self.recovered {
            if record.recovered != recovered {
                return false;
            }
        }

        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }

        true
    }
}

/// Aggregate counts over the journal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JournalSummary {
    pub total: usize,
    pub recovered: usize,
    pub unrecovered: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_strategy: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
}

/// In-memory, bounded, append-only recovery journal.
pub struct RecoveryJournal {
    capacity: usize,
    records: Arc<RwLock<VecDeque<RecoveryRecord>>>,
}

impl RecoveryJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub async fn append(&self, record: RecoveryRecord) {
        let mut records = self.records.write().await;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records matching `filter`, oldest first.
    pub async fn query(&self, filter: &JournalFilter) -> Vec<RecoveryRecord> {
        let records = self.records.read().await;
        let mut results: Vec<RecoveryRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            let skip = results.len().saturating_sub(limit);
            results.drain(..skip);
        }

        results
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn summary(&self) -> JournalSummary {
        let records = self.records.read().await;
        let mut summary = JournalSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records.iter() {
            if record.recovered {
                summary.recovered += 1;
            } else {
                summary.unrecovered += 1;
            }
            *summary
                .by_kind
                .entry(record.kind.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_strategy
                .entry(record.strategy.as_str().to_string())
                .or_insert(0) += 1;
            *summary.by_agent.entry(record.agent.clone()).or_insert(0) += 1;
        }

        summary
    }

    /// Share of records for `agent` that ended with `strategy`.
    pub async fn strategy_rate(&self, agent: &str, strategy: RecoveryStrategy) -> f64 {
        let records = self.records.read().await;
        let (hits, total) = records
            .iter()
            .filter(|r| r.agent == agent)
            .fold((0usize, 0usize), |(hits, total), r| {
                (hits + usize::from(r.strategy == strategy), total + 1)
            });
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = hits as f64 / total as f64;
        rate
    }
}
