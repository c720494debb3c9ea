//! Growing consultation context for chained collaboration.
//!
//! The context an agent sees in a sequential or hierarchical run is an
//! immutable base snapshot (the caller's context) plus the ordered deltas
//! appended by earlier steps. Appending returns a new context and never
//! touches the previous one, so every invocation's input can be
//! reconstructed exactly.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::response::ConsultationResponse;

/// Context key holding the ordered list of earlier results.
pub const PREVIOUS_RESULTS_KEY: &str = "previous_results";

/// One appended step: the slot agent and the response it produced.
#[derive(Debug, Clone)]
pub struct ContextDelta {
    pub slot: String,
    pub response: Arc<ConsultationResponse>,
}

/// Immutable base plus appended deltas.
#[derive(Debug, Clone, Default)]
pub struct ConsultationContext {
    base: Arc<Map<String, Value>>,
    deltas: Vec<ContextDelta>,
}

impl ConsultationContext {
    pub fn new(base: Map<String, Value>) -> Self {
        Self {
            base: Arc::new(base),
            deltas: Vec::new(),
        }
    }

    /// New context with one more step appended.
    pub fn append(&self, slot: impl Into<String>, response: ConsultationResponse) -> Self {
        let mut deltas = self.deltas.clone();
        deltas.push(ContextDelta {
            slot: slot.into(),
            response: Arc::new(response),
        });
        Self {
            base: Arc::clone(&self.base),
            deltas,
        }
    }

    pub fn deltas(&self) -> &[ContextDelta] {
        &self.deltas
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Flatten into the map handed to a sage.
    ///
    /// Each step contributes `"<slot>_result"`; `previous_results` lists
    /// every step in append order.
    pub fn materialize(&self) -> Map<String, Value> {
        let mut map = (*self.base).clone();
        if self.deltas.is_empty() {
            return map;
        }

        let mut previous = Vec::with_capacity(self.deltas.len());
        for delta in &self.deltas {
            let response = delta.response.as_ref();
            map.insert(
                format!("{}_result", delta.slot),
                serde_json::to_value(response).unwrap_or(Value::Null),
            );
            previous.push(json!({
                "agent": delta.slot,
                "responder": response.agent_name,
                "confidence": response.confidence,
                "content": response.content,
            }));
        }
        map.insert(PREVIOUS_RESULTS_KEY.to_string(), Value::Array(previous));
        map
    }
}
