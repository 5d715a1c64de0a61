//! Append-only log of AI interactions.
//!
//! One record per completed provider call: what the client sent, what was
//! sent to the model, the raw model text, and the validated output that was
//! actually used. Records are diagnostic material owned by the
//! `(client_id, coach_id)` pair; durable storage and cascade deletion live
//! behind the same trait in an external collaborator.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// How the client input was classified for the AI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Text,
    Vision,
    Voice,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vision => "vision",
            Self::Voice => "voice",
        }
    }
}

/// Created once per interaction, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub id: String,
    pub client_id: i64,
    pub coach_id: i64,
    pub kind: InteractionKind,
    /// Raw client text (message text or media caption), pre-sanitization.
    pub client_input: String,
    /// The request sent to the provider, serialized.
    pub request_payload: serde_json::Value,
    /// Unmodified model output, kept for diagnostics only. Everything the
    /// client sees comes from `final_output`.
    pub raw_response: String,
    /// The client-visible outcome: the reply text that was sent and the
    /// validated analysis it was built from, with its schema tag.
    pub final_output: serde_json::Value,
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn record(&self, record: InteractionRecord) -> anyhow::Result<()>;

    /// Newest-first records for one owner pair.
    async fn recent(
        &self,
        client_id: i64,
        coach_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<InteractionRecord>>;
}

/// In-process ring buffer sink. Oldest records fall off at capacity.
pub struct MemoryInteractionLog {
    capacity: usize,
    records: RwLock<VecDeque<InteractionRecord>>,
}

impl MemoryInteractionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl InteractionSink for MemoryInteractionLog {
    async fn record(&self, record: InteractionRecord) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    async fn recent(
        &self,
        client_id: i64,
        coach_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<InteractionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|record| record.client_id == client_id && record.coach_id == coach_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
