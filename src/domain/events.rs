//! Stream events emitted by the orchestrator.
//!
//! Events are immutable once published. Each carries a per-session `seq`
//! assigned by the bus, and a globally unique `event_id` for consumer dedupe.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of event types on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "planner.delta")]
    PlannerDelta,
    #[serde(rename = "slot.updated")]
    SlotUpdated,
    #[serde(rename = "gate.ready")]
    GateReady,
    #[serde(rename = "stage.changed")]
    StageChanged,
    #[serde(rename = "research.delta")]
    ResearchDelta,
    #[serde(rename = "strategy.delta")]
    StrategyDelta,
    #[serde(rename = "creative.delta")]
    CreativeDelta,
    #[serde(rename = "voice.delta")]
    VoiceDelta,
    #[serde(rename = "asset.ready")]
    AssetReady,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlannerDelta => "planner.delta",
            Self::SlotUpdated => "slot.updated",
            Self::GateReady => "gate.ready",
            Self::StageChanged => "stage.changed",
            Self::ResearchDelta => "research.delta",
            Self::StrategyDelta => "strategy.delta",
            Self::CreativeDelta => "creative.delta",
            Self::VoiceDelta => "voice.delta",
            Self::AssetReady => "asset.ready",
            Self::RunCompleted => "run.completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event before the bus has sequenced it
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub data: Value,
}

impl EventDraft {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self { event_type, data }
    }
}

/// Published event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_id: Uuid,
    pub seq: u64,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl StreamEvent {
    pub fn sequenced(session_id: &str, seq: u64, draft: EventDraft) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            seq,
            session_id: session_id.to_string(),
            event_type: draft.event_type,
            created_at: Utc::now(),
            data: draft.data,
        }
    }

    /// `run.completed`, or an `error` flagged fatal, ends a subscription
    pub fn is_terminal(&self) -> bool {
        match self.event_type {
            EventType::RunCompleted => true,
            EventType::Error => self
                .data
                .get("fatal")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Consumer-side resume cursor.
///
/// Drops anything at or below the last accepted `seq` and any `event_id`
/// already seen, so replayed or redelivered events are no-ops.
#[derive(Debug, Clone, Default)]
pub struct EventCursor {
    last_seq: u64,
    seen: HashSet<Uuid>,
}

impl EventCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor for a client that has already seen everything up to `seq`
    pub fn resume_from(seq: u64) -> Self {
        Self {
            last_seq: seq,
            seen: HashSet::new(),
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Whether the event is new; updates the cursor when it is
    pub fn accept(&mut self, event: &StreamEvent) -> bool {
        if event.seq <= self.last_seq || !self.seen.insert(event.event_id) {
            return false;
        }
        self.last_seq = event.seq;
        true
    }
}
