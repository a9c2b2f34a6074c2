//! Session state and the conversation state machine.
//!
//! A Session owns exactly one live slot set. Its state only moves along the
//! edges encoded in [`SessionState::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::slots::Slots;
use crate::core::gate::{self, GateStatus};
use crate::error::{OrchestratorError, Result};

/// Conversation and pipeline state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    ChatCollecting,
    BriefReady,
    RunResearch,
    GenStrategy,
    GenCreatives,
    Done,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCollecting => "CHAT_COLLECTING",
            Self::BriefReady => "BRIEF_READY",
            Self::RunResearch => "RUN_RESEARCH",
            Self::GenStrategy => "GEN_STRATEGY",
            Self::GenCreatives => "GEN_CREATIVES",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// DONE and FAILED end a pipeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether a pipeline stage is executing
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::RunResearch | Self::GenStrategy | Self::GenCreatives
        )
    }

    /// Legal edges of the state machine.
    ///
    /// A terminal session may only be re-armed to BRIEF_READY, which is how a
    /// ready brief gets a second generation run. Nothing returns to
    /// CHAT_COLLECTING once the brief is ready.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (ChatCollecting, ChatCollecting | BriefReady) => true,
            (BriefReady, RunResearch) => true,
            (RunResearch, GenStrategy) => true,
            (GenStrategy, GenCreatives) => true,
            (GenCreatives, Done) => true,
            (Done | Failed, BriefReady) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Transition or report the illegal edge
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation depth requested by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Fast,
    #[default]
    Standard,
}

impl std::str::FromStr for Mode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            other => Err(OrchestratorError::InvalidInput(format!(
                "unknown mode '{}', expected fast or standard",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One line of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub turn: u64,
    pub created_at: DateTime<Utc>,
}

/// A brief-collection session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub locale: String,
    pub mode: Mode,
    pub state: SessionState,
    pub slots: Slots,

    /// Number of turns processed so far
    pub turn: u64,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Run that has not reached a terminal state yet
    pub active_run: Option<String>,

    #[serde(default)]
    pub run_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(locale: impl Into<String>, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("sess"),
            locale: locale.into(),
            mode,
            state: SessionState::ChatCollecting,
            slots: Slots::new(),
            turn: 0,
            messages: Vec::new(),
            active_run: None,
            run_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Gate status derived from the current slots
    pub fn gate(&self) -> GateStatus {
        gate::evaluate(&self.slots)
    }

    /// Move along a legal edge, bumping `updated_at`
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        self.state = self.state.transition(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
            turn: self.turn,
            created_at: Utc::now(),
        });
    }

    /// Read model handed to clients
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            locale: self.locale.clone(),
            mode: self.mode,
            state: self.state,
            slots: self.slots.clone(),
            gate: self.gate(),
            active_run: self.active_run.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Session as returned by create/get
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub locale: String,
    pub mode: Mode,
    pub state: SessionState,
    pub slots: Slots,
    pub gate: GateStatus,
    pub active_run: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `<prefix>_<16 hex chars>`
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..16])
}
