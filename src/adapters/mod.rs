//! Capability provider interfaces.
//!
//! The orchestrator only ever sees the [`Provider`] trait. Concrete providers
//! are the built-in keyword planner, an external command bridge, and scripted
//! doubles for deterministic tests.

pub mod command;
pub mod keyword;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ProvidersConfig;
use crate::domain::{Asset, FieldPath, Mode, SlotUpdate, Slots, StageOutput};
use crate::error::ProviderError;

pub use command::CommandProvider;
pub use keyword::KeywordPlanner;
pub use scripted::{ScriptedProvider, Step};

/// Pipeline role a provider fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Planner,
    Research,
    Strategy,
    Creative,
    Voice,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Planner,
        ProviderKind::Research,
        ProviderKind::Strategy,
        ProviderKind::Creative,
        ProviderKind::Voice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Research => "research",
            Self::Strategy => "strategy",
            Self::Creative => "creative",
            Self::Voice => "voice",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a provider may read for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderContext {
    pub kind: ProviderKind,
    pub session_id: String,
    pub run_id: Option<String>,
    pub locale: String,
    pub mode: Mode,
    pub turn: u64,

    /// Latest user message (planner only)
    pub user_input: Option<String>,

    pub slots: Slots,

    /// Field the conversation is currently asking about
    pub expected_path: Option<FieldPath>,

    pub research: Option<StageOutput>,
    pub research_degraded: bool,
    pub strategy: Option<StageOutput>,
}

impl ProviderContext {
    pub fn new(kind: ProviderKind, session_id: impl Into<String>, slots: Slots) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            run_id: None,
            locale: "en".to_string(),
            mode: Mode::default(),
            turn: 0,
            user_input: None,
            slots,
            expected_path: None,
            research: None,
            research_degraded: false,
            strategy: None,
        }
    }

    /// Short content hash, identical for identical inputs
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..8])
    }
}

/// Structured provider result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Planner only
    #[serde(default)]
    pub slot_updates: Vec<SlotUpdate>,

    /// Planner only: assistant message for the user
    #[serde(default)]
    pub reply: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

impl ProviderOutput {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Structural check applied to every provider answer.
    ///
    /// Failures here are schema errors and go through the same retry path
    /// as a provider error.
    pub fn validate(&self, kind: ProviderKind) -> Result<(), ProviderError> {
        match kind {
            ProviderKind::Planner => {
                for update in &self.slot_updates {
                    update.validate().map_err(|e| {
                        ProviderError::SchemaValidation(format!("planner returned {}", e))
                    })?;
                }
            }
            _ => {
                if self.summary.trim().is_empty() {
                    return Err(ProviderError::SchemaValidation(format!(
                        "{} output has an empty summary",
                        kind
                    )));
                }
                if !self.slot_updates.is_empty() {
                    return Err(ProviderError::SchemaValidation(format!(
                        "{} output must not carry slot updates",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_stage(self, provider: &str) -> StageOutput {
        StageOutput {
            provider: provider.to_string(),
            summary: self.summary,
            key_points: self.key_points,
            risks: self.risks,
            assets: self.assets,
            data: self.data,
        }
    }
}

/// A capability provider: `(context) -> structured result | error`
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    async fn run(&self, ctx: &ProviderContext) -> Result<ProviderOutput, ProviderError>;
}

/// Placeholder for a role with no backend configured
pub struct UnconfiguredProvider {
    kind: ProviderKind,
}

impl UnconfiguredProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Provider for UnconfiguredProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn run(&self, _ctx: &ProviderContext) -> Result<ProviderOutput, ProviderError> {
        Err(ProviderError::Upstream(format!(
            "provider '{}' is not configured",
            self.kind
        )))
    }
}

/// One provider per pipeline role
#[derive(Clone)]
pub struct ProviderSet {
    pub planner: Arc<dyn Provider>,
    pub research: Arc<dyn Provider>,
    pub strategy: Arc<dyn Provider>,
    pub creative: Arc<dyn Provider>,
    pub voice: Arc<dyn Provider>,
}

impl ProviderSet {
    /// Keyword planner plus unconfigured generation roles
    pub fn offline() -> Self {
        Self {
            planner: Arc::new(KeywordPlanner::new()),
            research: Arc::new(UnconfiguredProvider::new(ProviderKind::Research)),
            strategy: Arc::new(UnconfiguredProvider::new(ProviderKind::Strategy)),
            creative: Arc::new(UnconfiguredProvider::new(ProviderKind::Creative)),
            voice: Arc::new(UnconfiguredProvider::new(ProviderKind::Voice)),
        }
    }

    /// Build from config: command providers where configured, offline otherwise
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut set = Self::offline();
        for kind in ProviderKind::ALL {
            if let Some(cmd) = config.get(kind) {
                set = set.with(kind, Arc::new(CommandProvider::from_config(kind, cmd)));
            }
        }
        set
    }

    /// Replace the provider for one role
    pub fn with(mut self, kind: ProviderKind, provider: Arc<dyn Provider>) -> Self {
        match kind {
            ProviderKind::Planner => self.planner = provider,
            ProviderKind::Research => self.research = provider,
            ProviderKind::Strategy => self.strategy = provider,
            ProviderKind::Creative => self.creative = provider,
            ProviderKind::Voice => self.voice = provider,
        }
        self
    }

    pub fn get(&self, kind: ProviderKind) -> &Arc<dyn Provider> {
        match kind {
            ProviderKind::Planner => &self.planner,
            ProviderKind::Research => &self.research,
            ProviderKind::Strategy => &self.strategy,
            ProviderKind::Creative => &self.creative,
            ProviderKind::Voice => &self.voice,
        }
    }
}
