//! Error taxonomy for the orchestration core.
//!
//! `OrchestratorError` is what every public operation returns. Provider
//! failures arrive as `ProviderError` and are folded into the matching
//! orchestrator kind so callers see a single closed set.

use thiserror::Error;

use crate::domain::{FieldPath, JobStatus, SessionState};

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by sessions, runs, jobs and the event bus
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Brief is not ready, missing: {}", format_paths(.missing_required))]
    GateNotReady { missing_required: Vec<FieldPath> },

    #[error("Session {session_id} already has run {run_id} in flight")]
    RunAlreadyInFlight { session_id: String, run_id: String },

    /// Provider did not answer within its stage budget
    #[error("{message}")]
    ProviderTimeout { provider: String, message: String },

    /// Provider answered with structurally invalid output
    #[error("{message}")]
    SchemaValidationFailed { provider: String, message: String },

    /// Opaque provider failure, message kept verbatim
    #[error("{message}")]
    UpstreamError { provider: String, message: String },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Invalid job transition: {from:?} -> {to:?}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl OrchestratorError {
    /// Stable machine-readable code for wire payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::RunNotFound(_) => "RUN_NOT_FOUND",
            Self::GateNotReady { .. } => "GATE_NOT_READY",
            Self::RunAlreadyInFlight { .. } => "RUN_ALREADY_IN_FLIGHT",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::SchemaValidationFailed { .. } => "SCHEMA_VALIDATION_FAILED",
            Self::UpstreamError { .. } => "UPSTREAM_ERROR",
            Self::InvalidTransition { .. } | Self::InvalidJobTransition { .. } => {
                "INVALID_TRANSITION"
            }
            Self::Storage(_) | Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller caused this (4xx-equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::SessionNotFound(_)
                | Self::JobNotFound(_)
                | Self::RunNotFound(_)
                | Self::GateNotReady { .. }
                | Self::RunAlreadyInFlight { .. }
        )
    }

    /// Whether this came out of a capability provider
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderTimeout { .. }
                | Self::SchemaValidationFailed { .. }
                | Self::UpstreamError { .. }
        )
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

fn format_paths(paths: &[FieldPath]) -> String {
    paths
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure reported by a capability provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    SchemaValidation(String),

    #[error("{0}")]
    Upstream(String),
}

impl ProviderError {
    /// Attach the provider name and lift into the orchestrator taxonomy
    pub fn into_orchestrator(self, provider: &str) -> OrchestratorError {
        let provider = provider.to_string();
        match self {
            Self::Timeout(message) => OrchestratorError::ProviderTimeout { provider, message },
            Self::SchemaValidation(message) => {
                OrchestratorError::SchemaValidationFailed { provider, message }
            }
            Self::Upstream(message) => OrchestratorError::UpstreamError { provider, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_message_is_verbatim() {
        let err = ProviderError::Upstream("strategy backend returned 502".to_string())
            .into_orchestrator("strategy");

        assert_eq!(err.to_string(), "strategy backend returned 502");
        assert_eq!(err.code(), "UPSTREAM_ERROR");
        assert!(err.is_provider_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_gate_not_ready_lists_paths() {
        let err = OrchestratorError::GateNotReady {
            missing_required: vec![FieldPath::TargetWho, FieldPath::GoalWeeklyGoal],
        };

        assert_eq!(
            err.to_string(),
            "Brief is not ready, missing: target.who, goal.weekly_goal"
        );
        assert!(err.is_client_error());
    }
}
