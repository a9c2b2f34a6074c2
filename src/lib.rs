//! launchkit - Conversational launch-brief orchestrator
//!
//! Collects a structured product-launch brief through a multi-turn
//! conversation, then drives a staged generation pipeline (research,
//! strategy, creative and voice) over pluggable providers.
//!
//! # Architecture
//!
//! - Every session is a state machine: turns fill slots until the gate is
//!   ready, then a run walks research -> strategy -> creatives -> done
//! - All progress is published as sequenced per-session events that
//!   subscribers can resume from any point
//! - Runs execute as background jobs with monotonic status and progress
//!
//! # Modules
//!
//! - `adapters`: Provider trait and implementations (keyword planner, commands)
//! - `core`: Gate, pipeline execution, event bus, orchestrator, scheduler
//! - `domain`: Data structures (Slots, Session, Run, Job, StreamEvent)
//! - `store`: Session, run and event persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Collect a brief interactively, then type /generate
//! launchkit chat
//!
//! # Inspect the result
//! launchkit session <session-id>
//! launchkit run <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod store;

// Re-export main types at crate root for convenience
pub use adapters::{Provider, ProviderContext, ProviderKind, ProviderOutput, ProviderSet};
pub use core::{EventBus, JobScheduler, Orchestrator, Subscription, TurnOutcome};
pub use domain::{EventType, Job, JobStatus, Run, Session, SessionState, Slots, StreamEvent};
pub use error::{OrchestratorError, ProviderError};
