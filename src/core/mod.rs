//! Core orchestration logic.
//!
//! This module contains:
//! - Gate: brief completeness evaluation
//! - Pipeline: retry policy, stage budgets and progress bands
//! - Bus: per-session event sequencing and replay
//! - Orchestrator: turn processing and run execution
//! - Scheduler: background jobs over runs

pub mod bus;
pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod reply;
pub mod scheduler;

// Re-export commonly used types
pub use bus::{EventBus, Subscription};
pub use gate::{GateStatus, CONFIDENCE_FLOOR};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use pipeline::{invoke_with_retry, RetryPolicy, StageBudget};
pub use scheduler::{JobPage, JobQuery, JobScheduler};
