//! Domain types for the launch orchestrator.
//!
//! - Slots: the brief schema and its merge rule
//! - Session: conversation state machine
//! - Run / Job: generation attempts and their background execution
//! - Events: the stream envelope

pub mod events;
pub mod job;
pub mod run;
pub mod session;
pub mod slots;

pub use events::{EventCursor, EventDraft, EventType, StreamEvent};
pub use job::{Job, JobStatus, JobType};
pub use run::{Asset, AssetKind, KpiPlan, Package, ResearchSnapshot, Run, RunSnapshot, StageOutput};
pub use session::{new_id, ChatMessage, Mode, Role, Session, SessionSnapshot, SessionState};
pub use slots::{
    FieldPath, PriceBand, SlotError, SlotField, SlotKind, SlotUpdate, SlotValue, Slots, WeeklyGoal,
};
