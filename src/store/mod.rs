//! Storage contracts for sessions, runs and the event journal.
//!
//! The orchestrator only depends on these traits. In-memory implementations
//! back tests and embedding; file implementations back the CLI.

pub mod file;
pub mod journal;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Run, Session, StreamEvent};

pub use file::{FileRunRepository, FileSessionStore};
pub use journal::JsonlJournal;
pub use memory::{MemoryRunRepository, MemorySessionStore};

/// Keyed session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Durable once this returns
    async fn save_session(&self, session: &Session) -> Result<()>;
}

/// Durable storage for runs and their packages
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn get_run(&self, id: &str) -> Result<Option<Run>>;

    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Runs of one session, oldest first
    async fn list_runs(&self, session_id: &str) -> Result<Vec<Run>>;
}

/// Append-only per-session log of published events
#[async_trait]
pub trait EventJournal: Send + Sync {
    async fn append(&self, event: &StreamEvent) -> Result<()>;

    /// Events with `seq > after_seq`, in order
    async fn replay(&self, session_id: &str, after_seq: u64) -> Result<Vec<StreamEvent>>;

    /// Highest recorded `seq`, 0 when empty
    async fn last_seq(&self, session_id: &str) -> Result<u64>;
}

/// Ids become file names; anything else is treated as unknown
pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_ids() {
        assert!(is_safe_id("sess_0123456789abcdef"));
        assert!(!is_safe_id("../etc/passwd"));
        assert!(!is_safe_id(""));
        assert!(!is_safe_id("a/b"));
    }
}
