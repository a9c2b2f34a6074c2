//! Background jobs wrapping one run attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::new_id;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// queued -> running -> {completed | failed}; a queued job may also fail
    /// before it ever starts
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Completed) | (Running, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full pipeline over a ready brief
    Generate,
    /// Creative and voice regeneration for a completed run
    GenerateAssets,
}

/// Materialized job snapshot, updated by the worker that owns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub session_id: String,
    pub run_id: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: new_id("job"),
            job_type,
            status: JobStatus::Queued,
            progress: 0,
            session_id: session_id.into(),
            run_id: run_id.into(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidJobTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)
    }

    /// Raise progress; lower values and updates outside `running` are ignored
    pub fn advance(&mut self, progress: u8) {
        if self.status != JobStatus::Running {
            return;
        }
        let progress = progress.min(100);
        if progress > self.progress {
            self.progress = progress;
            self.updated_at = Utc::now();
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = Job::new(JobType::Generate, "sess_a", "run_a");
        assert!(job.job_id.starts_with("job_"));
        assert_eq!(job.status, JobStatus::Queued);

        job.start().unwrap();
        job.advance(35);
        job.advance(20);
        assert_eq!(job.progress, 35);

        job.complete().unwrap();
        assert_eq!(job.progress, 100);
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_status_never_goes_backward() {
        let mut job = Job::new(JobType::Generate, "sess_a", "run_a");
        job.start().unwrap();
        job.fail("strategy backend returned 502").unwrap();

        assert!(matches!(
            job.start(),
            Err(OrchestratorError::InvalidJobTransition { .. })
        ));
        assert!(job.complete().is_err());
        assert_eq!(job.error.as_deref(), Some("strategy backend returned 502"));
    }

    #[test]
    fn test_progress_ignored_unless_running() {
        let mut job = Job::new(JobType::GenerateAssets, "sess_a", "run_a");
        job.advance(50);
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn test_job_wire_shape() {
        let job = Job::new(JobType::GenerateAssets, "sess_a", "run_a");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "generate_assets");
        assert_eq!(json["status"], "queued");
    }
}
