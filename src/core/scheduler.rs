//! Background job scheduler.
//!
//! A job wraps one run attempt. Submission validates and claims the session
//! synchronously, then a spawned worker drives the orchestrator under the job
//! timeout and reports status and progress back into the job table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Job, JobType};
use crate::error::{OrchestratorError, Result};

use super::orchestrator::Orchestrator;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;
/// Finished jobs kept for `get` and `list`; older ones are archived away
pub const DEFAULT_RETAINED_JOBS: usize = 500;

/// Filter and paging for [`JobScheduler::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

struct Inner {
    orchestrator: Arc<Orchestrator>,
    jobs: Mutex<HashMap<String, Job>>,
    job_timeout: Duration,
    retained: usize,
    changed: Notify,
}

impl Inner {
    fn jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| OrchestratorError::InternalError("job table poisoned".into()))
    }

    /// Drop the oldest finished jobs beyond the retention limit, never `keep`
    fn archive(&self, jobs: &mut HashMap<String, Job>, keep: &str) {
        let mut finished: Vec<(chrono::DateTime<chrono::Utc>, String)> = jobs
            .values()
            .filter(|job| job.status.is_terminal() && job.job_id != keep)
            .map(|job| (job.updated_at, job.job_id.clone()))
            .collect();
        // `keep` itself takes one retained slot
        let allowed = self.retained.saturating_sub(1);
        if finished.len() <= allowed {
            return;
        }
        finished.sort();
        let excess = finished.len() - allowed;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
        debug!(archived = excess, "Archived finished jobs");
    }

    fn update<F>(&self, job_id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let job = {
            let mut jobs = self.jobs()?;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
            f(job)?;
            let job = job.clone();
            if job.status.is_terminal() {
                self.archive(&mut jobs, job_id);
            }
            job
        };
        self.changed.notify_waiters();
        Ok(job)
    }
}

/// Runs generation jobs in the background
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let job_timeout = orchestrator.settings().job_timeout;
        Self::with_job_timeout(orchestrator, job_timeout)
    }

    pub fn with_job_timeout(orchestrator: Arc<Orchestrator>, job_timeout: Duration) -> Self {
        Self::with_limits(orchestrator, job_timeout, DEFAULT_RETAINED_JOBS)
    }

    /// Job timeout plus how many finished jobs stay queryable
    pub fn with_limits(orchestrator: Arc<Orchestrator>, job_timeout: Duration, retained: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                jobs: Mutex::new(HashMap::new()),
                job_timeout,
                retained: retained.max(1),
                changed: Notify::new(),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    /// Start a full generation run for a session.
    ///
    /// Gate and in-flight checks happen before this returns; the pipeline
    /// itself runs on a spawned task.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn submit(&self, session_id: &str) -> Result<Job> {
        let run_id = self.inner.orchestrator.start_run(session_id).await?;
        let job = Job::new(JobType::Generate, session_id, run_id);
        self.spawn(job).await
    }

    /// Regenerate creative and voice output for a completed run
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn submit_assets(&self, run_id: &str) -> Result<Job> {
        let run = self.inner.orchestrator.begin_assets(run_id).await?;
        let job = Job::new(JobType::GenerateAssets, run.session_id, run.id);
        self.spawn(job).await
    }

    /// Register the job and hand it to a worker.
    ///
    /// The run is already claimed here, so a failed registration gives the
    /// claim back before returning the error.
    async fn spawn(&self, job: Job) -> Result<Job> {
        let registered = self.inner.jobs().map(|mut jobs| {
            jobs.insert(job.job_id.clone(), job.clone());
        });
        if let Err(err) = registered {
            error!(job_id = %job.job_id, run_id = %job.run_id, error = %err, "Job could not be registered");
            if let Err(e) = self.inner.orchestrator.abort_run(&job.run_id, &err).await {
                error!(run_id = %job.run_id, error = %e, "Failed to release unregistered run");
            }
            return Err(err);
        }
        info!(job_id = %job.job_id, run_id = %job.run_id, job_type = ?job.job_type, "Job queued");

        let inner = Arc::clone(&self.inner);
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            run_job(inner, job_id).await;
        });
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        let jobs = self.inner.jobs()?;
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Jobs matching the query, newest first
    pub fn list(&self, query: &JobQuery) -> Result<JobPage> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);

        let mut matching: Vec<Job> = {
            let jobs = self.inner.jobs()?;
            jobs.values()
                .filter(|job| {
                    query.session_id.as_deref().map_or(true, |id| job.session_id == id)
                        && query.run_id.as_deref().map_or(true, |id| job.run_id == id)
                })
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });

        let total = matching.len();
        let items = matching.into_iter().skip(query.offset).take(limit).collect();
        Ok(JobPage {
            items,
            total,
            limit,
            offset: query.offset,
        })
    }

    /// Wait until the job is completed or failed, or `wait` elapses.
    ///
    /// Returns the latest snapshot either way.
    pub async fn wait_for_terminal(&self, job_id: &str, wait: Duration) -> Result<Job> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.get(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.get(job_id);
            }
        }
    }

    /// Cancellation hook; no job can be cancelled yet
    pub fn cancel(&self, job_id: &str) -> Result<Job> {
        self.get(job_id)?;
        Err(OrchestratorError::InvalidInput(
            "job cancellation is not supported".into(),
        ))
    }
}

async fn run_job(inner: Arc<Inner>, job_id: String) {
    let job = match inner.update(&job_id, |job| job.start()) {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Job could not start");
            return;
        }
    };
    info!(job_id = %job_id, run_id = %job.run_id, "Job running");

    let progress = {
        let inner = Arc::clone(&inner);
        let job_id = job_id.clone();
        move |value: u8| {
            if let Err(e) = inner.update(&job_id, |job| {
                job.advance(value);
                Ok(())
            }) {
                warn!(job_id = %job_id, error = %e, "Progress update dropped");
            }
        }
    };

    let orchestrator = Arc::clone(&inner.orchestrator);
    let work = async {
        match job.job_type {
            JobType::Generate => orchestrator.execute_run(&job.run_id, &progress).await,
            JobType::GenerateAssets => orchestrator.execute_assets(&job.run_id, &progress).await,
        }
    };

    let outcome = match timeout(inner.job_timeout, work).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(OrchestratorError::ProviderTimeout {
            provider: "scheduler".to_string(),
            message: format!("job timed out after {:?}", inner.job_timeout),
        }),
    };

    // The job owns its run until both are terminal
    if let Err(err) = &outcome {
        if let Err(e) = orchestrator.abort_run(&job.run_id, err).await {
            error!(job_id = %job_id, run_id = %job.run_id, error = %e, "Failed to settle run after job failure");
        }
    }

    let finished = match outcome {
        Ok(()) => {
            info!(job_id = %job_id, run_id = %job.run_id, "Job completed");
            inner.update(&job_id, |job| job.complete())
        }
        Err(e) => {
            error!(job_id = %job_id, run_id = %job.run_id, session_id = %job.session_id, error = %e, "Job failed");
            let message = e.to_string();
            inner.update(&job_id, |job| job.fail(message))
        }
    };
    if let Err(e) = finished {
        error!(job_id = %job_id, error = %e, "Failed to record job outcome");
    }

    inner.orchestrator.bus().prune_idle();
}
