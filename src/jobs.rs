//! In-process job registry.
//!
//! Holds every job record for the lifetime of the process. Each mutation
//! happens under the write lock, so concurrent progress increments are never
//! lost, and readers always get a consistent snapshot. Once a job reaches
//! `completed` or `failed` the record is frozen.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{Result, VectorizeError};
use crate::models::{Job, JobStatus, PipelineStep, ProgressSnapshot};

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `pending` job and return its record.
    pub fn create(&self, username: &str, repo_name: &str, repo_url: &str) -> Job {
        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            repo_name: repo_name.to_string(),
            repo_url: repo_url.to_string(),
            status: JobStatus::Pending,
            progress: ProgressSnapshot::default(),
            created_at: now,
            updated_at: now,
            error: None,
        };
        self.jobs.write().insert(job.id.clone(), job.clone());
        job
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| VectorizeError::NotFound(format!("job {}", job_id)))
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to a non-terminal job. Terminal jobs are left untouched.
    fn mutate(&self, job_id: &str, f: impl FnOnce(&mut Job)) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| VectorizeError::NotFound(format!("job {}", job_id)))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        f(job);
        job.updated_at = Utc::now().max(job.created_at);
        Ok(())
    }

    /// Move to `step`, marking the job `processing`.
    pub fn set_step(&self, job_id: &str, step: PipelineStep) -> Result<()> {
        self.mutate(job_id, |job| {
            job.status = JobStatus::Processing;
            job.progress.step = Some(step);
        })
    }

    /// Update progress counters in place.
    pub fn update_progress(&self, job_id: &str, f: impl FnOnce(&mut ProgressSnapshot)) -> Result<()> {
        self.mutate(job_id, |job| f(&mut job.progress))
    }

    pub fn complete(&self, job_id: &str) -> Result<()> {
        self.mutate(job_id, |job| {
            job.status = JobStatus::Completed;
            job.progress.step = Some(PipelineStep::Completed);
            job.progress.current_file = None;
            job.error = None;
        })
    }

    pub fn fail(&self, job_id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.mutate(job_id, |job| {
            job.status = JobStatus::Failed;
            job.progress.current_file = None;
            job.error = Some(message);
        })
    }
}
