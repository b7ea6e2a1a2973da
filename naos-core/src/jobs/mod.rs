//! The job registry: tracks long-running operations (scrub, resilver,
//! replace) kicked off through the storage subsystem so clients can poll
//! or cancel them independent of the request that started them. See
//! `spec.md` §4.7.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scrub,
    Resilver,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub pool: String,
    pub status: JobStatus,
    pub progress_percent: Option<f32>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message: Option<String>,
    /// Set by [`JobRegistry::request_cancel`]. A worker polling this job
    /// observes the flag and decides, on its own schedule, whether it is
    /// safe to actually transition to [`JobStatus::Cancelled`] — requesting
    /// cancellation is not the same as the job having stopped.
    pub cancel_requested: bool,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { jobs: RwLock::new(HashMap::new()) }
    }

    pub fn create(&self, kind: JobKind, pool: impl Into<String>) -> Job {
        let now = Utc::now();
        let job = Job {
            id: Uuid::now_v7(),
            kind,
            pool: pool.into(),
            status: JobStatus::Running,
            progress_percent: Some(0.0),
            started_at: now,
            updated_at: now,
            message: None,
            cancel_requested: false,
        };
        self.jobs.write().insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: Uuid) -> Result<Job, JobError> {
        self.jobs.read().get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    pub fn update_progress(&self, id: Uuid, percent: f32, message: Option<String>) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal(id));
        }
        job.progress_percent = Some(percent);
        job.message = message;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    pub fn complete(&self, id: Uuid, status: JobStatus, message: Option<String>) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal(id));
        }
        job.status = status;
        job.message = message;
        job.updated_at = Utc::now();
        if status == JobStatus::Succeeded {
            job.progress_percent = Some(100.0);
        }
        Ok(job.clone())
    }

    /// Marks `cancel_requested`; does not itself transition the job to
    /// `cancelled`. A terminal job cannot be asked to cancel.
    pub fn request_cancel(&self, id: Uuid) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal(id));
        }
        job.cancel_requested = true;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
