//! Persistent DAG job queue (§3.3, §4.5): jobs plus their dependency edges,
//! atomic claim semantics, idempotent completion-unblock propagation.

mod memory;
mod sqlx_queue;

pub use memory::MemoryJobQueue;
pub use sqlx_queue::SqlxJobQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Ingest,
    Analysis,
    Generate,
    Render,
    Export,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Ingest => "ingest",
            JobType::Analysis => "analysis",
            JobType::Generate => "generate",
            JobType::Render => "render",
            JobType::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ingest" => Ok(JobType::Ingest),
            "analysis" => Ok(JobType::Analysis),
            "generate" => Ok(JobType::Generate),
            "render" => Ok(JobType::Render),
            "export" => Ok(JobType::Export),
            other => Err(Error::Storage(format!("unknown job type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Blocked,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Blocked => "blocked",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "blocked" => Ok(JobStatus::Blocked),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::Storage(format!("unknown job status {other:?}"))),
        }
    }

    /// Terminal states never transition back out (§3.3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl Job {
    /// A freshly submitted job, not yet persisted. `JobQueue::add` decides
    /// the initial `Pending`/`Blocked` status from the dependency set.
    pub fn new(job_type: JobType, priority: i32, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            payload,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDependency {
    pub job_id: JobId,
    pub depends_on_id: JobId,
}

/// §4.5 persistent job queue contract. Implementations must make `add`,
/// `claim_next_ready[_of_type]`, and `update`'s completion-unblock step each
/// atomic — concurrent callers must never observe a torn intermediate state.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn add(&self, job: Job, deps: Vec<JobId>) -> Result<()>;
    async fn claim_next_ready(&self) -> Result<Option<Job>>;
    async fn claim_next_ready_of_type(&self, job_type: JobType) -> Result<Option<Job>>;
    async fn update(&self, job: Job) -> Result<()>;
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
    async fn cancel(&self, id: JobId) -> Result<()>;
}
