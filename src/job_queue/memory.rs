//! In-process `JobQueue` over a `parking_lot::Mutex`-guarded map — the
//! teacher's lock primitive of choice throughout, used here for test
//! fixtures and for embedding the core without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{Job, JobDependency, JobId, JobQueue, JobStatus, JobType};
use crate::error::Result;

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    deps: Vec<JobDependency>,
}

impl State {
    fn dependencies_of(&self, job_id: JobId) -> impl Iterator<Item = JobId> + '_ {
        self.deps.iter().filter(move |d| d.job_id == job_id).map(|d| d.depends_on_id)
    }

    fn dependents_of(&self, job_id: JobId) -> impl Iterator<Item = JobId> + '_ {
        self.deps.iter().filter(move |d| d.depends_on_id == job_id).map(|d| d.job_id)
    }

    fn all_dependencies_completed(&self, job_id: JobId) -> bool {
        self.dependencies_of(job_id)
            .all(|dep_id| matches!(self.jobs.get(&dep_id), Some(j) if j.status == JobStatus::Completed))
    }

    fn unblock_dependents(&mut self, completed_id: JobId) {
        let dependents: Vec<JobId> = self.dependents_of(completed_id).collect();
        for dependent_id in dependents {
            if self.all_dependencies_completed(dependent_id) {
                if let Some(job) = self.jobs.get_mut(&dependent_id) {
                    if job.status == JobStatus::Blocked {
                        job.status = JobStatus::Pending;
                        job.updated_at = Utc::now();
                    }
                }
            }
        }
    }

    fn claim(&mut self, job_type: Option<JobType>) -> Option<Job> {
        let candidate_id = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .min_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)))
            .map(|j| j.id)?;

        let job = self.jobs.get_mut(&candidate_id)?;
        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        Some(job.clone())
    }
}

/// `MemoryJobQueue`: non-persistent, single-process `JobQueue`.
pub struct MemoryJobQueue {
    state: Mutex<State>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn add(&self, mut job: Job, deps: Vec<JobId>) -> Result<()> {
        let mut state = self.state.lock();
        job.status = if deps.is_empty() { JobStatus::Pending } else { JobStatus::Blocked };
        let job_id = job.id;
        state.jobs.insert(job_id, job);
        for depends_on_id in deps {
            state.deps.push(JobDependency { job_id, depends_on_id });
        }
        Ok(())
    }

    async fn claim_next_ready(&self) -> Result<Option<Job>> {
        Ok(self.state.lock().claim(None))
    }

    async fn claim_next_ready_of_type(&self, job_type: JobType) -> Result<Option<Job>> {
        Ok(self.state.lock().claim(Some(job_type)))
    }

    async fn update(&self, job: Job) -> Result<()> {
        let mut state = self.state.lock();
        let should_unblock = match state.jobs.get(&job.id) {
            Some(existing) if existing.status.is_terminal() => return Ok(()),
            _ => job.status == JobStatus::Completed,
        };
        let job_id = job.id;
        state.jobs.insert(job_id, job);
        if should_unblock {
            state.unblock_dependents(job_id);
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn cancel(&self, id: JobId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.get_mut(&id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(job_type: JobType) -> Job {
        Job::new(job_type, 0, Vec::new(), Utc::now())
    }

    #[tokio::test]
    async fn dependent_stays_blocked_until_dependency_completes() {
        let queue = MemoryJobQueue::new();
        let j1 = job(JobType::Render);
        let j1_id = j1.id;
        queue.add(j1, vec![]).await.unwrap();

        let mut j2 = job(JobType::Export);
        j2.id = uuid::Uuid::new_v4();
        let j2_id = j2.id;
        queue.add(j2, vec![j1_id]).await.unwrap();

        assert_eq!(queue.get(j2_id).await.unwrap().unwrap().status, JobStatus::Blocked);

        let mut claimed = queue.claim_next_ready().await.unwrap().unwrap();
        assert_eq!(claimed.id, j1_id);
        claimed.status = JobStatus::Completed;
        queue.update(claimed).await.unwrap();

        assert_eq!(queue.get(j2_id).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn claim_order_follows_dependency_chain() {
        let queue = MemoryJobQueue::new();
        let j1 = job(JobType::Ingest);
        let j1_id = j1.id;
        queue.add(j1, vec![]).await.unwrap();
        let j2 = job(JobType::Analysis);
        let j2_id = j2.id;
        queue.add(j2, vec![j1_id]).await.unwrap();
        let j3 = job(JobType::Render);
        let j3_id = j3.id;
        queue.add(j3, vec![j2_id]).await.unwrap();

        assert!(queue.claim_next_ready_of_type(JobType::Analysis).await.unwrap().is_none());

        let mut c1 = queue.claim_next_ready().await.unwrap().unwrap();
        assert_eq!(c1.id, j1_id);
        c1.status = JobStatus::Completed;
        queue.update(c1).await.unwrap();

        let mut c2 = queue.claim_next_ready().await.unwrap().unwrap();
        assert_eq!(c2.id, j2_id);
        c2.status = JobStatus::Completed;
        queue.update(c2).await.unwrap();

        let c3 = queue.claim_next_ready().await.unwrap().unwrap();
        assert_eq!(c3.id, j3_id);
    }

    #[tokio::test]
    async fn failed_dependency_leaves_dependent_blocked() {
        let queue = MemoryJobQueue::new();
        let j1 = job(JobType::Render);
        let j1_id = j1.id;
        queue.add(j1, vec![]).await.unwrap();
        let j2 = job(JobType::Export);
        let j2_id = j2.id;
        queue.add(j2, vec![j1_id]).await.unwrap();

        let mut c1 = queue.claim_next_ready().await.unwrap().unwrap();
        c1.status = JobStatus::Failed;
        c1.error = Some("boom".into());
        queue.update(c1).await.unwrap();

        assert_eq!(queue.get(j2_id).await.unwrap().unwrap().status, JobStatus::Blocked);
    }

    #[tokio::test]
    async fn terminal_states_never_transition_back() {
        let queue = MemoryJobQueue::new();
        let j1 = job(JobType::Render);
        let id = j1.id;
        queue.add(j1, vec![]).await.unwrap();
        queue.cancel(id).await.unwrap();

        let mut resurrect = queue.get(id).await.unwrap().unwrap();
        resurrect.status = JobStatus::Pending;
        queue.update(resurrect).await.unwrap();

        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Cancelled);
    }
}
