//! Tick-driven job scheduler (§4.6). Grounded on the teacher's
//! `pipeline_manager.rs`: `PipelineOptions`'s `cancellation_token`/
//! `stage_timeout` pair and its `tokio::select! { biased; ... }` race
//! between cancellation and completion, generalized from "one stage" to
//! "one claimed job."

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::error::{Error, Result};
use crate::job_queue::{Job, JobId, JobQueue, JobStatus, JobType};
use crate::worker::Worker;

#[derive(Clone)]
pub struct SchedulerConfig {
    /// How long the tick loop sleeps between scans when no jobs are ready.
    pub tick_interval: Duration,
    /// Concurrent worker slots per job type. A type absent from this map
    /// gets zero slots and is never dispatched.
    pub worker_slots: HashMap<JobType, usize>,
    /// Per-job-type timeout; expiration triggers cancellation (§4.6).
    pub job_timeout: HashMap<JobType, Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let mut worker_slots = HashMap::new();
        let mut job_timeout = HashMap::new();
        for job_type in [JobType::Ingest, JobType::Analysis, JobType::Generate, JobType::Render, JobType::Export] {
            worker_slots.insert(job_type, 1);
            job_timeout.insert(job_type, Duration::from_secs(30));
        }
        Self {
            tick_interval: Duration::from_millis(200),
            worker_slots,
            job_timeout,
        }
    }
}

struct RunningJob {
    job_type: JobType,
    cancellation: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Matches ready jobs to idle worker slots and supervises their execution.
/// Holds no GPU resources itself; each spawned task owns its own `Worker`.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    workers: HashMap<JobType, Arc<dyn Worker>>,
    config: SchedulerConfig,
    running: HashMap<JobId, RunningJob>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, workers: HashMap<JobType, Arc<dyn Worker>>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            workers,
            config,
            running: HashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// A token the caller can cancel to stop the tick loop and all in-flight jobs.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the tick loop until `shutdown_handle()` is cancelled. Reaps
    /// finished tasks and attempts to admit one new job per type per tick,
    /// honoring `worker_slots` as a concurrency cap.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.cancel_all().await;
                    return;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.reap_finished();
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "scheduler tick failed; backing off");
                    }
                }
            }
        }
    }

    fn reap_finished(&mut self) {
        self.running.retain(|_, job| !job.handle.is_finished());
    }

    async fn cancel_all(&mut self) {
        for (_, job) in self.running.drain() {
            job.cancellation.cancel();
            let _ = job.handle.await;
        }
    }

    fn active_count(&self, job_type: JobType) -> usize {
        self.running.values().filter(|job| job.job_type == job_type).count()
    }

    async fn tick(&mut self) -> Result<()> {
        for (&job_type, worker) in self.workers.clone().iter() {
            let slots = self.config.worker_slots.get(&job_type).copied().unwrap_or(0);
            if self.active_count(job_type) >= slots {
                continue;
            }
            let Some(job) = self.queue.claim_next_ready_of_type(job_type).await? else {
                continue;
            };
            self.spawn_job(job, worker.clone());
        }
        Ok(())
    }

    fn spawn_job(&mut self, job: Job, worker: Arc<dyn Worker>) {
        let job_id = job.id;
        let job_type = job.job_type;
        let queue = self.queue.clone();
        let cancellation = CancellationToken::new();
        let child_token = cancellation.clone();
        let job_timeout = self
            .config
            .job_timeout
            .get(&job_type)
            .copied()
            .unwrap_or(Duration::from_secs(30));

        let span = info_span!("scheduled_job", job_id = %job_id, job_type = job_type.as_str());
        let handle = tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = child_token.cancelled() => Err(Error::Cancelled),
                    result = timeout(
                        job_timeout,
                        worker.execute(job.clone(), crate::worker::ProgressSink::new(child_token.clone())),
                    ) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(Error::Custom(format!("job {job_id} timed out after {job_timeout:?}"))),
                        }
                    }
                };

                let mut finished = job;
                match outcome {
                    Ok(result_bytes) => {
                        finished.status = JobStatus::Completed;
                        finished.result = Some(result_bytes);
                    }
                    Err(err) if err.is_cancellation() => {
                        finished.status = JobStatus::Cancelled;
                    }
                    Err(err) => {
                        finished.status = JobStatus::Failed;
                        finished.error = Some(err.to_string());
                    }
                }
                if let Err(err) = queue.update(finished).await {
                    warn!(job_id = %job_id, error = %err, "failed to persist job completion");
                }
            }
            .instrument(span),
        );

        self.running.insert(job_id, RunningJob { job_type, cancellation, handle });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_queue::{Job, MemoryJobQueue};
    use crate::worker::ProgressSink;
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn execute(&self, job: Job, _progress: ProgressSink) -> Result<Vec<u8>> {
            Ok(job.payload)
        }
    }

    #[tokio::test]
    async fn tick_claims_and_completes_a_ready_job() {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
        let mut workers: HashMap<JobType, Arc<dyn Worker>> = HashMap::new();
        workers.insert(JobType::Render, Arc::new(EchoWorker));

        let job = Job::new(JobType::Render, 0, b"payload".to_vec(), Utc::now());
        let job_id = job.id;
        queue.add(job, vec![]).await.unwrap();

        let mut scheduler = Scheduler::new(queue.clone(), workers, SchedulerConfig::default());
        scheduler.tick().await.unwrap();

        // Give the spawned task a chance to run and persist completion.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let finished = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.result.unwrap(), b"payload".to_vec());
    }
}
