//! Smoke-test binary: stands up a headless GPU device, a scheduler with a
//! single in-memory render worker slot, submits one job, and waits for it
//! to complete. Exercises the wiring end to end without a real encoder or
//! timeline compiler backing it.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::collections::HashMap;
use std::sync::Arc;

use render_orchestration_core::{
    headless_device, Job, JobQueue, JobType, KernelRegistry, MemoryJobQueue, PoolConfig, Scheduler,
    SchedulerConfig, TexturePool, Worker,
};

struct EchoWorker;

#[async_trait::async_trait]
impl Worker for EchoWorker {
    async fn execute(
        &self,
        job: Job,
        _progress: render_orchestration_core::ProgressSink,
    ) -> render_orchestration_core::Result<Vec<u8>> {
        Ok(job.payload)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (device, _queue) = headless_device().await.expect("failed to acquire a GPU device");
    let _pool = TexturePool::new(device, PoolConfig::default());
    let _kernels = KernelRegistry::with_builtin_adapters();

    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let mut workers: HashMap<JobType, Arc<dyn Worker>> = HashMap::new();
    workers.insert(JobType::Render, Arc::new(EchoWorker));

    let job = Job::new(JobType::Render, 0, b"smoke test payload".to_vec(), chrono::Utc::now());
    let job_id = job.id;
    queue.add(job, vec![]).await.expect("failed to submit job");

    let mut scheduler = Scheduler::new(queue.clone(), workers, SchedulerConfig::default());
    let shutdown = scheduler.shutdown_handle();

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if let Some(job) = queue.get(job_id).await.expect("job lookup failed") {
            if job.status.is_terminal() {
                tracing::info!(status = ?job.status, "smoke test job finished");
                break;
            }
        }
    }

    shutdown.cancel();
    let _ = scheduler_task.await;
}
