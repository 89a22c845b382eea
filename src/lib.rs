//! Deterministic render-orchestration core: a graph executor over pooled
//! GPU textures, driven by a persistent job queue and a cooperative
//! scheduler. See each module's doc comment for its slice of the design.

pub mod adapters;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod job_queue;
pub mod kernel;
pub mod scheduler;
pub mod texture_pool;
pub mod worker;

pub use error::{Error, ErrorCategory, Result};
pub use executor::{GraphExecutor, Warning};
pub use graph::{
    EdgePolicy, NodeId, OutputSpec, ParamValue, PixelFormat, Quality, Rational, RenderGraph, RenderNode,
    RenderRequest, Resolution, TimeRange,
};
pub use job_queue::{Job, JobId, JobQueue, JobStatus, JobType, MemoryJobQueue, SqlxJobQueue};
pub use kernel::{BoundInput, Kernel, KernelInvocation, KernelRegistry};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use texture_pool::{PoolConfig, PooledTexture, TexturePool, TextureUsage};
pub use worker::{AssetManager, AtomicFileEncoder, Encoder, ProgressSink, RenderWorker, TimelineCompiler, Worker};

/// Build a device/queue pair for headless (non-windowed) use: job workers,
/// tests, and batch rendering hosts that never present to a surface.
pub async fn headless_device() -> error::Result<(std::sync::Arc<wgpu::Device>, std::sync::Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| error::Error::custom("no suitable GPU adapter found"))?;

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("render_orchestration_core device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(|e| error::Error::custom(e.to_string()))?;

    Ok((std::sync::Arc::new(device), std::sync::Arc::new(queue)))
}
