//! Worker abstraction (§4.7) and the §6 external-interface traits it
//! depends on. Grounded on the teacher's `pipeline_manager.rs`
//! `PipelineStage` trait (`async fn run(&self, ctx: &mut Self::Ctx)`):
//! `Worker::execute` is the same shape specialized to jobs instead of
//! pipeline stages.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::executor::GraphExecutor;
use crate::graph::{PixelFormat, Rational, RenderGraph, RenderRequest, TimeRange};
use crate::kernel::KernelRegistry;
use crate::texture_pool::{PooledTexture, TexturePool};

/// Progress + cancellation handed to a worker for the duration of one job.
/// The `reporter` callback is optional; cancellation is always observable.
#[derive(Clone)]
pub struct ProgressSink {
    cancellation: CancellationToken,
    reporter: Option<Arc<dyn Fn(u64, u64) + Send + Sync>>,
}

impl ProgressSink {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation, reporter: None }
    }

    pub fn with_reporter(cancellation: CancellationToken, reporter: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self {
            cancellation,
            reporter: Some(Arc::new(reporter)),
        }
    }

    pub fn report(&self, frame: u64, total: u64) {
        if let Some(reporter) = &self.reporter {
            reporter(frame, total);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// §4.7 uniform worker abstraction. One instance serves exactly one
/// `JobType`; the scheduler looks workers up by type.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, job: crate::job_queue::Job, progress: ProgressSink) -> Result<Vec<u8>>;
}

/// A stable hash of a timeline segment's compilable content (Glossary:
/// "segment signature"); used to cache compiled graphs across frames of the
/// same job when the segment itself hasn't changed.
pub type SegmentSignature = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub effects: Vec<String>,
    pub asset_refs: Vec<String>,
    pub time_range: TimeRange,
    pub signature: SegmentSignature,
}

/// §6.1 inbound interface: compiles a segment descriptor into a fixed-root
/// `RenderGraph`. The compiler inserts domain-semantic nodes; the executor
/// inserts only compatibility adapters.
pub trait TimelineCompiler: Send + Sync {
    fn compile(&self, segment: &SegmentDescriptor, time: Rational) -> Result<RenderGraph>;
}

pub type AssetId = String;

/// §6.2 inbound interface: the executor acquires asset textures by
/// reference; the Asset Manager owns asset lifetimes and quality tiers.
pub trait AssetManager: Send + Sync {
    fn asset_texture(&self, asset_id: &AssetId, time: Rational) -> Result<PooledTexture>;
}

/// §6.3 outbound interface: a single container file written incrementally,
/// one frame at a time, with a presentation timestamp per frame.
pub trait Encoder: Send {
    fn append_frame(&mut self, pixels: &[u8], pts: Rational) -> Result<()>;
    fn finalize(self: Box<Self>) -> Result<()>;
    fn abort(self: Box<Self>) -> Result<()>;
}

/// Owns the `<path>.tmp` → fsync → rename dance so no partial file is ever
/// visible at the documented output path (§5 cancellation semantics, §6.3).
pub struct AtomicFileEncoder {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: std::fs::File,
    frames_written: u64,
}

impl AtomicFileEncoder {
    pub fn create(final_path: impl Into<PathBuf>) -> Result<Self> {
        let final_path = final_path.into();
        let tmp_path = final_path.with_extension(
            final_path
                .extension()
                .map(|ext| format!("{}.tmp", ext.to_string_lossy()))
                .unwrap_or_else(|| "tmp".to_string()),
        );
        let file = std::fs::File::create(&tmp_path).map_err(|e| Error::EncoderFailure(e.to_string()))?;
        Ok(Self {
            final_path,
            tmp_path,
            file,
            frames_written: 0,
        })
    }
}

impl Encoder for AtomicFileEncoder {
    fn append_frame(&mut self, pixels: &[u8], _pts: Rational) -> Result<()> {
        use std::io::Write;
        self.file.write_all(pixels).map_err(|e| Error::EncoderFailure(e.to_string()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::EncoderFailure(e.to_string()))?;
        drop(self.file);
        std::fs::rename(&self.tmp_path, &self.final_path).map_err(|e| Error::EncoderFailure(e.to_string()))?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        drop(self.file);
        let _ = std::fs::remove_file(&self.tmp_path);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RenderPayload {
    segment: SegmentDescriptor,
    target_path: String,
    frame_count: u64,
    width: u32,
    height: u32,
    fps: u32,
    #[serde(default = "default_progress_every")]
    progress_every: u64,
}

fn default_progress_every() -> u64 {
    30
}

/// §4.7 `RenderWorker`: compiles, executes, and encodes one render job
/// frame by frame. Holds its own `GraphExecutor`; never shared across
/// workers (§5: "not thread-safe within a single instance").
pub struct RenderWorker {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pool: TexturePool,
    kernels: KernelRegistry,
    compiler: Arc<dyn TimelineCompiler>,
}

impl RenderWorker {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        pool: TexturePool,
        kernels: KernelRegistry,
        compiler: Arc<dyn TimelineCompiler>,
    ) -> Self {
        Self { device, queue, pool, kernels, compiler }
    }

    async fn read_back_pixels(&self, texture: &PooledTexture) -> Result<Vec<u8>> {
        let (width, height) = (texture.width(), texture.height());
        let bytes_per_pixel = 8u32; // RGBA16F; non-float terminals are rare and out of scope for readback here.
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame readback buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame readback encoder") });
        encoder.copy_texture_to_buffer(
            texture.texture().as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.await
            .map_err(|_| Error::EncoderFailure("readback channel closed".into()))?
            .map_err(|e| Error::EncoderFailure(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut packed = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            packed.extend_from_slice(&data[start..end]);
        }
        drop(data);
        buffer.unmap();
        Ok(packed)
    }

    /// Compiles (or reuses the cached compile of) `payload.segment`, runs it
    /// through `executor`, and reads the root texture back to host memory.
    /// Isolated from `execute`'s frame loop so a failure here can be matched
    /// on and turned into `encoder.abort()` before propagating (§7).
    async fn render_one_frame(
        &self,
        executor: &mut GraphExecutor,
        payload: &RenderPayload,
        cached_graph: &mut Option<(SegmentSignature, RenderGraph)>,
        time: Rational,
    ) -> Result<Vec<u8>> {
        let graph = match cached_graph {
            Some((sig, graph)) if *sig == payload.segment.signature => graph.clone(),
            _ => {
                let graph = self.compiler.compile(&payload.segment, time)?;
                *cached_graph = Some((payload.segment.signature.clone(), graph.clone()));
                graph
            }
        };

        let mut req = RenderRequest::new(graph, payload.width, payload.height);
        req.time = time;

        let (root_texture, warnings) = executor.execute(&req)?;
        for warning in &warnings {
            debug!(?warning, "executor warning");
        }

        let pixels = self.read_back_pixels(&root_texture).await?;
        root_texture.release();
        Ok(pixels)
    }
}

#[async_trait]
impl Worker for RenderWorker {
    #[instrument(skip(self, job, progress), fields(job_id = %job.id))]
    async fn execute(&self, job: crate::job_queue::Job, progress: ProgressSink) -> Result<Vec<u8>> {
        let payload: RenderPayload =
            serde_json::from_slice(&job.payload).map_err(|e| Error::InvalidPayload(e.to_string()))?;

        let mut encoder: Box<dyn Encoder> = Box::new(AtomicFileEncoder::create(&payload.target_path)?);
        let mut executor = GraphExecutor::new(self.device.clone(), self.queue.clone(), self.pool.clone(), self.kernels.clone());

        let mut cached_graph: Option<(SegmentSignature, RenderGraph)> = None;

        for frame in 0..payload.frame_count {
            if progress.is_cancelled() {
                // §4.7(g): cancellation finalizes with whatever was written
                // so far; it is not an error outcome for the output file.
                encoder.finalize()?;
                return Err(Error::Cancelled);
            }

            let time = Rational::frame_time(frame, payload.fps);

            let frame_result = self.render_one_frame(&mut executor, &payload, &mut cached_graph, time).await;
            let pixels = match frame_result {
                Ok(pixels) => pixels,
                Err(err) => {
                    encoder.abort()?;
                    return Err(err);
                }
            };

            if let Err(err) = encoder.append_frame(&pixels, time) {
                encoder.abort()?;
                return Err(err);
            }

            if frame % payload.progress_every == 0 || frame + 1 == payload.frame_count {
                progress.report(frame + 1, payload.frame_count);
            }
        }

        encoder.finalize()?;
        Ok(serde_json::to_vec(&serde_json::json!({ "frames": payload.frame_count })).unwrap_or_default())
    }
}

/// §4.7 "variants include ingest workers ... analysis workers, export
/// workers" — out of scope beyond a payload-decode + completion-report
/// shape (peripheral-subsystem carve-out, §1).
macro_rules! stub_worker {
    ($name:ident) => {
        pub struct $name;

        #[async_trait]
        impl Worker for $name {
            async fn execute(&self, job: crate::job_queue::Job, progress: ProgressSink) -> Result<Vec<u8>> {
                if progress.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                progress.report(1, 1);
                Ok(job.payload)
            }
        }
    };
}

stub_worker!(IngestWorker);
stub_worker!(AnalysisWorker);
stub_worker!(ExportWorker);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, OutputSpec, RenderNode};

    struct IdentityCompiler;

    impl TimelineCompiler for IdentityCompiler {
        fn compile(&self, _segment: &SegmentDescriptor, _time: Rational) -> Result<RenderGraph> {
            let node = RenderNode::new("root", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
            Ok(RenderGraph::new(vec![node], NodeId::new("root")))
        }
    }

    #[test]
    fn atomic_encoder_produces_no_partial_output_on_abort() {
        let dir = std::env::temp_dir().join(format!("render_orchestration_core_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("out.bin");

        let encoder = AtomicFileEncoder::create(&target).unwrap();
        Box::new(encoder).abort().unwrap();

        assert!(!target.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_encoder_renames_into_place_on_finalize() {
        let dir = std::env::temp_dir().join(format!("render_orchestration_core_test_fin_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("out.bin");

        let mut encoder = AtomicFileEncoder::create(&target).unwrap();
        encoder.append_frame(b"frame0", Rational::new(0, 1)).unwrap();
        Box::new(encoder).finalize().unwrap();

        assert!(target.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
