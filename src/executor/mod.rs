//! Topological graph executor (§4.4). Grounded on the teacher's
//! `pipeline_manager.rs` per-stage dispatch loop, adapted from an async
//! multi-stage pipeline to a synchronous per-frame DAG walk: one
//! `GraphExecutor` instance belongs to exactly one worker and is never
//! shared across threads (§5 "not thread-safe within a single instance").

mod toposort;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::error::{Error, Result};
use crate::graph::{
    resolve_output_pixel_format, resolve_output_size, EdgePolicy, NodeId, PixelFormat, RenderGraph, RenderNode,
    RenderRequest,
};
use crate::kernel::{BoundInput, KernelInvocation, KernelRegistry};
use crate::texture_pool::{PooledTexture, TexturePool, TextureUsage};

/// One entry in the executor's diagnostic surface (§6.6). The vocabulary is
/// closed: these three variants are the entire warning surface. A missing
/// upstream texture is not a warning — it is an internal invariant
/// violation and fails the request (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    SizeMismatch {
        node: NodeId,
        port: String,
        in_size: (u32, u32),
        node_size: (u32, u32),
    },
    AutoResize {
        node: NodeId,
        port: String,
        in_size: (u32, u32),
        node_size: (u32, u32),
    },
    OutputFormatOverride {
        node: NodeId,
        requested: PixelFormat,
        using: PixelFormat,
    },
}

pub struct GraphExecutor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pool: TexturePool,
    kernels: KernelRegistry,
}

impl GraphExecutor {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, pool: TexturePool, kernels: KernelRegistry) -> Self {
        Self { device, queue, pool, kernels }
    }

    /// §4.4 `execute`: runs the full per-node loop and returns the root
    /// texture plus warnings ordered by node visitation.
    #[instrument(skip(self, req), fields(root = %req.graph.root))]
    pub fn execute(&mut self, req: &RenderRequest) -> Result<(PooledTexture, Vec<Warning>)> {
        req.graph.validate()?;

        let order = toposort::topological_order(&req.graph)?;
        let consumer_counts = count_consumers(&req.graph, &order);
        let mut remaining = consumer_counts.clone();

        let mut textures: HashMap<NodeId, PooledTexture> = HashMap::new();
        let mut warnings = Vec::new();

        for node_id in &order {
            let node = req
                .graph
                .node(node_id)
                .expect("toposort only yields nodes present in the graph");

            let (w, h) = resolve_output_size(node, req.base_width, req.base_height);
            let pf_req = resolve_output_pixel_format(node);
            let is_terminal = *node_id == req.graph.root;

            let pf_final = if pf_req == PixelFormat::Rgba16Float {
                pf_req
            } else if is_terminal && req.allow_non_float_terminal {
                pf_req
            } else {
                warnings.push(Warning::OutputFormatOverride {
                    node: node_id.clone(),
                    requested: pf_req,
                    using: PixelFormat::Rgba16Float,
                });
                PixelFormat::Rgba16Float
            };

            let output = self
                .pool
                .acquire_intermediate(pf_final.to_wgpu(), w, h, TextureUsage::ShaderReadWriteRenderTarget)?;

            // `Direct` binds point at an already-computed upstream texture;
            // `Scratch` binds point into `scratch_textures` below. Resolved
            // before borrowing either map immutably, since `bound_inputs`
            // must outlive the loop that produces the scratch textures.
            enum Binding {
                Direct(NodeId),
                Scratch(usize),
            }
            let mut port_bindings: Vec<(String, Binding)> = Vec::new();
            let mut scratch_textures: Vec<PooledTexture> = Vec::new();
            let mut sorted_ports: Vec<_> = node.inputs.iter().collect();
            sorted_ports.sort_by(|a, b| a.0.cmp(b.0));

            for (port, upstream_id) in sorted_ports {
                let Some(upstream_texture) = textures.get(upstream_id) else {
                    return Err(Error::Custom(format!(
                        "node {node_id} port {} references upstream {upstream_id}, which produced no texture",
                        port.0
                    )));
                };
                let in_size = (upstream_texture.width(), upstream_texture.height());

                let bind_directly =
                    in_size == (w, h) || port.is_size_exempt() || KernelRegistry::is_adapter(&node.shader);

                if bind_directly {
                    port_bindings.push((port.0.clone(), Binding::Direct(upstream_id.clone())));
                    continue;
                }

                match req.edge_policy {
                    EdgePolicy::RequireExplicitAdapters => {
                        warnings.push(Warning::SizeMismatch {
                            node: node_id.clone(),
                            port: port.0.clone(),
                            in_size,
                            node_size: (w, h),
                        });
                        port_bindings.push((port.0.clone(), Binding::Direct(upstream_id.clone())));
                    }
                    EdgePolicy::AutoResizeBilinear | EdgePolicy::AutoResizeBicubic => {
                        let adapter_name = match req.edge_policy {
                            EdgePolicy::AutoResizeBilinear => crate::adapters::RESIZE_BILINEAR_RGBA16F,
                            EdgePolicy::AutoResizeBicubic => crate::adapters::RESIZE_BICUBIC_RGBA16F,
                            EdgePolicy::RequireExplicitAdapters => unreachable!(),
                        };
                        let adapter = self.kernels.require_adapter(adapter_name)?;
                        let scratch = self.pool.acquire_intermediate(
                            PixelFormat::Rgba16Float.to_wgpu(),
                            w,
                            h,
                            TextureUsage::ShaderReadWriteRenderTarget,
                        )?;
                        let adapter_inputs = [BoundInput {
                            port: "source",
                            texture: upstream_texture,
                        }];
                        let invocation = KernelInvocation {
                            device: &self.device,
                            queue: &self.queue,
                            output: &scratch,
                            inputs: &adapter_inputs,
                            parameters: &HashMap::new(),
                        };
                        adapter.dispatch(&invocation)?;
                        warnings.push(Warning::AutoResize {
                            node: node_id.clone(),
                            port: port.0.clone(),
                            in_size,
                            node_size: (w, h),
                        });
                        scratch_textures.push(scratch);
                        port_bindings.push((port.0.clone(), Binding::Scratch(scratch_textures.len() - 1)));
                    }
                }
            }

            let mut bound_inputs: Vec<BoundInput<'_>> = Vec::with_capacity(port_bindings.len());
            for (port, binding) in &port_bindings {
                let texture = match binding {
                    Binding::Direct(upstream_id) => textures
                        .get(upstream_id)
                        .expect("direct bindings were only recorded for present textures"),
                    Binding::Scratch(idx) => &scratch_textures[*idx],
                };
                bound_inputs.push(BoundInput {
                    port: port.as_str(),
                    texture,
                });
            }

            let kernel = self.kernels.require(&node.shader)?;
            let invocation = KernelInvocation {
                device: &self.device,
                queue: &self.queue,
                output: &output,
                inputs: &bound_inputs,
                parameters: &node.parameters,
            };
            kernel.dispatch(&invocation)?;
            drop(bound_inputs);

            for scratch in scratch_textures {
                scratch.release();
            }

            textures.insert(node_id.clone(), output);

            for upstream_id in node.inputs.values() {
                if let Some(count) = remaining.get_mut(upstream_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 && *upstream_id != req.graph.root {
                        if let Some(tex) = textures.remove(upstream_id) {
                            tex.release();
                        }
                    }
                }
            }
        }

        let root_texture = textures
            .remove(&req.graph.root)
            .ok_or_else(|| Error::Custom(format!("root node {} produced no texture", req.graph.root)))?;

        Ok((root_texture, warnings))
    }
}

fn count_consumers(graph: &RenderGraph, order: &[NodeId]) -> HashMap<NodeId, u32> {
    let mut counts: HashMap<NodeId, u32> = order.iter().map(|id| (id.clone(), 0)).collect();
    for node_id in order {
        let node: &RenderNode = graph.node(node_id).expect("reachable node must exist");
        for upstream in node.inputs.values() {
            if let Some(count) = counts.get_mut(upstream) {
                *count += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, OutputSpec, RenderGraph, RenderNode, RenderRequest};
    use crate::texture_pool::{PoolConfig, TexturePool};

    async fn test_device() -> (Arc<wgpu::Device>, Arc<wgpu::Queue>) {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: true,
            })
            .await
            .expect("no wgpu adapter available for tests");
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .expect("failed to create headless wgpu device");
        (Arc::new(device), Arc::new(queue))
    }

    fn identity_kernel() -> impl crate::kernel::Kernel {
        |_invocation: &KernelInvocation<'_>| -> Result<()> { Ok(()) }
    }

    async fn build_executor() -> GraphExecutor {
        let (device, queue) = test_device().await;
        let pool = TexturePool::new(device.clone(), PoolConfig::default());
        let kernels = KernelRegistry::with_builtin_adapters();
        kernels.register("identity", identity_kernel());
        GraphExecutor::new(device, queue, pool, kernels)
    }

    #[tokio::test]
    async fn half_resolution_branch_emits_single_auto_resize_warning() {
        let mut executor = build_executor().await;
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let b = RenderNode::new("b", "identity")
            .with_output(OutputSpec::half(PixelFormat::Rgba16Float))
            .with_input("source", "a");
        let c = RenderNode::new("c", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("a_in", "a")
            .with_input("b_in", "b");
        let graph = RenderGraph::new(vec![a, b, c], NodeId::new("c"));
        let mut req = RenderRequest::new(graph, 1920, 1080);
        req.edge_policy = EdgePolicy::AutoResizeBilinear;

        let (root, warnings) = executor.execute(&req).unwrap();
        assert_eq!((root.width(), root.height()), (1920, 1080));
        let auto_resizes: Vec<_> = warnings
            .iter()
            .filter(|w| matches!(w, Warning::AutoResize { .. }))
            .collect();
        assert_eq!(auto_resizes.len(), 1);
    }

    #[tokio::test]
    async fn mask_port_is_never_resized() {
        let mut executor = build_executor().await;
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let m = RenderNode::new("m", "identity").with_output(OutputSpec::quarter(PixelFormat::Rgba16Float));
        let b = RenderNode::new("b", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("source", "a")
            .with_input("mask", "m");
        let graph = RenderGraph::new(vec![a, m, b], NodeId::new("b"));
        let mut req = RenderRequest::new(graph, 1920, 1080);
        req.edge_policy = EdgePolicy::AutoResizeBilinear;

        let (_root, warnings) = executor.execute(&req).unwrap();
        assert!(!warnings.iter().any(|w| matches!(w, Warning::AutoResize { port, .. } if port == "mask")));
    }

    #[tokio::test]
    async fn non_float_intermediate_is_overridden_to_rgba16float() {
        let mut executor = build_executor().await;
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Bgra8));
        let b = RenderNode::new("b", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("source", "a");
        let graph = RenderGraph::new(vec![a, b], NodeId::new("b"));
        let req = RenderRequest::new(graph, 64, 64);

        let (_root, warnings) = executor.execute(&req).unwrap();
        assert!(warnings.iter().any(|w| matches!(
            w,
            Warning::OutputFormatOverride {
                requested: PixelFormat::Bgra8,
                using: PixelFormat::Rgba16Float,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn non_float_terminal_is_allowed_when_flagged() {
        let mut executor = build_executor().await;
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Bgra8));
        let graph = RenderGraph::new(vec![a], NodeId::new("a"));
        let mut req = RenderRequest::new(graph, 64, 64);
        req.allow_non_float_terminal = true;

        let (root, warnings) = executor.execute(&req).unwrap();
        assert!(!warnings.iter().any(|w| matches!(w, Warning::OutputFormatOverride { .. })));
        assert_eq!(root.key().size_bytes() > 0, true);
    }

    #[tokio::test]
    async fn missing_kernel_fails_with_structured_error() {
        let mut executor = build_executor().await;
        let a = RenderNode::new("a", "nonexistent_kernel").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let graph = RenderGraph::new(vec![a], NodeId::new("a"));
        let req = RenderRequest::new(graph, 64, 64);

        let err = executor.execute(&req).unwrap_err();
        assert!(matches!(err, Error::MissingKernel(_)));
    }
}
