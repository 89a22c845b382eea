//! Built-in compatibility kernels (§4.2): resize adapters inserted implicitly
//! by the executor to reconcile mismatched edge sizes. Adapters never alter
//! semantics and are never inserted for `mask`/`face_mask` ports.

use std::borrow::Cow;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::kernel::KernelInvocation;

pub const RESIZE_BILINEAR_RGBA16F: &str = "resize_bilinear_rgba16f";
pub const RESIZE_BICUBIC_RGBA16F: &str = "resize_bicubic_rgba16f";

const RESIZE_SHADER: &str = r#"
@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var dst_tex: texture_storage_2d<rgba16float, write>;

fn cubic_weight(x: f32) -> f32 {
    let a = -0.5;
    let ax = abs(x);
    if (ax <= 1.0) {
        return (a + 2.0) * ax * ax * ax - (a + 3.0) * ax * ax + 1.0;
    } else if (ax < 2.0) {
        return a * ax * ax * ax - 5.0 * a * ax * ax + 8.0 * a * ax - 4.0 * a;
    }
    return 0.0;
}

@compute @workgroup_size(8, 8, 1)
fn resize_bilinear(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dst_size = textureDimensions(dst_tex);
    if (gid.x >= dst_size.x || gid.y >= dst_size.y) {
        return;
    }
    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5)) / vec2<f32>(dst_size);
    let sample = textureSampleLevel(src_tex, src_sampler, uv, 0.0);
    textureStore(dst_tex, vec2<i32>(gid.xy), sample);
}

@compute @workgroup_size(8, 8, 1)
fn resize_bicubic(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dst_size = textureDimensions(dst_tex);
    if (gid.x >= dst_size.x || gid.y >= dst_size.y) {
        return;
    }
    let src_size = textureDimensions(src_tex);
    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5, 0.5)) / vec2<f32>(dst_size);
    let src_coord = uv * vec2<f32>(src_size) - vec2<f32>(0.5, 0.5);
    let base = floor(src_coord);
    let frac = src_coord - base;

    var accum = vec4<f32>(0.0, 0.0, 0.0, 0.0);
    var weight_sum = 0.0;
    for (var m: i32 = -1; m <= 2; m = m + 1) {
        for (var n: i32 = -1; n <= 2; n = n + 1) {
            let weight = cubic_weight(f32(m) - frac.x) * cubic_weight(f32(n) - frac.y);
            let sample_uv = (base + vec2<f32>(f32(m), f32(n)) + vec2<f32>(0.5, 0.5)) / vec2<f32>(src_size);
            let clamped_uv = clamp(sample_uv, vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0));
            accum = accum + weight * textureSampleLevel(src_tex, src_sampler, clamped_uv, 0.0);
            weight_sum = weight_sum + weight;
        }
    }
    textureStore(dst_tex, vec2<i32>(gid.xy), accum / weight_sum);
}
"#;

struct ResizePipelines {
    bilinear: wgpu::ComputePipeline,
    bicubic: wgpu::ComputePipeline,
    sampler: wgpu::Sampler,
    bind_group_layout: wgpu::BindGroupLayout,
}

static PIPELINES: OnceLock<std::sync::Mutex<Option<ResizePipelines>>> = OnceLock::new();

fn get_or_init_pipelines(device: &wgpu::Device) -> Result<()> {
    let cell = PIPELINES.get_or_init(|| std::sync::Mutex::new(None));
    let mut guard = cell.lock().expect("resize pipeline cache poisoned");
    if guard.is_some() {
        return Ok(());
    }

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("resize adapter kernels"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(RESIZE_SHADER)),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("resize adapter bind group layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba16Float,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("resize adapter pipeline layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let bilinear = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("resize_bilinear_rgba16f"),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: "resize_bilinear",
        compilation_options: Default::default(),
        cache: None,
    });
    let bicubic = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("resize_bicubic_rgba16f"),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: "resize_bicubic",
        compilation_options: Default::default(),
        cache: None,
    });

    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("resize adapter sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });

    *guard = Some(ResizePipelines {
        bilinear,
        bicubic,
        sampler,
        bind_group_layout,
    });
    Ok(())
}

fn dispatch_resize(invocation: &KernelInvocation<'_>, bicubic: bool) -> Result<()> {
    let src = invocation
        .inputs
        .iter()
        .find(|b| b.port == "source" || b.port == "src")
        .or_else(|| invocation.inputs.first())
        .ok_or_else(|| Error::MissingAdapterPSO("resize adapter requires a bound source input".into()))?;

    get_or_init_pipelines(invocation.device)?;
    let cell = PIPELINES.get().expect("pipeline cache initialized above");
    let guard = cell.lock().expect("resize pipeline cache poisoned");
    let pipelines = guard.as_ref().expect("pipeline cache initialized above");

    let bind_group = invocation.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("resize adapter bind group"),
        layout: &pipelines.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(src.texture.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&pipelines.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(invocation.output.view()),
            },
        ],
    });

    let pipeline = if bicubic { &pipelines.bicubic } else { &pipelines.bilinear };
    let mut encoder = invocation
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("resize adapter dispatch"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("resize adapter pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups_x = invocation.output.width().div_ceil(8);
        let groups_y = invocation.output.height().div_ceil(8);
        pass.dispatch_workgroups(groups_x.max(1), groups_y.max(1), 1);
    }
    invocation.queue.submit(std::iter::once(encoder.finish()));
    Ok(())
}

pub struct ResizeBilinearKernel;

impl crate::kernel::Kernel for ResizeBilinearKernel {
    fn dispatch(&self, invocation: &KernelInvocation<'_>) -> Result<()> {
        dispatch_resize(invocation, false)
    }
}

pub struct ResizeBicubicKernel;

impl crate::kernel::Kernel for ResizeBicubicKernel {
    fn dispatch(&self, invocation: &KernelInvocation<'_>) -> Result<()> {
        dispatch_resize(invocation, true)
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::KernelRegistry;

    #[test]
    fn both_adapters_are_registered_by_default() {
        let reg = KernelRegistry::with_builtin_adapters();
        assert!(reg.get(super::RESIZE_BILINEAR_RGBA16F).is_some());
        assert!(reg.get(super::RESIZE_BICUBIC_RGBA16F).is_some());
    }
}
