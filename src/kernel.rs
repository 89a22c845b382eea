//! Kernel registry shared by domain kernels and built-in adapter kernels
//! (§4.2). Grounded on the teacher's `bind_group_manager.rs` cache shape:
//! a `DashMap` keyed by name, `Arc`-shared trait objects, no locking on the
//! read path.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::texture_pool::PooledTexture;

/// One bound input to a kernel invocation: the port it arrived on and the
/// texture view feeding it.
pub struct BoundInput<'a> {
    pub port: &'a str,
    pub texture: &'a PooledTexture,
}

/// Everything a kernel needs to run one dispatch: device/queue, the output
/// it writes to, its bound inputs, and its serialized parameters.
pub struct KernelInvocation<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub output: &'a PooledTexture,
    pub inputs: &'a [BoundInput<'a>],
    pub parameters: &'a std::collections::HashMap<String, crate::graph::ParamValue>,
}

/// A compute/render kernel: a domain effect or a built-in adapter. Threadgroup
/// sizing is the implementation's responsibility; it must be correct for any
/// output size >= 1x1 (§4.4f).
pub trait Kernel: Send + Sync {
    fn dispatch(&self, invocation: &KernelInvocation<'_>) -> Result<()>;
}

impl<F> Kernel for F
where
    F: Fn(&KernelInvocation<'_>) -> Result<()> + Send + Sync,
{
    fn dispatch(&self, invocation: &KernelInvocation<'_>) -> Result<()> {
        self(invocation)
    }
}

/// Registry of kernels keyed by name, shared between domain kernels
/// (registered by the caller) and the two built-in adapter kernels.
#[derive(Clone)]
pub struct KernelRegistry {
    kernels: Arc<DashMap<String, Arc<dyn Kernel>>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: Arc::new(DashMap::new()),
        }
    }

    /// A registry pre-populated with the two built-in adapter kernels
    /// (§4.2): `resize_bilinear_rgba16f` and `resize_bicubic_rgba16f`.
    pub fn with_builtin_adapters() -> Self {
        let registry = Self::new();
        registry.register(
            crate::adapters::RESIZE_BILINEAR_RGBA16F,
            crate::adapters::ResizeBilinearKernel,
        );
        registry.register(
            crate::adapters::RESIZE_BICUBIC_RGBA16F,
            crate::adapters::ResizeBicubicKernel,
        );
        registry
    }

    pub fn register(&self, name: impl Into<String>, kernel: impl Kernel + 'static) {
        let name = name.into();
        debug!(kernel = %name, "registering kernel");
        self.kernels.insert(name, Arc::new(kernel));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Kernel>> {
        self.kernels.get(name).map(|entry| entry.value().clone())
    }

    pub fn require(&self, name: &str) -> Result<Arc<dyn Kernel>> {
        self.get(name).ok_or_else(|| Error::MissingKernel(name.to_string()))
    }

    /// Like `require`, but for the executor's edge-policy adapter lookup
    /// (§4.4e): a miss here reports `MissingAdapterPSO`, not `MissingKernel`,
    /// since an absent compatibility adapter is a distinct failure mode from
    /// an absent domain kernel (§7 error taxonomy).
    pub fn require_adapter(&self, name: &str) -> Result<Arc<dyn Kernel>> {
        self.get(name).ok_or_else(|| Error::MissingAdapterPSO(name.to_string()))
    }

    /// Whether `name` names one of the built-in compatibility adapters,
    /// used by the executor's "node.shader is an adapter kernel" bind check
    /// (§4.4e) so an adapter is never itself fed through another adapter.
    pub fn is_adapter(name: &str) -> bool {
        name == crate::adapters::RESIZE_BILINEAR_RGBA16F || name == crate::adapters::RESIZE_BICUBIC_RGBA16F
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_fails_for_unregistered_kernel() {
        let reg = KernelRegistry::new();
        assert!(matches!(reg.require("nope"), Err(Error::MissingKernel(_))));
    }

    #[test]
    fn require_adapter_fails_with_missing_adapter_pso() {
        let reg = KernelRegistry::new();
        assert!(matches!(reg.require_adapter("nope"), Err(Error::MissingAdapterPSO(_))));
    }

    #[test]
    fn builtin_registry_has_both_adapters() {
        let reg = KernelRegistry::with_builtin_adapters();
        assert!(reg.get("resize_bilinear_rgba16f").is_some());
        assert!(reg.get("resize_bicubic_rgba16f").is_some());
    }

    #[test]
    fn is_adapter_recognizes_builtins_only() {
        assert!(KernelRegistry::is_adapter("resize_bilinear_rgba16f"));
        assert!(!KernelRegistry::is_adapter("color_grade"));
    }
}
