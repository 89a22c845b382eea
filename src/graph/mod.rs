//! Render graph data model: nodes, edges, per-node output contracts.
//!
//! Pure data — no GPU handles live here. The graph is built once per frame
//! (or per cached segment) and is never mutated once submitted to the executor.

mod rational;
mod resolve;

pub use rational::Rational;
pub use resolve::{resolve_output_pixel_format, resolve_output_size};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier for a node within a single `RenderGraph`. Lexicographic order on
/// the wrapped string is the executor's topological tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of an input port on a node, e.g. `"source"`, `"mask"`, `"face_mask"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortName(pub String);

impl PortName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Ports whose contents are sampled in normalized coordinates by
    /// downstream kernels; resizing them would alter alignment/energy, so the
    /// executor never inserts an adapter on these regardless of edge policy.
    pub fn is_size_exempt(&self) -> bool {
        self.0 == "mask" || self.0 == "face_mask"
    }
}

impl From<&str> for PortName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a registered compute kernel (domain kernel or built-in adapter).
pub type KernelName = String;

/// Scalar/vector/struct parameter value passed to a kernel invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Scalar(f64),
    Vec(Vec<f64>),
    Struct(HashMap<String, ParamValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Full,
    Half,
    Quarter,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba16Float,
    Bgra8,
    Rgba8,
    R8,
}

impl PixelFormat {
    /// Bytes per pixel, used only for pool budget accounting (§4.1 size
    /// estimation); real device allocations may round up to a different size.
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::R8 => 1,
        }
    }

    /// Whether this format may legally appear at a non-terminal node, or at a
    /// terminal node without `allow_non_float_terminal`.
    pub fn is_float(self) -> bool {
        matches!(self, PixelFormat::Rgba16Float)
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub fixed_w: Option<u32>,
    pub fixed_h: Option<u32>,
}

impl OutputSpec {
    pub fn full(pixel_format: PixelFormat) -> Self {
        Self {
            resolution: Resolution::Full,
            pixel_format,
            fixed_w: None,
            fixed_h: None,
        }
    }

    pub fn half(pixel_format: PixelFormat) -> Self {
        Self {
            resolution: Resolution::Half,
            pixel_format,
            fixed_w: None,
            fixed_h: None,
        }
    }

    pub fn quarter(pixel_format: PixelFormat) -> Self {
        Self {
            resolution: Resolution::Quarter,
            pixel_format,
            fixed_w: None,
            fixed_h: None,
        }
    }

    pub fn fixed(pixel_format: PixelFormat, w: u32, h: u32) -> Self {
        Self {
            resolution: Resolution::Fixed,
            pixel_format,
            fixed_w: Some(w),
            fixed_h: Some(h),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Rational,
    pub end: Rational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderNode {
    pub id: NodeId,
    pub name: String,
    pub shader: KernelName,
    pub inputs: HashMap<PortName, NodeId>,
    pub parameters: HashMap<String, ParamValue>,
    pub output: Option<OutputSpec>,
    pub timing: Option<TimeRange>,
}

impl RenderNode {
    pub fn new(id: impl Into<String>, shader: impl Into<String>) -> Self {
        let id = NodeId::new(id);
        Self {
            name: id.0.clone(),
            id,
            shader: shader.into(),
            inputs: HashMap::new(),
            parameters: HashMap::new(),
            output: None,
            timing: None,
        }
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, from: impl Into<String>) -> Self {
        self.inputs.insert(PortName::new(port), NodeId::new(from));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgePolicy {
    RequireExplicitAdapters,
    AutoResizeBilinear,
    AutoResizeBicubic,
}

/// A DAG of `RenderNode`s. Immutable once constructed; the executor never
/// mutates a graph it is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderGraph {
    pub nodes: Vec<RenderNode>,
    pub root: NodeId,
}

impl RenderGraph {
    pub fn new(nodes: Vec<RenderNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    pub fn node(&self, id: &NodeId) -> Option<&RenderNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Validate the acyclicity and dangling-input invariants from §3.1. Does
    /// not compute a schedule; see `crate::executor` for the toposort itself.
    pub fn validate(&self) -> Result<()> {
        if self.node(&self.root).is_none() {
            return Err(Error::DanglingInput {
                node: self.root.clone(),
                port: PortName::new("<root>"),
                target: self.root.clone(),
            });
        }

        let by_id: HashMap<&NodeId, &RenderNode> = self.nodes.iter().map(|n| (&n.id, n)).collect();
        for node in &self.nodes {
            for (port, target) in &node.inputs {
                if !by_id.contains_key(target) {
                    return Err(Error::DanglingInput {
                        node: node.id.clone(),
                        port: port.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Cycle check via DFS with a recursion-stack set, walking from root
        // over the reverse-dependency direction (inputs point to producers).
        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut stack: HashSet<&NodeId> = HashSet::new();

        fn visit<'a>(
            id: &'a NodeId,
            by_id: &HashMap<&'a NodeId, &'a RenderNode>,
            visited: &mut HashSet<&'a NodeId>,
            stack: &mut HashSet<&'a NodeId>,
            root: &NodeId,
        ) -> Result<()> {
            if stack.contains(id) {
                return Err(Error::Cycle { root: root.clone() });
            }
            if visited.contains(id) {
                return Ok(());
            }
            visited.insert(id);
            stack.insert(id);
            if let Some(node) = by_id.get(id) {
                for target in node.inputs.values() {
                    visit(target, by_id, visited, stack, root)?;
                }
            }
            stack.remove(id);
            Ok(())
        }

        visit(&self.root, &by_id, &mut visited, &mut stack, &self.root)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    /// 0-100; kernels may use this to trade fidelity for speed. Opaque to
    /// the executor, which only threads it through to kernel parameters.
    pub level: u8,
}

impl Default for Quality {
    fn default() -> Self {
        Self { level: 100 }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub graph: RenderGraph,
    pub time: Rational,
    pub base_width: u32,
    pub base_height: u32,
    pub quality: Quality,
    pub edge_policy: EdgePolicy,
    pub allow_non_float_terminal: bool,
}

impl RenderRequest {
    pub fn new(graph: RenderGraph, base_width: u32, base_height: u32) -> Self {
        Self {
            graph,
            time: Rational::new(0, 1),
            base_width,
            base_height,
            quality: Quality::default(),
            edge_policy: EdgePolicy::RequireExplicitAdapters,
            allow_non_float_terminal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> RenderGraph {
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let b = RenderNode::new("b", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("source", "a");
        RenderGraph::new(vec![a, b], NodeId::new("b"))
    }

    #[test]
    fn validate_accepts_acyclic_graph() {
        assert!(linear_graph().validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_input() {
        let b = RenderNode::new("b", "identity").with_input("source", "missing");
        let g = RenderGraph::new(vec![b], NodeId::new("b"));
        assert!(matches!(g.validate(), Err(Error::DanglingInput { .. })));
    }

    #[test]
    fn validate_rejects_cycle() {
        let a = RenderNode::new("a", "identity").with_input("source", "b");
        let b = RenderNode::new("b", "identity").with_input("source", "a");
        let g = RenderGraph::new(vec![a, b], NodeId::new("b"));
        assert!(matches!(g.validate(), Err(Error::Cycle { .. })));
    }

    #[test]
    fn validate_rejects_missing_root() {
        let a = RenderNode::new("a", "identity");
        let g = RenderGraph::new(vec![a], NodeId::new("missing"));
        assert!(g.validate().is_err());
    }

    #[test]
    fn mask_port_is_size_exempt() {
        assert!(PortName::new("mask").is_size_exempt());
        assert!(PortName::new("face_mask").is_size_exempt());
        assert!(!PortName::new("source").is_size_exempt());
    }
}
