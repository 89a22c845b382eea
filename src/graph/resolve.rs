//! Pure functions over graph data: §4.3.

use super::{PixelFormat, RenderNode, Resolution};

/// Resolve a node's output `(width, height)` from its `Resolution` tier and
/// the request's base size. Never returns a zero dimension.
pub fn resolve_output_size(node: &RenderNode, base_w: u32, base_h: u32) -> (u32, u32) {
    let spec = match &node.output {
        Some(spec) => spec,
        None => return (base_w.max(1), base_h.max(1)),
    };

    match spec.resolution {
        Resolution::Full => (base_w.max(1), base_h.max(1)),
        Resolution::Half => ((base_w / 2).max(1), (base_h / 2).max(1)),
        Resolution::Quarter => ((base_w / 4).max(1), (base_h / 4).max(1)),
        Resolution::Fixed => (
            spec.fixed_w.unwrap_or(base_w).max(1),
            spec.fixed_h.unwrap_or(base_h).max(1),
        ),
    }
}

/// Resolve a node's requested pixel format. Does not apply the conservative
/// override rule (§4.4.2c) — that decision needs terminal/policy context the
/// executor holds, not the node alone.
pub fn resolve_output_pixel_format(node: &RenderNode) -> PixelFormat {
    node.output
        .as_ref()
        .map(|spec| spec.pixel_format)
        .unwrap_or(PixelFormat::Rgba16Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputSpec;

    fn node_with(spec: OutputSpec) -> RenderNode {
        RenderNode::new("n", "identity").with_output(spec)
    }

    #[test]
    fn full_resolution_matches_base() {
        let n = node_with(OutputSpec::full(PixelFormat::Rgba16Float));
        assert_eq!(resolve_output_size(&n, 1920, 1080), (1920, 1080));
    }

    #[test]
    fn half_resolution_halves_and_floors() {
        let n = node_with(OutputSpec::half(PixelFormat::Rgba16Float));
        assert_eq!(resolve_output_size(&n, 1920, 1080), (960, 540));
    }

    #[test]
    fn half_of_one_pixel_never_hits_zero() {
        let n = node_with(OutputSpec::half(PixelFormat::Rgba16Float));
        assert_eq!(resolve_output_size(&n, 1, 1), (1, 1));
    }

    #[test]
    fn quarter_resolution_quarters_and_floors() {
        let n = node_with(OutputSpec::quarter(PixelFormat::Rgba16Float));
        assert_eq!(resolve_output_size(&n, 1920, 1080), (480, 270));
    }

    #[test]
    fn fixed_falls_back_to_base_when_zero() {
        let n = node_with(OutputSpec::fixed(PixelFormat::Rgba16Float, 0, 0));
        // fixed_w/h are explicitly 0, not None, so they are honored as 0 then clamped to 1.
        assert_eq!(resolve_output_size(&n, 0, 0), (1, 1));
    }

    #[test]
    fn fixed_uses_explicit_dims() {
        let n = node_with(OutputSpec::fixed(PixelFormat::Rgba16Float, 256, 128));
        assert_eq!(resolve_output_size(&n, 1920, 1080), (256, 128));
    }

    #[test]
    fn pixel_format_defaults_to_float_when_no_output_spec() {
        let n = RenderNode::new("n", "identity");
        assert_eq!(resolve_output_pixel_format(&n), PixelFormat::Rgba16Float);
    }
}
