//! Stable topological ordering over the subgraph reachable from `root`
//! (§4.4 step 1). Producers precede their consumers; ties break on
//! lexicographic `NodeId`, so identical graphs always schedule identically.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{Error, Result};
use crate::graph::{NodeId, RenderGraph};

pub fn topological_order(graph: &RenderGraph) -> Result<Vec<NodeId>> {
    let reachable = reachable_from(graph, &graph.root);

    let mut dependency_count: HashMap<&NodeId, u32> = HashMap::new();
    for id in &reachable {
        let node = graph.node(id).expect("reachable node must exist in graph");
        let count = node.inputs.values().filter(|target| reachable.contains(*target)).count() as u32;
        dependency_count.insert(id, count);
    }

    let mut consumers: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    for id in &reachable {
        let node = graph.node(id).expect("reachable node must exist in graph");
        for target in node.inputs.values() {
            if reachable.contains(target) {
                consumers.entry(target).or_default().push(id);
            }
        }
    }

    let mut ready: BTreeSet<&NodeId> = dependency_count
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(reachable.len());
    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        order.push(id.clone());
        if let Some(dependents) = consumers.get(id) {
            for dependent in dependents {
                let count = dependency_count.get_mut(dependent).expect("tracked dependency count");
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() != reachable.len() {
        return Err(Error::Cycle { root: graph.root.clone() });
    }

    Ok(order)
}

fn reachable_from(graph: &RenderGraph, root: &NodeId) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if let Some(node) = graph.node(&id) {
            for target in node.inputs.values() {
                stack.push(target.clone());
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{OutputSpec, PixelFormat, RenderNode};

    #[test]
    fn producers_precede_consumers() {
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let b = RenderNode::new("b", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("source", "a");
        let graph = RenderGraph::new(vec![a, b], NodeId::new("b"));
        let order = topological_order(&graph).unwrap();
        let pos_a = order.iter().position(|id| id.0 == "a").unwrap();
        let pos_b = order.iter().position(|id| id.0 == "b").unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn ties_break_lexicographically() {
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let z = RenderNode::new("z", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let root = RenderNode::new("root", "identity")
            .with_output(OutputSpec::full(PixelFormat::Rgba16Float))
            .with_input("x", "a")
            .with_input("y", "z");
        let graph = RenderGraph::new(vec![a, z, root], NodeId::new("root"));
        let order = topological_order(&graph).unwrap();
        assert_eq!(order[0].0, "a");
        assert_eq!(order[1].0, "z");
        assert_eq!(order[2].0, "root");
    }

    #[test]
    fn unreachable_nodes_are_excluded() {
        let a = RenderNode::new("a", "identity").with_output(OutputSpec::full(PixelFormat::Rgba16Float));
        let unreachable = RenderNode::new("orphan", "identity");
        let graph = RenderGraph::new(vec![a, unreachable], NodeId::new("a"));
        let order = topological_order(&graph).unwrap();
        assert_eq!(order.len(), 1);
    }
}
