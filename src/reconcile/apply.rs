use nalgebra::Vector3;

use crate::scene::{NodeId, SceneGraph};

/// Multiply the local scale of `node` by `correction` component-wise.
///
/// The matcher claims `node` right after this call, so a record is never
/// applied twice to the same target.
pub fn apply_scale(
    graph: &mut SceneGraph,
    node: NodeId,
    correction: &Vector3<f32>,
    applied_count: &mut usize,
) {
    let current = graph.node(node).scale;
    graph.node_mut(node).scale = current.component_mul(correction);
    graph.mark_dirty(node);
    *applied_count += 1;
}
