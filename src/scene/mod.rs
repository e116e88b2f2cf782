pub mod gltf_io;

use std::{collections::BTreeSet, sync::Arc};

use nalgebra::Vector3;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

// ─── Identifiers ──────────────────────────────────────────────────────────────

/// Index of a node inside the [`SceneGraph`] arena that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Recoverable failures while reading or writing per-renderer data.
pub enum SceneError {
    #[error("shape key index {index} is out of range for mesh '{mesh}' ({count} weights)")]
    WeightIndexOutOfRange {
        mesh: String,
        index: usize,
        count: usize,
    },

    #[error("node {node} has no renderer at slot {slot}")]
    MissingRenderer { node: usize, slot: usize },
}

// ─── Mesh data ────────────────────────────────────────────────────────────────

/// Shared, read-only mesh description. Only the shape-key channel names matter
/// for synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub name: String,
    /// One entry per morph channel; `None` when the source gives no name.
    pub shape_keys: Vec<Option<String>>,
}

impl Mesh {
    /// Mesh whose channels are all named.
    pub fn new(name: impl Into<String>, shape_keys: Vec<String>) -> Self {
        Self::with_channels(name, shape_keys.into_iter().map(Some).collect())
    }

    pub fn with_channels(name: impl Into<String>, shape_keys: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            shape_keys,
        }
    }

    /// Named channels with their indices.
    pub fn named_shape_keys(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.shape_keys
            .iter()
            .enumerate()
            .filter_map(|(index, name)| name.as_deref().map(|name| (index, name)))
    }

    pub fn unnamed_count(&self) -> usize {
        self.shape_keys.iter().filter(|name| name.is_none()).count()
    }
}

/// A skinned mesh renderer attached to a node.
///
/// The weight array is normally sized to the mesh's shape-key count. A shorter
/// array is tolerated: reads and writes past its end fail for that index only.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRenderer {
    mesh: Option<Arc<Mesh>>,
    weights: Vec<f32>,
}

impl MeshRenderer {
    /// Renderer with every shape-key weight at zero.
    pub fn new(mesh: Arc<Mesh>) -> Self {
        let weights = vec![0.0; mesh.shape_keys.len()];
        Self {
            mesh: Some(mesh),
            weights,
        }
    }

    pub fn with_weights(mesh: Arc<Mesh>, weights: Vec<f32>) -> Self {
        Self {
            mesh: Some(mesh),
            weights,
        }
    }

    /// Renderer whose mesh reference is missing.
    pub fn without_mesh() -> Self {
        Self {
            mesh: None,
            weights: Vec::new(),
        }
    }

    pub fn mesh(&self) -> Option<&Arc<Mesh>> {
        self.mesh.as_ref()
    }

    pub fn mesh_name(&self) -> &str {
        self.mesh.as_deref().map(|mesh| mesh.name.as_str()).unwrap_or_default()
    }

    pub fn shape_key_count(&self) -> usize {
        self.mesh.as_deref().map(|mesh| mesh.shape_keys.len()).unwrap_or(0)
    }

    pub fn shape_key_name(&self, index: usize) -> Option<&str> {
        self.mesh
            .as_deref()
            .and_then(|mesh| mesh.shape_keys.get(index))
            .and_then(Option::as_deref)
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weight(&self, index: usize) -> Result<f32, SceneError> {
        self.weights
            .get(index)
            .copied()
            .ok_or_else(|| self.out_of_range(index))
    }

    pub fn set_weight(&mut self, index: usize, weight: f32) -> Result<(), SceneError> {
        if index >= self.weights.len() {
            return Err(self.out_of_range(index));
        }
        self.weights[index] = weight;
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> SceneError {
        SceneError::WeightIndexOutOfRange {
            mesh: self.mesh_name().to_string(),
            index,
            count: self.weights.len(),
        }
    }
}

// ─── Nodes ────────────────────────────────────────────────────────────────────

/// A single element of the hierarchy.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Local scale.
    pub scale: Vector3<f32>,
    /// Humanoid bone role such as `"hips"`, when the source declares one.
    pub humanoid_bone: Option<String>,
    /// Free-form integration data (glTF `extras`).
    pub extras: Map<String, Value>,
    pub renderers: Vec<MeshRenderer>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            scale: Vector3::new(1.0, 1.0, 1.0),
            humanoid_bone: None,
            extras: Map::new(),
            renderers: Vec::new(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

// ─── Undo journal ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct NodeSnapshot {
    node: NodeId,
    scale: Vector3<f32>,
    weights: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct UndoEntry {
    label: String,
    snapshots: Vec<NodeSnapshot>,
}

impl UndoEntry {
    fn covers(&self, node: NodeId) -> bool {
        self.snapshots.iter().any(|snapshot| snapshot.node == node)
    }
}

// ─── Scene graph ──────────────────────────────────────────────────────────────

/// Arena-backed hierarchy. Nodes are owned by the graph and addressed by
/// [`NodeId`]; parent/child links are indices into the same arena.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    dirty: BTreeSet<NodeId>,
    /// Subset of `dirty` whose renderer weights changed.
    dirty_weights: BTreeSet<NodeId>,
    undo_stack: Vec<UndoEntry>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name.into(), None));
        id
    }

    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name.into(), Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Builder-style helper: sets the local scale and returns the node id.
    pub fn set_scale(&mut self, id: NodeId, scale: Vector3<f32>) -> NodeId {
        self.nodes[id.0].scale = scale;
        id
    }

    pub fn attach_renderer(&mut self, id: NodeId, renderer: MeshRenderer) -> usize {
        let renderers = &mut self.nodes[id.0].renderers;
        renderers.push(renderer);
        renderers.len() - 1
    }

    /// `root` and all of its descendants in depth-first, child order.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            ordered.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        ordered
    }

    /// Every `(node, renderer slot)` pair under `root`, depth-first.
    pub fn renderers_under(&self, root: NodeId) -> Vec<(NodeId, usize)> {
        self.descendants(root)
            .into_iter()
            .flat_map(|id| (0..self.node(id).renderers.len()).map(move |slot| (id, slot)))
            .collect()
    }

    pub fn is_descendant_of(&self, target: NodeId, root: NodeId) -> bool {
        let mut current = Some(target);
        while let Some(id) = current {
            if id == root {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    // ─── Dirty tracking ───────────────────────────────────────────────────────

    pub fn mark_dirty(&mut self, id: NodeId) {
        self.dirty.insert(id);
    }

    /// Mark `id` dirty and flag its renderer weights for write-back.
    pub fn mark_weights_dirty(&mut self, id: NodeId) {
        self.dirty.insert(id);
        self.dirty_weights.insert(id);
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn weights_dirty(&self, id: NodeId) -> bool {
        self.dirty_weights.contains(&id)
    }

    pub fn dirty_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dirty.iter().copied()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
        self.dirty_weights.clear();
    }

    // ─── Undo ─────────────────────────────────────────────────────────────────

    /// Snapshot `root` and its whole subtree as one undo step.
    pub fn register_hierarchy_undo(&mut self, root: NodeId, label: &str) {
        let snapshots = self
            .descendants(root)
            .into_iter()
            .map(|id| self.snapshot(id))
            .collect();
        self.undo_stack.push(UndoEntry {
            label: label.to_string(),
            snapshots,
        });
    }

    /// Snapshot a single node. Absorbed by the latest step when that step
    /// already covers the node.
    pub fn record_node_undo(&mut self, id: NodeId, label: &str) {
        if self.undo_stack.last().is_some_and(|entry| entry.covers(id)) {
            return;
        }
        let snapshot = self.snapshot(id);
        self.undo_stack.push(UndoEntry {
            label: label.to_string(),
            snapshots: vec![snapshot],
        });
    }

    /// Revert the latest undo step, returning its label.
    pub fn undo(&mut self) -> Option<String> {
        let entry = self.undo_stack.pop()?;
        for snapshot in entry.snapshots {
            let node = &mut self.nodes[snapshot.node.0];
            node.scale = snapshot.scale;
            let has_weights = !snapshot.weights.is_empty();
            for (renderer, weights) in node.renderers.iter_mut().zip(snapshot.weights) {
                renderer.weights = weights;
            }
            if has_weights {
                self.mark_weights_dirty(snapshot.node);
            } else {
                self.mark_dirty(snapshot.node);
            }
        }
        Some(entry.label)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    fn snapshot(&self, id: NodeId) -> NodeSnapshot {
        let node = &self.nodes[id.0];
        NodeSnapshot {
            node: id,
            scale: node.scale,
            weights: node
                .renderers
                .iter()
                .map(|renderer| renderer.weights.clone())
                .collect(),
        }
    }

    /// Open a scoped edit on one renderer: records undo now, marks the node
    /// dirty when the scope ends.
    pub fn edit_renderer(
        &mut self,
        id: NodeId,
        slot: usize,
        label: &str,
    ) -> Result<RendererEdit<'_>, SceneError> {
        if self.nodes[id.0].renderers.get(slot).is_none() {
            return Err(SceneError::MissingRenderer {
                node: id.0,
                slot,
            });
        }
        self.record_node_undo(id, label);
        Ok(RendererEdit {
            graph: self,
            node: id,
            slot,
        })
    }
}

/// Scoped mutable access to a renderer's weights. Dropping the guard marks the
/// owning node's weights dirty, whether or not individual writes failed.
pub struct RendererEdit<'a> {
    graph: &'a mut SceneGraph,
    node: NodeId,
    slot: usize,
}

impl RendererEdit<'_> {
    pub fn renderer(&self) -> &MeshRenderer {
        &self.graph.nodes[self.node.0].renderers[self.slot]
    }

    pub fn set_weight(&mut self, index: usize, weight: f32) -> Result<(), SceneError> {
        self.graph.nodes[self.node.0].renderers[self.slot].set_weight(index, weight)
    }
}

impl Drop for RendererEdit<'_> {
    fn drop(&mut self) {
        self.graph.mark_weights_dirty(self.node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smile_mesh() -> Arc<Mesh> {
        Arc::new(Mesh::new(
            "Face",
            vec!["Smile".to_string(), "Blink".to_string()],
        ))
    }

    #[test]
    fn given_nested_children_when_listing_descendants_then_order_is_depth_first() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("Root");
        let a = graph.add_child(root, "A");
        let a1 = graph.add_child(a, "A1");
        let b = graph.add_child(root, "B");

        assert_eq!(graph.descendants(root), vec![root, a, a1, b]);
        assert!(graph.is_descendant_of(a1, root));
        assert!(!graph.is_descendant_of(b, a));
    }

    #[test]
    fn given_hierarchy_checkpoint_when_undoing_then_scale_and_weights_are_restored() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("Costume");
        let chest = graph.add_child(root, "Chest");
        graph.attach_renderer(chest, MeshRenderer::new(smile_mesh()));

        graph.register_hierarchy_undo(root, "adjust");
        graph.node_mut(chest).scale = Vector3::new(2.0, 1.0, 1.0);
        {
            let mut edit = graph.edit_renderer(chest, 0, "sync").expect("renderer exists");
            edit.set_weight(0, 50.0).expect("index in range");
        }

        // The renderer record was absorbed by the hierarchy checkpoint.
        assert_eq!(graph.undo_depth(), 1);
        assert_eq!(graph.undo().as_deref(), Some("adjust"));
        assert_eq!(graph.node(chest).scale, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(graph.node(chest).renderers[0].weights(), &[0.0, 0.0]);
    }

    #[test]
    fn given_renderer_edit_when_write_fails_then_node_is_still_marked_dirty() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("Face");
        graph.attach_renderer(root, MeshRenderer::with_weights(smile_mesh(), vec![10.0]));

        {
            let mut edit = graph.edit_renderer(root, 0, "sync").expect("renderer exists");
            let error = edit.set_weight(1, 40.0).expect_err("index past weight array");
            assert_eq!(
                error,
                SceneError::WeightIndexOutOfRange {
                    mesh: "Face".to_string(),
                    index: 1,
                    count: 1,
                }
            );
        }

        assert!(graph.is_dirty(root));
        assert!(graph.weights_dirty(root));
        assert_eq!(graph.undo_depth(), 1);
    }

    #[test]
    fn given_scale_only_change_when_marking_dirty_then_weights_are_not_flagged() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("Chest");
        graph.attach_renderer(root, MeshRenderer::new(smile_mesh()));

        graph.mark_dirty(root);
        assert!(graph.is_dirty(root));
        assert!(!graph.weights_dirty(root));

        graph.clear_dirty();
        assert!(!graph.is_dirty(root));
    }

    #[test]
    fn given_unnamed_channels_when_listing_named_keys_then_they_are_skipped() {
        let mesh = Mesh::with_channels(
            "Skirt",
            vec![None, Some("Flare".to_string()), None],
        );
        let renderer = MeshRenderer::new(Arc::new(mesh.clone()));

        assert_eq!(mesh.named_shape_keys().collect::<Vec<_>>(), vec![(1, "Flare")]);
        assert_eq!(mesh.unnamed_count(), 2);
        assert_eq!(renderer.shape_key_count(), 3);
        assert_eq!(renderer.shape_key_name(0), None);
        assert_eq!(renderer.shape_key_name(1), Some("Flare"));
    }

    #[test]
    fn given_missing_slot_when_opening_renderer_edit_then_error_is_returned() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("Empty");

        assert!(matches!(
            graph.edit_renderer(root, 0, "sync"),
            Err(SceneError::MissingRenderer { slot: 0, .. })
        ));
        assert_eq!(graph.undo_depth(), 0);
    }
}
