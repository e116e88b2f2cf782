use crate::scene::{NodeId, SceneGraph};

use super::types::{ARMATURE_NAME, HIPS_BONE};

/// `extras` keys that mark a node as the root of an attached costume.
const COSTUME_MARKER_KEYS: [&str; 2] = ["mesh_settings", "merge_armature"];

/// Locate the main skeleton under `avatar_root`.
///
/// Prefers the humanoid hips bone (its topmost ancestor directly below the
/// root), then a direct child named `Armature`, then the first node named
/// `Armature` anywhere in the subtree.
pub fn find_main_armature(graph: &SceneGraph, avatar_root: NodeId) -> Option<NodeId> {
    let hips = graph
        .descendants(avatar_root)
        .into_iter()
        .find(|id| graph.node(*id).humanoid_bone.as_deref() == Some(HIPS_BONE));

    if let Some(armature) = hips.and_then(|hips| topmost_child_under_root(graph, hips, avatar_root))
    {
        return Some(armature);
    }

    graph
        .children(avatar_root)
        .iter()
        .copied()
        .find(|child| graph.name(*child) == ARMATURE_NAME)
        .or_else(|| find_by_name_recursive(graph, avatar_root, ARMATURE_NAME))
}

/// First node named `name` in depth-first order, `root` included.
pub fn find_by_name_recursive(graph: &SceneGraph, root: NodeId, name: &str) -> Option<NodeId> {
    graph
        .descendants(root)
        .into_iter()
        .find(|id| graph.name(*id) == name)
}

/// Ancestor of `target` (or `target` itself) whose parent is `root`.
fn topmost_child_under_root(graph: &SceneGraph, target: NodeId, root: NodeId) -> Option<NodeId> {
    if target == root {
        return None;
    }

    let mut current = target;
    loop {
        let parent = graph.parent(current)?;
        if parent == root {
            return Some(current);
        }
        current = parent;
    }
}

/// Nodes below `root` carrying a costume marker in their `extras`.
///
/// Markers nested inside an already collected costume are folded into the
/// outer costume.
pub fn collect_costume_roots(graph: &SceneGraph, root: NodeId) -> Vec<NodeId> {
    let mut roots: Vec<NodeId> = Vec::new();

    for id in graph.descendants(root) {
        if id == root {
            continue;
        }
        let node = graph.node(id);
        if !COSTUME_MARKER_KEYS
            .iter()
            .any(|key| node.extras.contains_key(*key))
        {
            continue;
        }
        if roots
            .iter()
            .any(|outer| graph.is_descendant_of(id, *outer))
        {
            continue;
        }
        roots.push(id);
    }

    roots
}
