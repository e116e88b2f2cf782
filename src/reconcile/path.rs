use crate::scene::{NodeId, SceneGraph};

/// Sibling-disambiguated structural path from `root` (inclusive) to `node`.
///
/// A segment is suffixed with `#k` when its name is shared with other
/// siblings, `k` being the zero-based ordinal among those same-named siblings.
/// Reaching a parentless node before `root` treats that node as the root.
pub fn stable_path(graph: &SceneGraph, node: NodeId, root: NodeId) -> String {
    let mut segments = Vec::new();
    let mut current = node;

    loop {
        let name = graph.name(current);
        if current == root {
            segments.push(name.to_string());
            break;
        }

        let Some(parent) = graph.parent(current) else {
            segments.push(name.to_string());
            break;
        };

        let mut ordinal = 0;
        let mut same_name_count = 0;
        for &sibling in graph.children(parent) {
            if graph.name(sibling) != name {
                continue;
            }
            if sibling == current {
                ordinal = same_name_count;
            }
            same_name_count += 1;
        }

        if same_name_count > 1 {
            segments.push(format!("{}#{}", name, ordinal));
        } else {
            segments.push(name.to_string());
        }
        current = parent;
    }

    segments.reverse();
    segments.join("/")
}

/// Slash-joined names strictly below `root`; empty when `node == root`.
pub fn relative_path(graph: &SceneGraph, node: NodeId, root: NodeId) -> String {
    let mut segments = Vec::new();
    let mut current = node;

    while current != root {
        segments.push(graph.name(current));
        match graph.parent(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }

    segments.reverse();
    segments.join("/")
}

/// Human-readable path: root name followed by the relative path.
pub fn display_path(graph: &SceneGraph, node: NodeId, root: NodeId) -> String {
    let relative = relative_path(graph, node, root);
    if relative.is_empty() {
        graph.name(root).to_string()
    } else {
        format!("{}/{}", graph.name(root), relative)
    }
}

/// Resolve a relative path below `root`, following the first child with each
/// segment's name. An empty path resolves to `root`.
pub fn find_by_path(graph: &SceneGraph, root: NodeId, relative: &str) -> Option<NodeId> {
    if relative.is_empty() {
        return Some(root);
    }

    relative.split('/').try_fold(root, |current, segment| {
        graph
            .children(current)
            .iter()
            .copied()
            .find(|child| graph.name(*child) == segment)
    })
}

/// Adapt a path computed against one armature so it can be resolved below an
/// armature named `armature_name`: a leading `<armature_name>/` is stripped
/// and a path equal to the armature name becomes empty.
pub fn normalize_relative_path_for<'a>(armature_name: &str, relative: &'a str) -> &'a str {
    if relative.is_empty() || relative == armature_name {
        return "";
    }

    relative
        .strip_prefix(armature_name)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(relative)
}
