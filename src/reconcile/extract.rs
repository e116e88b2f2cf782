use std::collections::HashSet;

use crate::{
    scene::{NodeId, SceneGraph},
    settings::SyncSettings,
};

use super::{
    armature::find_main_armature,
    events::{SyncEvent, SyncLog},
    path::{display_path, relative_path, stable_path},
    types::{AllowedPathSet, CorrectionRecord, is_nearly_one},
};

/// Stable paths of every node in the main armature of `reference_root`.
///
/// Returns `None` when the tree has no discoverable armature, which disables
/// path filtering.
pub fn build_allowed_paths(
    graph: &SceneGraph,
    reference_root: NodeId,
    log: &mut SyncLog,
) -> Option<AllowedPathSet> {
    let Some(armature) = find_main_armature(graph, reference_root) else {
        log.add(SyncEvent::ReferenceArmatureMissing {
            tree: graph.name(reference_root).to_string(),
        });
        return None;
    };

    let paths: AllowedPathSet = graph
        .descendants(armature)
        .into_iter()
        .map(|id| stable_path(graph, id, armature))
        .collect();

    log.add(SyncEvent::AllowedPathCount { count: paths.len() });
    Some(paths)
}

/// Result of walking the reference armature.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<CorrectionRecord>,
    /// Display paths of scaled nodes rejected by the allowed-path filter.
    pub excluded: Vec<String>,
}

/// Collect one correction record per distinct name among the scaled nodes of
/// `armature`, in depth-first order.
pub fn extract_corrections(
    graph: &SceneGraph,
    armature: NodeId,
    allowed: Option<&AllowedPathSet>,
    settings: &SyncSettings,
    log: &mut SyncLog,
) -> Extraction {
    let armature_name = graph.name(armature);
    let mut extraction = Extraction::default();
    let mut seen_names = HashSet::new();

    for id in graph.descendants(armature) {
        let node = graph.node(id);
        if is_nearly_one(&node.scale, settings.scale_epsilon) {
            continue;
        }

        // Accessories often bring their own nested "Armature".
        if id != armature && node.name == armature_name {
            continue;
        }

        if let Some(allowed) = allowed
            && !allowed.contains(&stable_path(graph, id, armature))
        {
            extraction.excluded.push(display_path(graph, id, armature));
            continue;
        }

        if seen_names.insert(node.name.as_str()) {
            extraction.records.push(CorrectionRecord {
                name: node.name.clone(),
                relative_path: relative_path(graph, id, armature),
                scale: node.scale,
                source: id,
            });
        }
    }

    if allowed.is_some() {
        log.add(SyncEvent::ExcludedPathCount {
            count: extraction.excluded.len(),
        });
        if !extraction.excluded.is_empty() {
            log.add(SyncEvent::ExcludedPathHeader);
            log.add_entries_with_limit(
                extraction
                    .excluded
                    .iter()
                    .map(|path| SyncEvent::PathEntry { path: path.clone() }),
                settings.max_logged_excluded_paths,
            );
        }
    }

    extraction
}
