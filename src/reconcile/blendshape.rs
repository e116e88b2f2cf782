use std::collections::HashMap;

use crate::{
    scene::{Mesh, MeshRenderer, NodeId, SceneGraph},
    settings::SyncSettings,
};

use super::{
    events::{SyncEvent, SyncLog},
    path::display_path,
    types::{RENDERER_PRIORITIES, ShapeKeySyncReport, UNDO_SYNC_SHAPE_KEYS},
};

// ─── Weight table ─────────────────────────────────────────────────────────────

/// Reference shape-key weights keyed by normalized name. The first weight
/// inserted for a name is kept.
#[derive(Debug, Clone, Default)]
pub struct ShapeKeyTable {
    weights: HashMap<String, f32>,
}

impl ShapeKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trimmed, case-folded lookup key.
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Insert unless the key is already present. Returns whether it was stored.
    pub fn insert_if_absent(&mut self, name: &str, weight: f32) -> bool {
        let key = Self::normalize(name);
        if self.weights.contains_key(&key) {
            return false;
        }
        self.weights.insert(key, weight);
        true
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.weights.get(&Self::normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Ordering weight of a reference renderer: `Body_base` first, then `Body`.
pub fn renderer_priority(node_name: &str, renderer: &MeshRenderer) -> i32 {
    let mesh_name = renderer.mesh_name();
    RENDERER_PRIORITIES
        .iter()
        .find(|(name, _)| {
            mesh_name.eq_ignore_ascii_case(name) || node_name.eq_ignore_ascii_case(name)
        })
        .map(|(_, priority)| *priority)
        .unwrap_or(0)
}

/// Unnamed channels never take part in name matching; report them once per mesh.
fn log_unnamed_channels(mesh: &Mesh, log: &mut SyncLog) {
    let count = mesh.unnamed_count();
    if count > 0 {
        log.add(SyncEvent::UnnamedShapeKeys {
            mesh: mesh.name.clone(),
            count,
        });
    }
}

// ─── Reference side ───────────────────────────────────────────────────────────

/// Collect every shape-key weight under `root`, visiting renderers by
/// descending priority and then mesh name.
pub fn build_reference_table(
    graph: &SceneGraph,
    root: NodeId,
    log: &mut SyncLog,
) -> ShapeKeyTable {
    let mut renderers = graph.renderers_under(root);
    renderers.sort_by(|&(a_node, a_slot), &(b_node, b_slot)| {
        let a = &graph.node(a_node).renderers[a_slot];
        let b = &graph.node(b_node).renderers[b_slot];
        renderer_priority(graph.name(b_node), b)
            .cmp(&renderer_priority(graph.name(a_node), a))
            .then_with(|| a.mesh_name().cmp(b.mesh_name()))
    });

    log.add(SyncEvent::ReferenceTableHeader {
        root: graph.name(root).to_string(),
        renderer_count: renderers.len(),
    });

    let mut table = ShapeKeyTable::new();
    for (node, slot) in renderers {
        let renderer = &graph.node(node).renderers[slot];
        let Some(mesh) = renderer.mesh() else {
            continue;
        };
        if mesh.shape_keys.is_empty() {
            continue;
        }

        log.add(SyncEvent::ReferenceRendererSummary {
            path: display_path(graph, node, root),
            mesh: mesh.name.clone(),
            shape_keys: mesh.shape_keys.len(),
        });

        log_unnamed_channels(mesh, log);

        for (index, shape_key) in mesh.named_shape_keys() {
            let Ok(weight) = renderer.weight(index) else {
                log.add(SyncEvent::ShapeKeyReadFailed {
                    mesh: mesh.name.clone(),
                    index,
                });
                continue;
            };
            if !table.insert_if_absent(shape_key, weight) {
                log.add(SyncEvent::DuplicateShapeKey {
                    mesh: mesh.name.clone(),
                    shape_key: shape_key.to_string(),
                });
            }
        }
    }

    table
}

// ─── Target side ──────────────────────────────────────────────────────────────

/// Copy reference weights onto every renderer under `root` whose shape keys
/// appear in `table`.
pub fn sync_target(
    graph: &mut SceneGraph,
    root: NodeId,
    table: &ShapeKeyTable,
    settings: &SyncSettings,
    log: &mut SyncLog,
) -> ShapeKeySyncReport {
    let renderers = graph.renderers_under(root);
    let mut report = ShapeKeySyncReport {
        renderer_count: renderers.len(),
        ..ShapeKeySyncReport::default()
    };

    log.add(SyncEvent::CostumeShapeKeyHeader {
        costume: graph.name(root).to_string(),
        renderer_count: renderers.len(),
    });

    for (node, slot) in renderers {
        let path = display_path(graph, node, root);
        let renderer = &graph.node(node).renderers[slot];
        let Some(mesh) = renderer.mesh().cloned() else {
            log.add(SyncEvent::RendererMeshMissing { path });
            continue;
        };

        log.add(SyncEvent::RendererSummary {
            path,
            mesh: mesh.name.clone(),
            shape_keys: mesh.shape_keys.len(),
        });
        if mesh.shape_keys.is_empty() {
            continue;
        }

        log.add_entries_with_limit(
            mesh.named_shape_keys().map(|(_, name)| SyncEvent::ShapeKeyEntry {
                name: name.to_string(),
            }),
            settings.max_logged_shape_keys,
        );
        log_unnamed_channels(&mesh, log);

        let updates: Vec<(usize, &str, f32)> = mesh
            .named_shape_keys()
            .filter_map(|(index, name)| table.get(name).map(|weight| (index, name, weight)))
            .collect();
        if updates.is_empty() {
            continue;
        }

        let Ok(mut edit) = graph.edit_renderer(node, slot, UNDO_SYNC_SHAPE_KEYS) else {
            continue;
        };
        let mut synced = Vec::new();
        for (index, name, weight) in updates {
            match edit.set_weight(index, weight) {
                Ok(()) => synced.push(name.to_string()),
                Err(_) => {
                    report.failed_keys += 1;
                    log.add(SyncEvent::ShapeKeyWriteFailed {
                        mesh: mesh.name.clone(),
                        index,
                    });
                }
            }
        }
        drop(edit);

        if !synced.is_empty() {
            report.synced_renderers += 1;
            report.synced_keys += synced.len();
            log.add(SyncEvent::ShapeKeysSynced { names: synced });
        }
    }

    report
}
