use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::{
    error::SyncError,
    logging::ResultExt,
    reconcile::{
        ReconcileReport, Reconciler, SyncLog, armature::find_by_name_recursive,
        collect_costume_roots,
    },
    scene::{
        NodeId, SceneGraph,
        gltf_io::{LoadedScene, load_scene},
    },
    settings::SyncSettings,
};

/// Inputs of a file-to-file sync besides the three scene paths.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Tree whose armature defines the legitimate skeleton paths.
    pub authored_path: Option<PathBuf>,
    /// Costume node names to process; empty means auto-detect.
    pub costume_names: Vec<String>,
    pub settings: SyncSettings,
}

/// Result of [`sync_costume_files`].
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub report: ReconcileReport,
    pub log: SyncLog,
    /// Costume root names in processing order.
    pub costumes: Vec<String>,
    /// glTF nodes rewritten in the output document.
    pub written_nodes: usize,
}

/// Resolve costume roots by name, or detect them from integration markers.
pub fn select_costumes(
    graph: &SceneGraph,
    root: NodeId,
    names: &[String],
) -> Result<Vec<NodeId>, SyncError> {
    if names.is_empty() {
        return Ok(collect_costume_roots(graph, root));
    }

    names
        .iter()
        .map(|name| {
            find_by_name_recursive(graph, root, name)
                .filter(|id| *id != root)
                .ok_or_else(|| SyncError::MissingNode(name.clone()))
        })
        .collect()
}

fn load(path: &Path) -> Result<LoadedScene, SyncError> {
    load_scene(path)
        .map_err(|error| SyncError::SceneLoad(format!("{}: {:#}", path.display(), error)))
        .log_error(Some("load scene"))
}

/// Load the reference and target documents, reconcile every costume of the
/// target against the reference and write the result to `output_path`.
pub fn sync_costume_files(
    reference_path: &Path,
    target_path: &Path,
    output_path: &Path,
    options: &SyncOptions,
) -> Result<SyncRun> {
    let reference = load(reference_path)?;
    let authored = options.authored_path.as_deref().map(load).transpose()?;
    let mut target = load(target_path)?;

    let costume_roots = select_costumes(&target.graph, target.root, &options.costume_names)
        .log_error(Some("select costumes"))?;
    if costume_roots.is_empty() {
        crate::log_warn!("No costume found in {}", target_path.display());
    }
    let costumes = costume_roots
        .iter()
        .map(|id| target.graph.name(*id).to_string())
        .collect();

    let mut reconciler = Reconciler::new(&reference.graph, reference.root)
        .with_settings(options.settings.clone());
    if let Some(authored) = authored.as_ref() {
        reconciler = reconciler.with_authored(&authored.graph, authored.root);
    }

    let mut log = SyncLog::new();
    let report = reconciler.reconcile(&mut target.graph, &costume_roots, &mut log);
    crate::log_info!(
        "Reconciled {} costume(s): {} correction(s) applied ({:?})",
        report.costumes.len(),
        report.total_applied(),
        report.outcome
    );

    let written_nodes = target.graph.dirty_nodes().count();
    target.write(output_path)?;

    Ok(SyncRun {
        report,
        log,
        costumes,
        written_nodes,
    })
}
