//! Propagates scale corrections and shape-key weights from a reference avatar
//! onto the costume trees attached to it.

pub mod apply;
pub mod armature;
pub mod blendshape;
pub mod events;
pub mod extract;
pub mod mapping;
pub mod matcher;
pub mod path;
pub mod types;

pub use armature::{collect_costume_roots, find_main_armature};
pub use blendshape::ShapeKeyTable;
pub use events::{SyncEvent, SyncLog};
pub use mapping::{BoneMappingProvider, MergeArmatureProvider, MergeMapping, RawBonePair};
pub use types::{
    AllowedPathSet, CorrectionRecord, CostumeReport, MatchStrategy, ReconcileOutcome,
    ReconcileReport, ShapeKeySyncReport,
};

use crate::{
    scene::{NodeId, SceneGraph},
    settings::SyncSettings,
};

use types::UNDO_ADJUST_COSTUME;

/// Everything read from the reference side, computed once per pass.
#[derive(Debug, Clone)]
pub struct ReferenceDelta {
    pub armature: Option<NodeId>,
    pub allowed_paths: Option<AllowedPathSet>,
    pub records: Vec<CorrectionRecord>,
    pub excluded: Vec<String>,
    pub shape_keys: ShapeKeyTable,
}

impl ReferenceDelta {
    pub fn outcome(&self) -> ReconcileOutcome {
        if self.armature.is_none() {
            ReconcileOutcome::MissingSkeleton
        } else if self.records.is_empty() {
            ReconcileOutcome::NoCorrections
        } else {
            ReconcileOutcome::Applied
        }
    }
}

/// Reconciliation driver bound to one reference tree.
pub struct Reconciler<'a> {
    reference: &'a SceneGraph,
    reference_root: NodeId,
    /// Tree whose armature defines the allowed paths; the reference by default.
    authored: Option<(&'a SceneGraph, NodeId)>,
    provider: Option<&'a dyn BoneMappingProvider>,
    settings: SyncSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(reference: &'a SceneGraph, reference_root: NodeId) -> Self {
        Self {
            reference,
            reference_root,
            authored: None,
            provider: None,
            settings: SyncSettings::default(),
        }
    }

    /// Filter corrections against the skeleton of a separately authored tree.
    pub fn with_authored(mut self, graph: &'a SceneGraph, root: NodeId) -> Self {
        self.authored = Some((graph, root));
        self
    }

    /// Use `provider` instead of the built-in merge-armature reader.
    pub fn with_provider(mut self, provider: &'a dyn BoneMappingProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Read the reference side: armature, allowed paths, corrections and the
    /// shape-key table.
    pub fn prepare(&self, log: &mut SyncLog) -> ReferenceDelta {
        let armature = find_main_armature(self.reference, self.reference_root);

        let mut delta = ReferenceDelta {
            armature,
            allowed_paths: None,
            records: Vec::new(),
            excluded: Vec::new(),
            shape_keys: ShapeKeyTable::new(),
        };

        match armature {
            None => log.add(SyncEvent::ReferenceArmatureMissing {
                tree: self.reference.name(self.reference_root).to_string(),
            }),
            Some(armature) => {
                let (authored, authored_root) =
                    self.authored.unwrap_or((self.reference, self.reference_root));
                delta.allowed_paths = extract::build_allowed_paths(authored, authored_root, log);
                log.add(SyncEvent::ScaleCriteria {
                    epsilon: self.settings.scale_epsilon,
                });

                let extraction = extract::extract_corrections(
                    self.reference,
                    armature,
                    delta.allowed_paths.as_ref(),
                    &self.settings,
                    log,
                );
                delta.records = extraction.records;
                delta.excluded = extraction.excluded;

                if delta.records.is_empty() {
                    log.add(SyncEvent::NoCorrections {
                        armature: self.reference.name(armature).to_string(),
                    });
                } else {
                    log.add(SyncEvent::CorrectionCount {
                        count: delta.records.len(),
                    });
                }
            }
        }

        if self.settings.sync_shape_keys {
            delta.shape_keys =
                blendshape::build_reference_table(self.reference, self.reference_root, log);
        }

        delta
    }

    /// Apply `delta` to one costume. The whole costume subtree is checkpointed
    /// for undo before anything changes.
    pub fn reconcile_costume(
        &self,
        target: &mut SceneGraph,
        costume_root: NodeId,
        delta: &ReferenceDelta,
        log: &mut SyncLog,
    ) -> CostumeReport {
        let mut report = CostumeReport::new(target.name(costume_root));
        target.register_hierarchy_undo(costume_root, UNDO_ADJUST_COSTUME);

        if delta.outcome() == ReconcileOutcome::Applied {
            let fallback = MergeArmatureProvider::new(self.reference, self.reference_root);
            let provider: Option<&dyn BoneMappingProvider> = match self.provider {
                Some(provider) => Some(provider),
                None if self.settings.use_merge_armature => Some(&fallback),
                None => None,
            };
            let mapping = mapping::resolve_mapping(
                provider,
                self.reference,
                target,
                costume_root,
                self.settings.scale_epsilon,
                log,
            );
            report.mapping_pairs = mapping.len();

            matcher::apply_corrections(
                target,
                costume_root,
                &delta.records,
                &mapping,
                &self.settings,
                &mut report,
                log,
            );
        }

        if self.settings.sync_shape_keys {
            report.shape_keys = Some(blendshape::sync_target(
                target,
                costume_root,
                &delta.shape_keys,
                &self.settings,
                log,
            ));
        }

        report
    }

    /// Run the full pass over every costume root of `target`.
    pub fn reconcile(
        &self,
        target: &mut SceneGraph,
        costume_roots: &[NodeId],
        log: &mut SyncLog,
    ) -> ReconcileReport {
        let delta = self.prepare(log);

        let mut report = ReconcileReport {
            outcome: delta.outcome(),
            reference_armature: delta
                .armature
                .map(|armature| self.reference.name(armature).to_string()),
            allowed_path_count: delta.allowed_paths.as_ref().map(|paths| paths.len()),
            correction_count: delta.records.len(),
            excluded_count: delta.excluded.len(),
            shape_key_count: delta.shape_keys.len(),
            costumes: Vec::new(),
        };

        if costume_roots.is_empty() {
            report.outcome = ReconcileOutcome::NoTargets;
            return report;
        }

        if report.outcome == ReconcileOutcome::Applied {
            log.add(SyncEvent::CostumeScaleHeader {
                costume_count: costume_roots.len(),
            });
        }

        for &costume_root in costume_roots {
            let costume = self.reconcile_costume(target, costume_root, &delta, log);
            report.costumes.push(costume);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nalgebra::Vector3;

    use super::*;
    use crate::scene::{Mesh, MeshRenderer};

    /// Reference avatar with `Avatar/Armature/Hips/Spine/Chest`.
    fn reference_avatar() -> (SceneGraph, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let avatar = graph.add_root("Avatar");
        let armature = graph.add_child(avatar, "Armature");
        let hips = graph.add_child(armature, "Hips");
        let spine = graph.add_child(hips, "Spine");
        let chest = graph.add_child(spine, "Chest");
        (graph, avatar, chest)
    }

    fn costume_with_chest() -> (SceneGraph, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let outfit = graph.add_root("Outfit");
        let armature = graph.add_child(outfit, "Armature");
        let hips = graph.add_child(armature, "Hips");
        let spine = graph.add_child(hips, "Spine");
        let chest = graph.add_child(spine, "Chest");
        (graph, outfit, chest)
    }

    #[test]
    fn given_scaled_chest_when_reconciling_then_costume_chest_is_multiplied() {
        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.0, 1.0));
        let (mut target, outfit, costume_chest) = costume_with_chest();
        target.set_scale(costume_chest, Vector3::new(1.0, 2.0, 1.0));
        let mut log = SyncLog::new();

        let report =
            Reconciler::new(&reference, avatar).reconcile(&mut target, &[outfit], &mut log);

        assert_eq!(report.outcome, ReconcileOutcome::Applied);
        assert_eq!(report.total_applied(), 1);
        assert_eq!(target.node(costume_chest).scale, Vector3::new(1.2, 2.0, 1.0));
        assert!(target.is_dirty(costume_chest));
        assert!(log.render().iter().any(|line| line.contains("Chest (Hips/Spine/Chest)")));
    }

    #[test]
    fn given_duplicate_finger_siblings_when_reconciling_then_exact_match_consumes_both() {
        let mut reference = SceneGraph::new();
        let avatar = reference.add_root("Avatar");
        let armature = reference.add_child(avatar, "Armature");
        let hand = reference.add_child(armature, "Hand");
        let first = reference.add_child(hand, "Finger");
        reference.set_scale(first, Vector3::new(1.5, 1.5, 1.5));
        let second = reference.add_child(hand, "Finger");
        reference.set_scale(second, Vector3::new(0.5, 0.5, 0.5));

        let mut target = SceneGraph::new();
        let outfit = target.add_root("Outfit");
        let outfit_armature = target.add_child(outfit, "Armature");
        let outfit_hand = target.add_child(outfit_armature, "Hand");
        let outfit_first = target.add_child(outfit_hand, "Finger");
        let outfit_second = target.add_child(outfit_hand, "Finger");

        // Extraction keeps one record per name, so the second Finger record is
        // built by hand to drive the matcher's claimed-node path.
        let mut log = SyncLog::new();
        let reconciler = Reconciler::new(&reference, avatar);
        let delta = reconciler.prepare(&mut log);
        assert_eq!(delta.records.len(), 1);
        let duplicate = CorrectionRecord {
            source: second,
            scale: reference.node(second).scale,
            ..delta.records[0].clone()
        };
        let delta = ReferenceDelta {
            records: vec![delta.records[0].clone(), duplicate],
            ..delta
        };

        let report = reconciler.reconcile_costume(&mut target, outfit, &delta, &mut log);

        assert_eq!(report.applied_count, 2);
        assert!(
            report
                .applied
                .iter()
                .all(|applied| applied.strategy == MatchStrategy::Exact)
        );
        assert_eq!(target.node(outfit_first).scale, Vector3::new(1.5, 1.5, 1.5));
        assert_eq!(target.node(outfit_second).scale, Vector3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn given_reference_weights_when_reconciling_then_matching_shape_keys_are_synced() {
        let (mut reference, avatar, _) = reference_avatar();
        let body = reference.add_child(avatar, "Body");
        reference.attach_renderer(
            body,
            MeshRenderer::with_weights(
                Arc::new(Mesh::new("Body", vec!["smile".to_string()])),
                vec![40.0],
            ),
        );

        let (mut target, outfit, _) = costume_with_chest();
        let top = target.add_child(outfit, "Top");
        target.attach_renderer(
            top,
            MeshRenderer::with_weights(
                Arc::new(Mesh::new(
                    "Top",
                    vec!["Smile".to_string(), "Blink".to_string()],
                )),
                vec![0.0, 15.0],
            ),
        );

        let report = Reconciler::new(&reference, avatar).reconcile(
            &mut target,
            &[outfit],
            &mut SyncLog::new(),
        );

        // Identity scales everywhere: nothing to propagate, shape keys still sync.
        assert_eq!(report.outcome, ReconcileOutcome::NoCorrections);
        assert_eq!(target.node(top).renderers[0].weights(), &[40.0, 15.0]);
        let shape_keys = report.costumes[0].shape_keys.as_ref().expect("sync enabled");
        assert_eq!(shape_keys.synced_keys, 1);
    }

    #[test]
    fn given_reconciled_costume_when_undoing_then_one_step_restores_everything() {
        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.2, 1.2));
        let body = reference.add_child(avatar, "Body");
        reference.attach_renderer(
            body,
            MeshRenderer::with_weights(
                Arc::new(Mesh::new("Body", vec!["Smile".to_string()])),
                vec![40.0],
            ),
        );
        let (mut target, outfit, costume_chest) = costume_with_chest();
        target.attach_renderer(
            costume_chest,
            MeshRenderer::new(Arc::new(Mesh::new("Top", vec!["Smile".to_string()]))),
        );

        Reconciler::new(&reference, avatar).reconcile(
            &mut target,
            &[outfit],
            &mut SyncLog::new(),
        );
        assert_eq!(target.undo_depth(), 1);

        target.undo();
        assert_eq!(target.node(costume_chest).scale, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(target.node(costume_chest).renderers[0].weights(), &[0.0]);
    }

    #[test]
    fn given_reference_without_skeleton_when_reconciling_then_scales_are_left_alone() {
        let mut reference = SceneGraph::new();
        let avatar = reference.add_root("Avatar");
        let prop = reference.add_child(avatar, "Chest");
        reference.set_scale(prop, Vector3::new(2.0, 2.0, 2.0));
        let (mut target, outfit, costume_chest) = costume_with_chest();

        let report = Reconciler::new(&reference, avatar).reconcile(
            &mut target,
            &[outfit],
            &mut SyncLog::new(),
        );

        assert_eq!(report.outcome, ReconcileOutcome::MissingSkeleton);
        assert_eq!(target.node(costume_chest).scale, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn given_no_costume_roots_when_reconciling_then_outcome_reports_no_targets() {
        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.2, 1.2));
        let (mut target, _, _) = costume_with_chest();

        let report =
            Reconciler::new(&reference, avatar).reconcile(&mut target, &[], &mut SyncLog::new());

        assert_eq!(report.outcome, ReconcileOutcome::NoTargets);
        assert_eq!(report.correction_count, 1);
        assert_eq!(target.undo_depth(), 0);
    }

    #[test]
    fn given_two_costumes_when_reconciling_then_each_receives_the_correction_once() {
        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.2, 1.2));

        let mut target = SceneGraph::new();
        let root = target.add_root("Avatar");
        let shirt = target.add_child(root, "Shirt");
        let shirt_chest = target.add_child(shirt, "Chest");
        let coat = target.add_child(root, "Coat");
        let coat_chest = target.add_child(coat, "Chest");

        let report = Reconciler::new(&reference, avatar).reconcile(
            &mut target,
            &[shirt, coat],
            &mut SyncLog::new(),
        );

        assert_eq!(report.total_applied(), 2);
        assert_eq!(target.node(shirt_chest).scale, Vector3::new(1.2, 1.2, 1.2));
        assert_eq!(target.node(coat_chest).scale, Vector3::new(1.2, 1.2, 1.2));
    }

    #[test]
    fn given_authored_tree_when_reconciling_then_attachment_bones_are_not_propagated() {
        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.2, 1.2));
        let ribbon = reference.add_child(chest, "Ribbon");
        reference.set_scale(ribbon, Vector3::new(3.0, 3.0, 3.0));
        let (authored, authored_root, _) = reference_avatar();

        let (mut target, outfit, costume_chest) = costume_with_chest();
        let costume_ribbon = target.add_child(costume_chest, "Ribbon");

        let report = Reconciler::new(&reference, avatar)
            .with_authored(&authored, authored_root)
            .reconcile(&mut target, &[outfit], &mut SyncLog::new());

        assert_eq!(report.excluded_count, 1);
        assert_eq!(report.allowed_path_count, Some(4));
        assert_eq!(target.node(costume_ribbon).scale, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(target.node(costume_chest).scale, Vector3::new(1.2, 1.2, 1.2));
    }

    #[test]
    fn given_custom_provider_when_reconciling_then_mapped_bone_receives_correction() {
        struct RenamedChest(NodeId, NodeId);

        impl BoneMappingProvider for RenamedChest {
            fn try_get_bone_mapping(&self, _: &SceneGraph, _: NodeId) -> Option<Vec<RawBonePair>> {
                Some(vec![RawBonePair {
                    reference: Some(self.0),
                    target: Some(self.1),
                }])
            }
        }

        let (mut reference, avatar, chest) = reference_avatar();
        reference.set_scale(chest, Vector3::new(1.2, 1.2, 1.2));
        let mut target = SceneGraph::new();
        let outfit = target.add_root("Outfit");
        let mune = target.add_child(outfit, "Mune");
        let provider = RenamedChest(chest, mune);

        let settings = SyncSettings {
            substring_fallback: false,
            ..SyncSettings::default()
        };
        let report = Reconciler::new(&reference, avatar)
            .with_provider(&provider)
            .with_settings(settings)
            .reconcile(&mut target, &[outfit], &mut SyncLog::new());

        assert_eq!(report.costumes[0].mapping_pairs, 1);
        assert_eq!(
            report.costumes[0].applied[0].strategy,
            MatchStrategy::ExplicitMapping
        );
        assert_eq!(target.node(mune).scale, Vector3::new(1.2, 1.2, 1.2));
    }
}
