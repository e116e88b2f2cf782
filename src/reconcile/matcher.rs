use crate::{
    scene::{NodeId, SceneGraph},
    settings::SyncSettings,
};

use super::{
    apply::apply_scale,
    armature::find_main_armature,
    events::{SyncEvent, SyncLog},
    mapping::MergeMapping,
    path::{display_path, find_by_path, normalize_relative_path_for},
    types::{AppliedCorrection, CorrectionRecord, CostumeReport, MatchStrategy},
};

// ─── Working set ──────────────────────────────────────────────────────────────

/// Candidate nodes of one target tree in depth-first order. A claimed node has
/// already received a correction and is invisible to later lookups.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    nodes: Vec<NodeId>,
    claimed: Vec<bool>,
}

impl WorkingSet {
    pub fn new(graph: &SceneGraph, root: NodeId) -> Self {
        let nodes = graph.descendants(root);
        let claimed = vec![false; nodes.len()];
        Self { nodes, claimed }
    }

    /// First unclaimed node accepted by `predicate`.
    pub fn find_unclaimed(&self, mut predicate: impl FnMut(NodeId) -> bool) -> Option<NodeId> {
        self.nodes
            .iter()
            .zip(&self.claimed)
            .find(|(id, claimed)| !**claimed && predicate(**id))
            .map(|(id, _)| *id)
    }

    /// `node` itself when it belongs to the set and is still unclaimed.
    pub fn unclaimed(&self, node: NodeId) -> Option<NodeId> {
        self.find_unclaimed(|id| id == node)
    }

    pub fn claim(&mut self, node: NodeId) {
        if let Some(index) = self.nodes.iter().position(|id| *id == node) {
            self.claimed[index] = true;
        }
    }

    pub fn is_claimed(&self, node: NodeId) -> bool {
        self.nodes
            .iter()
            .position(|id| *id == node)
            .is_some_and(|index| self.claimed[index])
    }

    pub fn remaining(&self) -> usize {
        self.claimed.iter().filter(|claimed| !**claimed).count()
    }
}

// ─── Strategy chain ───────────────────────────────────────────────────────────

/// Per-target context shared by every strategy.
struct MatchContext<'a> {
    graph: &'a SceneGraph,
    armature: Option<NodeId>,
    mapping: &'a MergeMapping,
    settings: &'a SyncSettings,
}

impl MatchContext<'_> {
    fn find(
        &self,
        record: &CorrectionRecord,
        working: &WorkingSet,
    ) -> Option<(NodeId, MatchStrategy)> {
        self.exact(record, working)
            .map(|id| (id, MatchStrategy::Exact))
            .or_else(|| {
                self.explicit_mapping(record, working)
                    .map(|id| (id, MatchStrategy::ExplicitMapping))
            })
            .or_else(|| {
                self.armature_path(record, working)
                    .map(|id| (id, MatchStrategy::ArmaturePath))
            })
            .or_else(|| {
                self.substring(record, working)
                    .map(|id| (id, MatchStrategy::Substring))
            })
    }

    fn exact(&self, record: &CorrectionRecord, working: &WorkingSet) -> Option<NodeId> {
        working.find_unclaimed(|id| self.graph.name(id) == record.name)
    }

    fn explicit_mapping(&self, record: &CorrectionRecord, working: &WorkingSet) -> Option<NodeId> {
        let counterpart = self.mapping.counterpart(record.source)?;
        working.unclaimed(counterpart)
    }

    fn armature_path(&self, record: &CorrectionRecord, working: &WorkingSet) -> Option<NodeId> {
        if record.relative_path.is_empty() {
            return None;
        }
        let armature = self.armature?;
        let normalized =
            normalize_relative_path_for(self.graph.name(armature), &record.relative_path);
        let candidate = find_by_path(self.graph, armature, normalized)?;
        working.unclaimed(candidate)
    }

    /// Legacy partial-name match. Never used for the armature record itself.
    fn substring(&self, record: &CorrectionRecord, working: &WorkingSet) -> Option<NodeId> {
        if !self.settings.substring_fallback || record.relative_path.is_empty() {
            return None;
        }
        if self
            .armature
            .is_some_and(|armature| self.graph.name(armature) == record.name)
        {
            return None;
        }
        working.find_unclaimed(|id| self.graph.name(id).contains(record.name.as_str()))
    }
}

/// Offer every record to the target tree under `costume_root`, applying each
/// at most once and to at most one node.
pub fn apply_corrections(
    graph: &mut SceneGraph,
    costume_root: NodeId,
    records: &[CorrectionRecord],
    mapping: &MergeMapping,
    settings: &SyncSettings,
    report: &mut CostumeReport,
    log: &mut SyncLog,
) {
    let mut working = WorkingSet::new(graph, costume_root);
    let armature = find_main_armature(graph, costume_root);
    let costume = graph.name(costume_root).to_string();

    for record in records {
        let found = MatchContext {
            graph: &*graph,
            armature,
            mapping,
            settings,
        }
        .find(record, &working);

        let record_key = record.log_key();
        let Some((node, strategy)) = found else {
            log.add(SyncEvent::Unmatched {
                costume: costume.clone(),
                record: record_key.clone(),
            });
            report.unmatched.push(record_key);
            continue;
        };

        apply_scale(graph, node, &record.scale, &mut report.applied_count);
        working.claim(node);

        let matched_path = format!(
            "{} ({})",
            graph.name(node),
            display_path(graph, node, costume_root)
        );
        log.add(SyncEvent::ScaleApplied {
            costume: costume.clone(),
            record: record_key.clone(),
            strategy,
            matched: matched_path.clone(),
        });
        report.applied.push(AppliedCorrection {
            record: record_key,
            strategy,
            matched_path,
        });
    }

    log.add(SyncEvent::CostumeApplied {
        costume,
        applied: report.applied_count,
    });
}
