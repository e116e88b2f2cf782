use std::{
    collections::HashSet,
    sync::{Mutex, OnceLock, PoisonError},
};

use serde::Deserialize;

use crate::scene::{NodeId, SceneGraph};

use super::{
    events::{SyncEvent, SyncLog},
    path::find_by_path,
    types::is_nearly_one,
};

/// `extras` key holding a merge-armature declaration.
pub const MERGE_ARMATURE_KEY: &str = "merge_armature";

// ─── Provider capability ──────────────────────────────────────────────────────

/// One correspondence as reported by an integration. Either half may be
/// missing when the integration could not resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBonePair {
    /// Node in the reference tree.
    pub reference: Option<NodeId>,
    /// Node in the target tree.
    pub target: Option<NodeId>,
}

/// External source of reference-to-target bone correspondences.
pub trait BoneMappingProvider {
    /// `None` when the integration has nothing to offer for this target.
    fn try_get_bone_mapping(
        &self,
        target: &SceneGraph,
        target_root: NodeId,
    ) -> Option<Vec<RawBonePair>>;
}

// ─── Resolved mapping ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonePair {
    pub reference: NodeId,
    pub target: NodeId,
}

/// Usable pairs in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeMapping {
    pub pairs: Vec<BonePair>,
    pub discarded: usize,
}

impl MergeMapping {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Target node paired with `reference`, first pair wins.
    pub fn counterpart(&self, reference: NodeId) -> Option<NodeId> {
        self.pairs
            .iter()
            .find(|pair| pair.reference == reference)
            .map(|pair| pair.target)
    }
}

/// Ask `provider` for the bone mapping of one target tree and keep the pairs
/// that can carry a correction.
///
/// Pairs with a missing half, or whose reference bone has an identity scale,
/// are discarded. No provider, or a provider with nothing to offer, yields an
/// empty mapping.
pub fn resolve_mapping(
    provider: Option<&dyn BoneMappingProvider>,
    reference: &SceneGraph,
    target: &SceneGraph,
    target_root: NodeId,
    scale_epsilon: f32,
    log: &mut SyncLog,
) -> MergeMapping {
    let costume = target.name(target_root).to_string();
    let raw_pairs =
        provider.and_then(|provider| provider.try_get_bone_mapping(target, target_root));
    let Some(raw_pairs) = raw_pairs else {
        log.add(SyncEvent::MappingUnavailable { costume });
        return MergeMapping::default();
    };

    let mut mapping = MergeMapping::default();
    for raw in raw_pairs {
        let (Some(reference_bone), Some(target_bone)) = (raw.reference, raw.target) else {
            mapping.discarded += 1;
            continue;
        };
        let Some(reference_node) = reference.get(reference_bone) else {
            mapping.discarded += 1;
            continue;
        };
        if is_nearly_one(&reference_node.scale, scale_epsilon) {
            mapping.discarded += 1;
            continue;
        }
        mapping.pairs.push(BonePair {
            reference: reference_bone,
            target: target_bone,
        });
    }

    log.add(SyncEvent::MappingResolved {
        costume,
        pairs: mapping.pairs.len(),
        discarded: mapping.discarded,
    });
    mapping
}

// ─── Merge-armature extras ────────────────────────────────────────────────────

/// Declaration stored under `extras.merge_armature` on an outfit armature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MergeArmatureConfig {
    /// Path of the merge target below the reference root.
    pub merge_target: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

impl MergeArmatureConfig {
    /// Outfit bone name with the declared prefix and suffix removed.
    pub fn base_name<'a>(&self, outfit_name: &'a str) -> &'a str {
        let name = outfit_name
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(outfit_name);
        name.strip_suffix(self.suffix.as_str()).unwrap_or(name)
    }
}

/// Reads `merge_armature` declarations found in target `extras` and pairs the
/// outfit bones with reference bones by name.
pub struct MergeArmatureProvider<'a> {
    reference: &'a SceneGraph,
    reference_root: NodeId,
}

impl<'a> MergeArmatureProvider<'a> {
    pub fn new(reference: &'a SceneGraph, reference_root: NodeId) -> Self {
        Self {
            reference,
            reference_root,
        }
    }

    fn pair_recursive(
        &self,
        target: &SceneGraph,
        config: &MergeArmatureConfig,
        reference_bone: Option<NodeId>,
        outfit_bone: NodeId,
        pairs: &mut Vec<RawBonePair>,
    ) {
        pairs.push(RawBonePair {
            reference: reference_bone,
            target: Some(outfit_bone),
        });

        for &child in target.children(outfit_bone) {
            let base_name = config.base_name(target.name(child));
            let reference_child = reference_bone.and_then(|bone| {
                self.reference
                    .children(bone)
                    .iter()
                    .copied()
                    .find(|candidate| self.reference.name(*candidate) == base_name)
            });
            self.pair_recursive(target, config, reference_child, child, pairs);
        }
    }
}

impl BoneMappingProvider for MergeArmatureProvider<'_> {
    fn try_get_bone_mapping(
        &self,
        target: &SceneGraph,
        target_root: NodeId,
    ) -> Option<Vec<RawBonePair>> {
        let mut pairs = Vec::new();
        let mut found = false;

        for id in target.descendants(target_root) {
            let Some(raw) = target.node(id).extras.get(MERGE_ARMATURE_KEY) else {
                continue;
            };
            let config = match MergeArmatureConfig::deserialize(raw) {
                Ok(config) => config,
                Err(error) => {
                    let name = target.name(id);
                    warn_once(
                        name,
                        &format!("Ignoring malformed merge_armature on '{}': {}", name, error),
                    );
                    continue;
                }
            };

            found = true;
            let merge_target =
                find_by_path(self.reference, self.reference_root, &config.merge_target);
            self.pair_recursive(target, &config, merge_target, id, &mut pairs);
        }

        found.then_some(pairs)
    }
}

// ─── Warn-once cache ──────────────────────────────────────────────────────────

static WARNED_KEYS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Emit `message` the first time `key` is seen in this process. Returns
/// whether the warning was emitted.
fn warn_once(key: &str, message: &str) -> bool {
    let mut warned = WARNED_KEYS
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if !warned.insert(key.to_string()) {
        return false;
    }
    log::warn!("{}", message);
    true
}
