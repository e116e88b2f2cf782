use std::collections::HashSet;

use nalgebra::Vector3;
use serde::Serialize;

use crate::scene::NodeId;

// ─── Constants ────────────────────────────────────────────────────────────────

/// Per-component tolerance when deciding whether a scale is `(1, 1, 1)`.
pub const SCALE_EPSILON: f32 = 0.0001;

/// Excluded armature paths listed before the "more omitted" marker.
pub const MAX_LOGGED_EXCLUDED_PATHS: usize = 30;

/// Shape-key names listed per renderer before the "more omitted" marker.
pub const MAX_LOGGED_SHAPE_KEYS: usize = 80;

/// Conventional name of the main skeleton node.
pub const ARMATURE_NAME: &str = "Armature";

/// Humanoid role used to locate the main skeleton.
pub const HIPS_BONE: &str = "hips";

/// Renderer names that take precedence when building the shape-key table.
pub(super) const RENDERER_PRIORITIES: [(&str, i32); 2] = [("Body_base", 100), ("Body", 90)];

/// Undo labels registered on target trees.
pub(super) const UNDO_ADJUST_COSTUME: &str = "Adjust costume scales";
pub(super) const UNDO_SYNC_SHAPE_KEYS: &str = "Sync costume shape keys";

// ─── Correction data ──────────────────────────────────────────────────────────

/// Structural paths of the authored reference skeleton.
pub type AllowedPathSet = HashSet<String>;

/// A non-identity scale found on the reference armature.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    pub name: String,
    /// Slash-joined path below the reference armature; empty for the armature.
    pub relative_path: String,
    pub scale: Vector3<f32>,
    /// Reference node the record was extracted from.
    pub source: NodeId,
}

impl CorrectionRecord {
    /// Label used in logs: `name` or `name (relative/path)`.
    pub fn log_key(&self) -> String {
        if self.relative_path.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.relative_path)
        }
    }
}

/// Which rule of the matcher chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    ExplicitMapping,
    ArmaturePath,
    Substring,
}

impl MatchStrategy {
    pub fn label(self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact name",
            MatchStrategy::ExplicitMapping => "merge mapping",
            MatchStrategy::ArmaturePath => "armature path",
            MatchStrategy::Substring => "partial name",
        }
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// Overall result of a reconciliation pass. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Corrections were offered to every target.
    Applied,
    /// The reference has no discoverable main armature.
    MissingSkeleton,
    /// The reference armature has no non-identity scale.
    NoCorrections,
    /// No target roots were supplied.
    NoTargets,
}

/// One successful scale application.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedCorrection {
    pub record: String,
    pub strategy: MatchStrategy,
    pub matched_path: String,
}

/// Shape-key synchronization counts for one target tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShapeKeySyncReport {
    pub renderer_count: usize,
    pub synced_renderers: usize,
    pub synced_keys: usize,
    pub failed_keys: usize,
}

/// Per-target summary.
#[derive(Debug, Clone, Serialize)]
pub struct CostumeReport {
    pub costume: String,
    pub applied_count: usize,
    pub applied: Vec<AppliedCorrection>,
    pub unmatched: Vec<String>,
    pub mapping_pairs: usize,
    pub shape_keys: Option<ShapeKeySyncReport>,
}

impl CostumeReport {
    pub(super) fn new(costume: impl Into<String>) -> Self {
        Self {
            costume: costume.into(),
            applied_count: 0,
            applied: Vec::new(),
            unmatched: Vec::new(),
            mapping_pairs: 0,
            shape_keys: None,
        }
    }
}

/// Summary of a full reconciliation over every target.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub reference_armature: Option<String>,
    pub allowed_path_count: Option<usize>,
    pub correction_count: usize,
    pub excluded_count: usize,
    pub shape_key_count: usize,
    pub costumes: Vec<CostumeReport>,
}

impl ReconcileReport {
    pub fn total_applied(&self) -> usize {
        self.costumes.iter().map(|costume| costume.applied_count).sum()
    }
}

// ─── Scale helpers ────────────────────────────────────────────────────────────

/// True when every component is within `epsilon` of 1.
pub fn is_nearly_one(scale: &Vector3<f32>, epsilon: f32) -> bool {
    scale.iter().all(|component| (component - 1.0).abs() < epsilon)
}
