use std::fmt;

use serde::Serialize;

use super::types::MatchStrategy;

/// Structured log entry emitted by the reconciliation passes.
///
/// The core never formats text itself; [`fmt::Display`] below is the single
/// place where events become human-readable lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    // ─ reference extraction ─
    ReferenceArmatureMissing { tree: String },
    AllowedPathCount { count: usize },
    ScaleCriteria { epsilon: f32 },
    ExcludedPathCount { count: usize },
    ExcludedPathHeader,
    PathEntry { path: String },
    ListOmitted { count: usize },
    NoCorrections { armature: String },
    CorrectionCount { count: usize },

    // ─ scale application ─
    CostumeScaleHeader { costume_count: usize },
    MappingResolved { costume: String, pairs: usize, discarded: usize },
    MappingUnavailable { costume: String },
    ScaleApplied {
        costume: String,
        record: String,
        strategy: MatchStrategy,
        matched: String,
    },
    Unmatched { costume: String, record: String },
    CostumeApplied { costume: String, applied: usize },

    // ─ shape keys ─
    ReferenceTableHeader { root: String, renderer_count: usize },
    ReferenceRendererSummary { path: String, mesh: String, shape_keys: usize },
    DuplicateShapeKey { mesh: String, shape_key: String },
    ShapeKeyReadFailed { mesh: String, index: usize },
    UnnamedShapeKeys { mesh: String, count: usize },
    CostumeShapeKeyHeader { costume: String, renderer_count: usize },
    RendererMeshMissing { path: String },
    RendererSummary { path: String, mesh: String, shape_keys: usize },
    ShapeKeyEntry { name: String },
    ShapeKeysSynced { names: Vec<String> },
    ShapeKeyWriteFailed { mesh: String, index: usize },
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::ReferenceArmatureMissing { tree } => {
                write!(f, "[Scale] No main armature found under '{}'", tree)
            }
            SyncEvent::AllowedPathCount { count } => {
                write!(f, "[Scale] Reference armature paths: {}", count)
            }
            SyncEvent::ScaleCriteria { epsilon } => write!(
                f,
                "[Scale] Bones whose scale differs from (1, 1, 1) by at least {} are propagated",
                epsilon
            ),
            SyncEvent::ExcludedPathCount { count } => {
                write!(f, "[Scale] Bones excluded as attachments: {}", count)
            }
            SyncEvent::ExcludedPathHeader => write!(f, "[Scale] Excluded paths:"),
            SyncEvent::PathEntry { path } => write!(f, "  - {}", path),
            SyncEvent::ListOmitted { count } => write!(f, "  ... {} more omitted", count),
            SyncEvent::NoCorrections { armature } => {
                write!(f, "[Scale] '{}' has no scaled bones; nothing to propagate", armature)
            }
            SyncEvent::CorrectionCount { count } => {
                write!(f, "[Scale] Scale corrections found: {}", count)
            }
            SyncEvent::CostumeScaleHeader { costume_count } => {
                write!(f, "[Scale] Adjusting {} costume(s)", costume_count)
            }
            SyncEvent::MappingResolved {
                costume,
                pairs,
                discarded,
            } => write!(
                f,
                "[Scale] {}: merge mapping pairs {} (discarded {})",
                costume, pairs, discarded
            ),
            SyncEvent::MappingUnavailable { costume } => {
                write!(f, "[Scale] {}: no merge mapping available", costume)
            }
            SyncEvent::ScaleApplied {
                costume,
                record,
                strategy,
                matched,
            } => write!(
                f,
                "[Scale] {}: {} -> {} [{}]",
                costume,
                record,
                matched,
                strategy.label()
            ),
            SyncEvent::Unmatched { costume, record } => {
                write!(f, "[Scale] {}: no match for {}", costume, record)
            }
            SyncEvent::CostumeApplied { costume, applied } => {
                write!(f, "[Scale] {}: applied {} correction(s)", costume, applied)
            }
            SyncEvent::ReferenceTableHeader {
                root,
                renderer_count,
            } => write!(
                f,
                "[ShapeKey] Reference '{}': {} renderer(s)",
                root, renderer_count
            ),
            SyncEvent::ReferenceRendererSummary {
                path,
                mesh,
                shape_keys,
            } => write!(
                f,
                "[ShapeKey] Reference {} (mesh {}): {} shape key(s)",
                path, mesh, shape_keys
            ),
            SyncEvent::DuplicateShapeKey { mesh, shape_key } => write!(
                f,
                "[ShapeKey] Duplicate key '{}' on {} ignored",
                shape_key, mesh
            ),
            SyncEvent::ShapeKeyReadFailed { mesh, index } => write!(
                f,
                "[ShapeKey] Could not read weight {} on {}; skipped",
                index, mesh
            ),
            SyncEvent::UnnamedShapeKeys { mesh, count } => write!(
                f,
                "[ShapeKey] {} has {} unnamed shape key(s); not synced",
                mesh, count
            ),
            SyncEvent::CostumeShapeKeyHeader {
                costume,
                renderer_count,
            } => write!(
                f,
                "[ShapeKey] Costume '{}': {} renderer(s)",
                costume, renderer_count
            ),
            SyncEvent::RendererMeshMissing { path } => {
                write!(f, "[ShapeKey] {}: mesh is missing", path)
            }
            SyncEvent::RendererSummary {
                path,
                mesh,
                shape_keys,
            } => write!(
                f,
                "[ShapeKey] {} (mesh {}): {} shape key(s)",
                path, mesh, shape_keys
            ),
            SyncEvent::ShapeKeyEntry { name } => write!(f, "  - {}", name),
            SyncEvent::ShapeKeysSynced { names } => {
                write!(f, "[ShapeKey] Synced: {}", names.join(", "))
            }
            SyncEvent::ShapeKeyWriteFailed { mesh, index } => write!(
                f,
                "[ShapeKey] Could not write weight {} on {}; skipped",
                index, mesh
            ),
        }
    }
}

/// Append-only event sink. A disabled log accepts and drops every event.
#[derive(Debug, Clone, Default)]
pub struct SyncLog {
    events: Vec<SyncEvent>,
    disabled: bool,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self {
            events: Vec::new(),
            disabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    pub fn add(&mut self, event: SyncEvent) {
        if self.disabled {
            return;
        }
        log::debug!("{}", event);
        self.events.push(event);
    }

    /// Add up to `max_count` entries, then a [`SyncEvent::ListOmitted`] marker
    /// for the remainder.
    pub fn add_entries_with_limit<I>(&mut self, entries: I, max_count: usize)
    where
        I: IntoIterator<Item = SyncEvent>,
    {
        if self.disabled {
            return;
        }

        let mut total = 0;
        for entry in entries {
            total += 1;
            if total <= max_count {
                self.add(entry);
            }
        }

        self.add_omitted_if_needed(total, total.min(max_count));
    }

    pub fn add_omitted_if_needed(&mut self, total_count: usize, logged_count: usize) {
        let omitted = total_count.saturating_sub(logged_count);
        if omitted > 0 {
            self.add(SyncEvent::ListOmitted { count: omitted });
        }
    }

    pub fn events(&self) -> &[SyncEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Render every event through the text formatter.
    pub fn render(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }
}
