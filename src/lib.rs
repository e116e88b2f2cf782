//! Costume scene-graph reconciliation.
//!
//! Propagates non-uniform bone scale corrections and shape-key weights from a
//! reference avatar onto the costume hierarchies attached to it.

pub mod error;
pub mod logging;
pub mod reconcile;
pub mod scene;
pub mod settings;
pub mod sync;

pub use error::SyncError;
pub use logging::{LogLevel, ResultExt, send_log};
pub use reconcile::{ReconcileOutcome, ReconcileReport, Reconciler, SyncEvent, SyncLog};
pub use scene::{NodeId, SceneGraph};
pub use settings::SyncSettings;
