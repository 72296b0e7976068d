//! Progress events emitted by the pipeline.
//!
//! Components never print. They receive an optional [`ProgressCallback`] and
//! report through [`emit`]; the shell decides how events are rendered.

use std::path::PathBuf;

use crate::synchronise::TransferTier;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PipelineEvent {
    /// Starting to scan one source root.
    ScanningSource { root: PathBuf },

    /// Discovery finished.
    GroupsDiscovered { groups: usize, items: usize },

    /// An archive task was scheduled for a group.
    ArchiveStarted { group: String },

    /// An archive task finished (successfully or not).
    ArchiveFinished {
        group: String,
        size_bytes: u64,
        success: bool,
        completed: usize,
        total: usize,
    },

    /// The cancel flag was observed; no further archive tasks will be awaited.
    ArchivingCancelled { completed: usize, total: usize },

    /// A manifest file reached the remote.
    FileCommitted { path: String, tier: TransferTier },

    /// A manifest file could not be transferred.
    FileFailed { path: String, reason: String },
}

pub type ProgressCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Emit a progress event if a callback is present.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: PipelineEvent) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
