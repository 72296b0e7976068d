use font_archiver_core::progress::{PipelineEvent, ProgressCallback};

/// Logging reporter using tracing for structured output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::ScanningSource { root } => {
                tracing::info!(root = %root.display(), "Scanning fonts");
            }

            PipelineEvent::GroupsDiscovered { groups, items } => {
                tracing::info!(families = groups, fonts = items, "Font families found");
            }

            PipelineEvent::ArchiveStarted { group } => {
                tracing::debug!(family = %group, "Archiving");
            }

            PipelineEvent::ArchiveFinished {
                group,
                size_bytes,
                success,
                completed,
                total,
            } => {
                if success {
                    tracing::info!(family = %group, size_bytes, completed, total, "Archived");
                } else {
                    tracing::warn!(family = %group, completed, total, "Archive failed");
                }
            }

            PipelineEvent::ArchivingCancelled { completed, total } => {
                tracing::warn!(completed, total, "Archiving interrupted");
            }

            PipelineEvent::FileCommitted { path, tier } => {
                tracing::info!(path = %path, ?tier, "Uploaded");
            }

            PipelineEvent::FileFailed { path, reason } => {
                tracing::error!(path = %path, reason = %reason, "Upload failed");
            }

            _ => {}
        }
    }

    /// Boxed callback for the core pipeline.
    pub fn into_callback(self) -> ProgressCallback {
        Box::new(move |event| self.handle(event))
    }
}
