//! Parallel orchestrator: one archive task per group on a bounded worker pool.
//!
//! Results are collected in completion order. The [`CancelFlag`] is only
//! checked between completions; a task that has started always runs its build
//! to the end, so cancellation never leaves a half-written archive behind.
//! Archive file names are made unique across the run before any task starts.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::archive::{sanitize_name, unique_file_stems, ArchiveBuilder};
use crate::compression::{host_parallelism, DEFAULT_PARALLELISM};
use crate::config::MIB;
use crate::contract::{ArchiveResult, GroupKey, Groups, Item};
use crate::progress::{emit, PipelineEvent, ProgressCallback};

/// Cooperative cancellation shared between the signal handler and the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Aggregate of one orchestrator run.
#[derive(Debug, Default, Clone)]
pub struct ArchiveRun {
    /// In completion order.
    pub results: Vec<ArchiveResult>,
    pub total_size_bytes: u64,
    /// Groups that were never awaited because the run was cancelled.
    pub not_awaited: usize,
    pub cancelled: bool,
}

impl ArchiveRun {
    pub fn successes(&self) -> impl Iterator<Item = &ArchiveResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArchiveResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Worker count used when none is configured.
pub fn default_concurrency() -> usize {
    host_parallelism().unwrap_or(DEFAULT_PARALLELISM)
}

fn build_guarded(
    builder: &ArchiveBuilder,
    group_key: GroupKey,
    file_stem: String,
    items: Vec<Item>,
    output_dir: PathBuf,
) -> ArchiveResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        builder.build_as(&group_key, &file_stem, &items, &output_dir)
    }));
    match outcome {
        Ok(result) => result,
        Err(_) => {
            error!(group = %group_key, "Archive task panicked");
            ArchiveResult {
                archive_path: builder.output_path(&file_stem, &output_dir),
                group_key,
                size_bytes: 0,
                success: false,
            }
        }
    }
}

/// Build archives for all `groups` with at most `concurrency` builds in flight.
pub async fn run_all(
    builder: Arc<ArchiveBuilder>,
    groups: Groups,
    output_dir: &Path,
    concurrency: Option<usize>,
    cancel: &CancelFlag,
    on_progress: Option<&ProgressCallback>,
) -> ArchiveRun {
    let total = groups.len();
    let concurrency = concurrency.unwrap_or_else(default_concurrency).max(1);
    info!(groups = total, concurrency, "Creating archives");

    let mut stems = unique_file_stems(groups.keys());
    let mut pending = groups.into_iter();
    let mut join_set: JoinSet<ArchiveResult> = JoinSet::new();
    let mut run = ArchiveRun::default();
    let mut scheduled = 0usize;

    loop {
        while join_set.len() < concurrency && !cancel.is_cancelled() {
            let Some((group_key, items)) = pending.next() else {
                break;
            };
            info!(group = %group_key, items = items.len(), "Starting archive task");
            emit(
                on_progress,
                PipelineEvent::ArchiveStarted {
                    group: group_key.clone(),
                },
            );
            let file_stem = stems
                .remove(&group_key)
                .unwrap_or_else(|| sanitize_name(&group_key));
            let builder = Arc::clone(&builder);
            let output_dir = output_dir.to_path_buf();
            join_set.spawn_blocking(move || {
                build_guarded(&builder, group_key, file_stem, items, output_dir)
            });
            scheduled += 1;
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };

        match joined {
            Ok(result) => {
                run.total_size_bytes += result.size_bytes;
                let completed = run.results.len() + 1;
                info!(
                    group = %result.group_key,
                    success = result.success,
                    progress = %format!("{:.1}%", completed as f64 / total.max(1) as f64 * 100.0),
                    size_mb = %format!("{:.2}", result.size_bytes as f64 / MIB as f64),
                    "Finished archive task"
                );
                emit(
                    on_progress,
                    PipelineEvent::ArchiveFinished {
                        group: result.group_key.clone(),
                        size_bytes: result.size_bytes,
                        success: result.success,
                        completed,
                        total,
                    },
                );
                run.results.push(result);
            }
            Err(e) => {
                error!(error = %e, "Archive task did not complete");
            }
        }

        if cancel.is_cancelled() {
            let in_flight = join_set.len();
            warn!(
                completed = run.results.len(),
                in_flight,
                "Cancellation requested, no further archive tasks will be awaited"
            );
            // In-flight builds keep running to completion on the blocking pool.
            join_set.detach_all();
            break;
        }
    }

    run.cancelled = cancel.is_cancelled();
    run.not_awaited = total.saturating_sub(run.results.len());
    if run.cancelled {
        emit(
            on_progress,
            PipelineEvent::ArchivingCancelled {
                completed: run.results.len(),
                total,
            },
        );
    }
    info!(
        scheduled,
        completed = run.results.len(),
        total_size_mb = %format!("{:.2}", run.total_size_bytes as f64 / MIB as f64),
        "Archive creation finished"
    );
    run
}
