//! Remote sync: publish a [`TransferManifest`] to a remote repository.
//!
//! Every manifest file moves through
//! `Pending -> {SmallDirect, LargeStaged} -> Committed | Failed`.
//!
//! # Transfer paths
//! - **Staged**: the staging root is turned into a local repository with large-file
//!   tracking, committed and pushed. Used when a [`VersionControl`] is supplied
//!   and available.
//! - **Direct**: one content-API write per file (create if absent, update with the
//!   prior hash if present).
//!
//! # Fallback chain
//! - A file the VCS refuses to stage goes to the direct path. For a large file
//!   this is logged as likely to hit the API size limit.
//! - Nothing to commit is a no-op. A failed commit is retried as an allow-empty commit.
//! - A rejected push is retried once as a forced push. If that fails too, the
//!   whole manifest is uploaded through the direct path.
//!
//! Files are independent: one failed write never stops the rest.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{RemoteConfig, MIB};
use crate::contract::{
    RemoteError, RemoteFile, RemoteStore, RepoHandle, VcsError, VersionControl,
};
use crate::progress::{emit, PipelineEvent, ProgressCallback};
use crate::staging::{ManifestEntry, TransferManifest, LARGE_FILE_PATTERNS};

pub const REMOTE_NAME: &str = "origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferTier {
    SmallDirect,
    LargeStaged,
}

/// Files of at least `threshold` bytes must take the staged path.
pub fn route(size_bytes: u64, threshold: u64) -> TransferTier {
    if size_bytes >= threshold {
        TransferTier::LargeStaged
    } else {
        TransferTier::SmallDirect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Staged,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FileState {
    Pending,
    Routed(TransferTier),
    Committed(Channel),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub size_bytes: u64,
    pub tier: TransferTier,
    pub state: FileState,
}

impl FileReport {
    pub fn is_committed(&self) -> bool {
        matches!(self.state, FileState::Committed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishOutcome {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub repo: String,
    pub outcome: PublishOutcome,
    pub files: Vec<FileReport>,
}

impl PublishReport {
    pub fn committed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.is_committed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| !f.is_committed())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub large_file_threshold: u64,
    pub branch: String,
    /// Remote URL for the staged path, stored in the local repository config.
    /// Must not embed credentials; the VCS supplies those at push time.
    pub remote_url: String,
    pub commit_message: String,
    pub use_vcs: bool,
}

impl PublishOptions {
    pub fn from_config(config: &RemoteConfig, remote_url: impl Into<String>) -> Self {
        Self {
            large_file_threshold: config.large_file_threshold,
            branch: config.branch.clone(),
            remote_url: remote_url.into(),
            commit_message: config.commit_message.clone(),
            use_vcs: config.use_vcs,
        }
    }
}

/// Create the file at `entry.relative_path`, or update it with the prior hash.
pub async fn upload_direct(
    store: &dyn RemoteStore,
    handle: &RepoHandle,
    entry: &ManifestEntry,
) -> Result<RemoteFile, SyncError> {
    let path = entry.relative_path.as_str();
    let content = tokio::fs::read(&entry.local_path)
        .await
        .map_err(|source| SyncError::Read {
            path: path.to_string(),
            source,
        })?;

    let written = match store.get_file(handle, path).await? {
        Some(existing) => {
            let file = store
                .update_file(handle, path, &content, &format!("Update {path}"), &existing.sha)
                .await?;
            info!(repo = %handle, path, "Updated file in repository");
            file
        }
        None => {
            let file = store
                .create_file(handle, path, &content, &format!("Add {path}"))
                .await?;
            info!(repo = %handle, path, "Added file to repository");
            file
        }
    };
    Ok(written)
}

struct Publisher<'a> {
    manifest: &'a TransferManifest,
    handle: &'a RepoHandle,
    store: &'a dyn RemoteStore,
    options: &'a PublishOptions,
    on_progress: Option<&'a ProgressCallback>,
    files: Vec<FileReport>,
}

impl<'a> Publisher<'a> {
    fn commit(&mut self, index: usize, channel: Channel) {
        let file = &mut self.files[index];
        file.state = FileState::Committed(channel);
        emit(
            self.on_progress,
            PipelineEvent::FileCommitted {
                path: file.path.clone(),
                tier: file.tier,
            },
        );
    }

    fn fail(&mut self, index: usize, reason: String) {
        let file = &mut self.files[index];
        error!(path = %file.path, reason = %reason, "File transfer failed");
        emit(
            self.on_progress,
            PipelineEvent::FileFailed {
                path: file.path.clone(),
                reason: reason.clone(),
            },
        );
        file.state = FileState::Failed(reason);
    }

    async fn direct(&mut self, indices: &[usize]) {
        let manifest = self.manifest;
        for &index in indices {
            if self.files[index].is_committed() {
                continue;
            }
            let entry = &manifest.entries[index];
            if self.files[index].tier == TransferTier::LargeStaged {
                warn!(
                    path = %entry.relative_path,
                    size_mb = %format!("{:.2}", entry.size_bytes as f64 / MIB as f64),
                    "Uploading large file through the content API; it may exceed the size limit"
                );
            }
            match upload_direct(self.store, self.handle, entry).await {
                Ok(_) => self.commit(index, Channel::Direct),
                Err(e) => self.fail(index, e.to_string()),
            }
        }
    }

    /// Prepare the local repository. Any failure here means the staged path is unusable.
    fn setup(&self, vcs: &dyn VersionControl, root: &Path) -> Result<(), VcsError> {
        vcs.init(root)?;
        vcs.lfs_install(root)?;
        for pattern in LARGE_FILE_PATTERNS {
            vcs.lfs_track(root, pattern)?;
        }
        match vcs.current_branch(root)? {
            Some(branch) if branch == self.options.branch => {}
            current => {
                debug!(?current, branch = %self.options.branch, "Switching staging branch");
                vcs.create_branch(root, &self.options.branch)?;
            }
        }
        vcs.add_remote(root, REMOTE_NAME, &self.options.remote_url)?;
        Ok(())
    }

    async fn staged(&mut self, vcs: &dyn VersionControl) {
        let root = self.manifest.root.clone();
        let all: Vec<usize> = (0..self.files.len()).collect();

        if let Err(e) = self.setup(vcs, &root) {
            warn!(error = %e, root = %root.display(), "Local repository setup failed, using the content API for every file");
            self.direct(&all).await;
            return;
        }

        let mut staged = Vec::new();
        let mut unstaged = Vec::new();
        for index in all.iter().copied() {
            let path = self.files[index].path.clone();
            match vcs.add(&root, &path) {
                Ok(()) => {
                    debug!(path = %path, "Staged file");
                    staged.push(index);
                }
                Err(e) => {
                    match self.files[index].tier {
                        TransferTier::LargeStaged => warn!(
                            error = %e,
                            path = %path,
                            "Large file could not be staged, falling back to the content API"
                        ),
                        TransferTier::SmallDirect => warn!(
                            error = %e,
                            path = %path,
                            "File could not be staged, using the content API"
                        ),
                    }
                    unstaged.push(index);
                }
            }
        }

        let changed = match vcs.has_changes(&root) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "Status query failed, committing anyway");
                true
            }
        };
        if changed {
            if let Err(e) = vcs.commit(&root, &self.options.commit_message, false) {
                warn!(error = %e, "Commit failed, retrying as an empty commit");
                if let Err(e) = vcs.commit(&root, &self.options.commit_message, true) {
                    error!(error = %e, "Empty commit failed as well");
                }
            }
        } else {
            info!(root = %root.display(), "Nothing to commit");
        }

        let pushed = match vcs.push(&root, REMOTE_NAME, &self.options.branch, false) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, branch = %self.options.branch, "Push rejected, retrying with force");
                match vcs.push(&root, REMOTE_NAME, &self.options.branch, true) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "Forced push failed, uploading every file through the content API");
                        false
                    }
                }
            }
        };

        if pushed {
            info!(repo = %self.handle, files = staged.len(), branch = %self.options.branch, "Pushed staged files");
            for index in staged {
                self.commit(index, Channel::Staged);
            }
            self.direct(&unstaged).await;
        } else {
            self.direct(&all).await;
        }
    }
}

/// Publish every file of `manifest` to `handle`.
pub async fn publish(
    manifest: &TransferManifest,
    handle: &RepoHandle,
    store: &dyn RemoteStore,
    vcs: Option<&dyn VersionControl>,
    options: &PublishOptions,
    on_progress: Option<&ProgressCallback>,
) -> PublishReport {
    let files = manifest
        .entries
        .iter()
        .map(|entry| FileReport {
            path: entry.relative_path.clone(),
            size_bytes: entry.size_bytes,
            tier: route(entry.size_bytes, options.large_file_threshold),
            state: FileState::Pending,
        })
        .collect();

    let mut publisher = Publisher {
        manifest,
        handle,
        store,
        options,
        on_progress,
        files,
    };
    for file in &mut publisher.files {
        file.state = FileState::Routed(file.tier);
    }

    let large = publisher
        .files
        .iter()
        .filter(|f| f.tier == TransferTier::LargeStaged)
        .count();
    info!(
        repo = %handle,
        files = publisher.files.len(),
        large,
        total_mb = %format!("{:.2}", manifest.total_bytes() as f64 / MIB as f64),
        "Publishing manifest"
    );

    let vcs = match vcs {
        Some(vcs) if options.use_vcs && vcs.is_available() => Some(vcs),
        Some(_) if options.use_vcs => {
            warn!("Version control or its large-file extension is unavailable, using the content API only");
            None
        }
        _ => None,
    };

    match vcs {
        Some(vcs) => publisher.staged(vcs).await,
        None => {
            let all: Vec<usize> = (0..publisher.files.len()).collect();
            publisher.direct(&all).await;
        }
    }

    let committed = publisher.files.iter().filter(|f| f.is_committed()).count();
    let outcome = if committed == publisher.files.len() {
        PublishOutcome::Success
    } else if committed == 0 {
        PublishOutcome::Failed
    } else {
        PublishOutcome::Partial
    };

    let report = PublishReport {
        repo: handle.to_string(),
        outcome,
        files: publisher.files,
    };
    info!(
        repo = %handle,
        ?outcome,
        committed,
        failed = report.files.len() - committed,
        "Publish finished"
    );
    debug!(
        report = %serde_json::to_string(&report).unwrap_or_else(|e| format!("<unserialisable: {e}>")),
        "Publish report"
    );
    report
}

/// Manifest paths that are not visible in the remote repository root.
pub async fn verify_published(
    store: &dyn RemoteStore,
    handle: &RepoHandle,
    manifest: &TransferManifest,
) -> Result<Vec<String>, SyncError> {
    let listing = store.list_dir(handle, "").await?;
    let missing: Vec<String> = manifest
        .entries
        .iter()
        .filter(|entry| !listing.iter().any(|f| f.path == entry.relative_path))
        .map(|entry| entry.relative_path.clone())
        .collect();

    if missing.is_empty() {
        info!(repo = %handle, files = listing.len(), "All manifest files are visible remotely");
    } else {
        warn!(repo = %handle, ?missing, "Some manifest files are not visible remotely");
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LARGE_FILE_THRESHOLD;

    #[test]
    fn threshold_routes_to_the_large_path() {
        assert_eq!(
            route(DEFAULT_LARGE_FILE_THRESHOLD, DEFAULT_LARGE_FILE_THRESHOLD),
            TransferTier::LargeStaged
        );
        assert_eq!(
            route(DEFAULT_LARGE_FILE_THRESHOLD - 1, DEFAULT_LARGE_FILE_THRESHOLD),
            TransferTier::SmallDirect
        );
        assert_eq!(route(0, DEFAULT_LARGE_FILE_THRESHOLD), TransferTier::SmallDirect);
    }
}
