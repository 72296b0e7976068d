//! # contract: collaborator traits and the data passed between pipeline stages
//!
//! The pipeline talks to four external collaborators, each behind a trait so
//! the core can run against real tools, a remote API, or mocks in tests:
//!
//! - [`Classifier`]: derives a group key for a font file (font metadata parsing
//!   lives outside this crate).
//! - [`ArchiveStrategy`]: one way of producing an archive on disk (external 7z
//!   tool, built-in zip writer).
//! - [`RemoteStore`]: the remote content API (account, rate limit, repository
//!   lifecycle, file contents).
//! - [`VersionControl`]: the optional `git`/`git lfs` staging path.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` behind the `test-export-mocks`
//!   feature, so downstream crates and integration tests get `Mock*` types.
//!
//! ## Data Types
//! - [`Item`], [`Groups`] and [`ArchiveResult`] flow from discovery through the
//!   orchestrator into staging.
//! - [`RepoHandle`] and the remote response types flow through lifecycle and sync.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Normalised classification key shared by all items of one group.
pub type GroupKey = String;

/// Ordered mapping from group key to the items in that group.
pub type Groups = BTreeMap<GroupKey, Vec<Item>>;

/// A discovered candidate file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    /// Where the file lives on disk.
    pub source_path: PathBuf,
    /// Case-insensitive identity used for cross-source deduplication (lowercased file name).
    pub identity_key: String,
}

impl Item {
    pub fn new(source_path: PathBuf) -> Self {
        let identity_key = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            source_path,
            identity_key,
        }
    }

    /// File name without directories; the only name that ever enters an archive.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of building one group's archive.
///
/// A failed build carries `success == false` and `size_bytes == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveResult {
    pub group_key: GroupKey,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub success: bool,
}

/// Classifies a candidate file into a group. `None` means "not classifiable";
/// discovery then falls back to a key derived from the file name.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Classifier: Send + Sync {
    fn classify(&self, path: &Path) -> Option<GroupKey>;
}

/// Classifier that never reads file metadata, so every item is keyed by its file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileNameOnly;

impl Classifier for FileNameOnly {
    fn classify(&self, _path: &Path) -> Option<GroupKey> {
        None
    }
}

/// Errors produced by an [`ArchiveStrategy`].
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("`{tool}` was not found")]
    ToolMissing { tool: String },

    #[error("`{tool}` exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("integrity check failed for {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// One way of writing an archive for a list of files.
///
/// Implementations must store entries under their file names only.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ArchiveStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// File extension (without the dot) of the archives this strategy produces.
    fn extension(&self) -> &'static str;

    /// Write an archive containing `items` to `target`.
    fn create(&self, items: &[PathBuf], target: &Path) -> Result<(), StrategyError>;

    /// Re-open `target` and check every entry.
    fn verify(&self, target: &Path) -> Result<(), StrategyError>;
}

/// Identifies a repository on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
}

impl RepoHandle {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub login: String,
    /// Billing plan name as reported by the remote (e.g. "free", "pro").
    pub plan: Option<String>,
}

/// Core API request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp of the next reset, if reported.
    pub reset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub handle: RepoHandle,
    pub html_url: String,
    pub default_branch: Option<String>,
    pub private: bool,
}

/// Parameters for repository creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRepository {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub has_issues: bool,
    pub has_projects: bool,
    pub has_wiki: bool,
}

/// A file (or directory entry) on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    /// Optimistic-concurrency token required to update the file.
    pub sha: String,
    pub size: u64,
}

/// Errors returned by a [`RemoteStore`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication rejected: {0}")]
    Unauthorized(String),

    #[error("remote returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Remote content API consumed by lifecycle and sync.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The account the credentials belong to.
    async fn current_user(&self) -> Result<AccountInfo, RemoteError>;

    async fn rate_limit(&self) -> Result<RateLimit, RemoteError>;

    /// Fetch a repository; `Ok(None)` when it does not exist.
    async fn get_repo(&self, handle: &RepoHandle) -> Result<Option<RemoteRepo>, RemoteError>;

    /// Create a repository owned by the authenticated account.
    async fn create_repo(&self, req: &NewRepository) -> Result<RemoteRepo, RemoteError>;

    async fn delete_repo(&self, handle: &RepoHandle) -> Result<(), RemoteError>;

    /// Fetch file metadata at `path`; `Ok(None)` when absent.
    async fn get_file(
        &self,
        handle: &RepoHandle,
        path: &str,
    ) -> Result<Option<RemoteFile>, RemoteError>;

    async fn create_file(
        &self,
        handle: &RepoHandle,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<RemoteFile, RemoteError>;

    /// Replace the file at `path`; `sha` must match the current remote version.
    async fn update_file(
        &self,
        handle: &RepoHandle,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<RemoteFile, RemoteError>;

    /// List the entries of a directory (`""` for the repository root).
    async fn list_dir(
        &self,
        handle: &RepoHandle,
        path: &str,
    ) -> Result<Vec<RemoteFile>, RemoteError>;
}

/// Errors produced by a [`VersionControl`] implementation.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("`{tool}` is not available")]
    Unavailable { tool: String },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Local version-control operations used by the staged (bulk-transfer) upload path.
/// All paths are relative to `dir`, the staging root.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait VersionControl: Send + Sync {
    /// Whether both the VCS tool and its large-file extension can be invoked.
    fn is_available(&self) -> bool;

    fn init(&self, dir: &Path) -> Result<(), VcsError>;

    fn lfs_install(&self, dir: &Path) -> Result<(), VcsError>;

    fn lfs_track(&self, dir: &Path, pattern: &str) -> Result<(), VcsError>;

    /// Name of the checked-out branch, `None` when it cannot be determined.
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError>;

    fn create_branch(&self, dir: &Path, name: &str) -> Result<(), VcsError>;

    fn add(&self, dir: &Path, rel_path: &str) -> Result<(), VcsError>;

    /// Dry-run status query: are there staged or unstaged changes?
    fn has_changes(&self, dir: &Path) -> Result<bool, VcsError>;

    fn commit(&self, dir: &Path, message: &str, allow_empty: bool) -> Result<(), VcsError>;

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError>;

    fn push(&self, dir: &Path, remote: &str, branch: &str, force: bool) -> Result<(), VcsError>;
}
