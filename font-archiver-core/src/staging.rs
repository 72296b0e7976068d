//! Local staging: the run directory, the staging root that mirrors the remote
//! layout, and the [`TransferManifest`] handed to the sync stage.
//!
//! The summary file and the transfer-attribute rules are written fresh on every
//! run, before any archive is copied in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MIB;
use crate::contract::ArchiveResult;

pub const SUMMARY_FILE: &str = "README.md";
pub const ATTRIBUTES_FILE: &str = ".gitattributes";
pub const IGNORE_FILE: &str = ".gitignore";

/// Archive patterns routed through the large-file filter.
pub const LARGE_FILE_PATTERNS: &[&str] = &["*.zip", "*.7z"];

/// Directory under the system temp dir that holds every run directory.
pub const RUN_ROOT_NAME: &str = "Font-Archiver";

const MAX_NAME_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no free directory name for prefix `{prefix}` under {}", parent.display())]
    NameExhausted { parent: PathBuf, prefix: String },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Create a fresh directory `<parent>/<prefix>_<timestamp>`. If that name is
/// taken a random disambiguator is appended until an unused name is found.
pub fn create_unique_dir(parent: &Path, prefix: &str) -> Result<PathBuf, StagingError> {
    fs::create_dir_all(parent).map_err(|source| StagingError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let base = format!("{prefix}_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let mut candidate = parent.join(&base);
    for _ in 0..MAX_NAME_ATTEMPTS {
        match fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(path = %candidate.display(), "Created unique directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                candidate = parent.join(format!("{base}_{}", &suffix[..8]));
            }
            Err(source) => {
                return Err(StagingError::CreateDir {
                    path: candidate,
                    source,
                })
            }
        }
    }
    Err(StagingError::NameExhausted {
        parent: parent.to_path_buf(),
        prefix: prefix.to_string(),
    })
}

/// `<temp>/Font-Archiver/run_<timestamp>`, or the same layout under `base`.
pub fn create_run_dir(base: Option<&Path>) -> Result<PathBuf, StagingError> {
    let parent = match base {
        Some(base) => base.to_path_buf(),
        None => std::env::temp_dir().join(RUN_ROOT_NAME),
    };
    let dir = create_unique_dir(&parent, "run")?;
    info!(path = %dir.display(), "Using run directory");
    Ok(dir)
}

/// Statistics rendered into the summary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub families: usize,
    pub items: usize,
    pub total_bytes: u64,
    pub generated_at: DateTime<Utc>,
}

pub fn render_summary(summary: &Summary) -> String {
    format!(
        "# Font Storage\n\
         \n\
         A collection of fonts organized by family.\n\
         \n\
         ## Statistics\n\
         \n\
         - Font family count: {families}\n\
         - Font file count: {items}\n\
         - Total archive size: {size:.2} MB\n\
         - Upload date: {date}\n\
         \n\
         ## Disclaimer\n\
         \n\
         The commercial status of these fonts is unknown. The repository owner makes no claim to ownership of these items.\n\
         These fonts are provided \"as is\" without warranty of any kind, either expressed or implied.\n\
         \n\
         In the event that the contents of the repository fall under copyright, the repository owner makes no claim to its contents.\n\
         All fonts were obtained from openly available locations.\n",
        families = summary.families,
        items = summary.items,
        size = summary.total_bytes as f64 / MIB as f64,
        date = summary.generated_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

pub fn render_attributes() -> String {
    LARGE_FILE_PATTERNS
        .iter()
        .map(|pattern| format!("{pattern} filter=lfs diff=lfs merge=lfs -text\n"))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    /// Summary, attribute rules, ignore file.
    Metadata,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Path relative to the staging root, `/`-separated. Also the remote path.
    pub relative_path: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub kind: EntryKind,
}

/// Files staged for one sync pass, metadata first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferManifest {
    pub root: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl TransferManifest {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn archives(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Archive)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StagingOptions {
    /// Copied into the root as `.gitignore` when it exists.
    pub gitignore: Option<PathBuf>,
}

fn write_file(path: &Path, contents: &str) -> Result<u64, StagingError> {
    fs::write(path, contents).map_err(|source| StagingError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.len() as u64)
}

fn metadata_entry(root: &Path, name: &str, size_bytes: u64) -> ManifestEntry {
    ManifestEntry {
        relative_path: name.to_string(),
        local_path: root.join(name),
        size_bytes,
        kind: EntryKind::Metadata,
    }
}

/// Build the staging root for the successful archives in `results`.
///
/// Failing to write the summary or attribute file is fatal. A single archive
/// that cannot be copied is logged and left out of the manifest.
pub fn prepare(
    root: &Path,
    results: &[ArchiveResult],
    item_count: usize,
    options: &StagingOptions,
) -> Result<TransferManifest, StagingError> {
    fs::create_dir_all(root).map_err(|source| StagingError::CreateDir {
        path: root.to_path_buf(),
        source,
    })?;

    let successes: Vec<&ArchiveResult> = results.iter().filter(|r| r.success).collect();
    let summary = Summary {
        families: successes.len(),
        items: item_count,
        total_bytes: successes.iter().map(|r| r.size_bytes).sum(),
        generated_at: Utc::now(),
    };

    let mut manifest = TransferManifest {
        root: root.to_path_buf(),
        entries: Vec::new(),
    };

    let size = write_file(&root.join(SUMMARY_FILE), &render_summary(&summary))?;
    manifest.entries.push(metadata_entry(root, SUMMARY_FILE, size));
    let size = write_file(&root.join(ATTRIBUTES_FILE), &render_attributes())?;
    manifest.entries.push(metadata_entry(root, ATTRIBUTES_FILE, size));

    if let Some(gitignore) = options.gitignore.as_deref().filter(|p| p.is_file()) {
        match fs::copy(gitignore, root.join(IGNORE_FILE)) {
            Ok(size) => manifest.entries.push(metadata_entry(root, IGNORE_FILE, size)),
            Err(e) => warn!(error = ?e, path = %gitignore.display(), "Failed to copy ignore file"),
        }
    }

    for result in successes {
        let Some(name) = result.archive_path.file_name() else {
            warn!(path = %result.archive_path.display(), "Archive path has no file name, skipping");
            continue;
        };
        let name = name.to_string_lossy().into_owned();
        let dest = root.join(&name);

        if dest.exists() {
            debug!(path = %dest.display(), "Archive already staged");
        } else if let Err(e) = fs::copy(&result.archive_path, &dest) {
            warn!(
                error = ?e,
                group = %result.group_key,
                source = %result.archive_path.display(),
                "Failed to stage archive"
            );
            continue;
        }

        let size_bytes = match fs::metadata(&dest) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(error = ?e, path = %dest.display(), "Cannot stat staged archive");
                continue;
            }
        };
        manifest.entries.push(ManifestEntry {
            relative_path: name,
            local_path: dest,
            size_bytes,
            kind: EntryKind::Archive,
        });
    }

    info!(
        root = %root.display(),
        files = manifest.len(),
        families = summary.families,
        total_mb = %format!("{:.2}", summary.total_bytes as f64 / MIB as f64),
        "Staging root prepared"
    );
    Ok(manifest)
}
