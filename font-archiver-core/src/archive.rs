//! Archive builder: one archive per group, primary strategy with a fallback,
//! integrity check after every write, and a bounded retry loop that moves to a
//! `_retryN` path on each new attempt so a half-written or locked file from an
//! earlier attempt is never reused.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::compression::{SevenZipStrategy, ZipStrategy};
use crate::config::ArchiveConfig;
use crate::contract::{ArchiveResult, ArchiveStrategy, Item};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing input files for {group}: {missing:?}")]
    MissingItems { group: String, missing: Vec<PathBuf> },

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive for {group} failed after {attempts} attempts")]
    BuildFailed { group: String, attempts: u32 },
}

/// A verified archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub strategy: &'static str,
    pub attempt: u32,
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Archive file stem per group key, unique within one output directory.
///
/// Keys are taken in iteration order; a key whose sanitised name is already
/// used (compared case-insensitively) gets `_2`, `_3`, ... appended.
pub fn unique_file_stems<'a, I>(keys: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut taken: HashSet<String> = HashSet::new();
    let mut stems = BTreeMap::new();
    for key in keys {
        let base = sanitize_name(key);
        let mut stem = base.clone();
        let mut n = 2;
        while !taken.insert(stem.to_lowercase()) {
            stem = format!("{base}_{n}");
            n += 1;
        }
        if stem != base {
            warn!(group = %key, archive_name = %stem, "Archive name already used by another group, renamed");
        }
        stems.insert(key.clone(), stem);
    }
    stems
}

fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// `Foo.7z` -> `Foo_retry2.7z` for `retry == 2`.
pub fn retry_path(original: &Path, retry: u32) -> PathBuf {
    with_stem_suffix(original, &format!("_retry{retry}"))
}

/// Make `path` writable: remove an existing file, or pick a timestamp-suffixed
/// sibling when the existing entry cannot be removed.
pub fn clear_target(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed existing archive");
            path.to_path_buf()
        }
        Err(e) => {
            let alternate = with_stem_suffix(path, &format!("_{}", chrono::Utc::now().timestamp()));
            warn!(
                error = ?e,
                path = %path.display(),
                alternate = %alternate.display(),
                "Could not remove existing archive, using alternate name"
            );
            alternate
        }
    }
}

fn discard(path: &Path) {
    if path.is_file() {
        if let Err(e) = fs::remove_file(path) {
            debug!(error = ?e, path = %path.display(), "Could not remove failed archive");
        }
    }
}

pub struct ArchiveBuilder {
    primary: Box<dyn ArchiveStrategy>,
    fallback: Box<dyn ArchiveStrategy>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ArchiveBuilder {
    pub fn new(primary: Box<dyn ArchiveStrategy>, fallback: Box<dyn ArchiveStrategy>) -> Self {
        Self {
            primary,
            fallback,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// External 7z as primary, built-in zip as fallback.
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(
            Box::new(SevenZipStrategy::for_host(config.seven_zip_binary.clone())),
            Box::new(ZipStrategy),
        )
        .with_max_attempts(config.max_attempts)
        .with_retry_delay(config.retry_delay())
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Path the first attempt writes with the primary strategy.
    pub fn canonical_path(&self, group_key: &str, output_dir: &Path) -> PathBuf {
        self.output_path(&sanitize_name(group_key), output_dir)
    }

    /// `<output_dir>/<file_stem>.<primary extension>`.
    pub fn output_path(&self, file_stem: &str, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{file_stem}.{}", self.primary.extension()))
    }

    /// Build and verify the archive for one group.
    pub fn try_build(
        &self,
        group_key: &str,
        items: &[Item],
        output_dir: &Path,
    ) -> Result<BuiltArchive, BuildError> {
        self.try_build_as(group_key, &sanitize_name(group_key), items, output_dir)
    }

    /// [`try_build`](Self::try_build) writing `<file_stem>.<ext>` instead of the
    /// sanitised group key.
    pub fn try_build_as(
        &self,
        group_key: &str,
        file_stem: &str,
        items: &[Item],
        output_dir: &Path,
    ) -> Result<BuiltArchive, BuildError> {
        fs::create_dir_all(output_dir).map_err(|source| BuildError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let canonical = self.output_path(file_stem, output_dir);
        let sources: Vec<PathBuf> = items.iter().map(|i| i.source_path.clone()).collect();

        for attempt in 1..=self.max_attempts {
            let base = if attempt == 1 {
                canonical.clone()
            } else {
                info!(
                    group = %group_key,
                    attempt,
                    max_attempts = self.max_attempts,
                    "Retrying archive creation"
                );
                retry_path(&canonical, attempt - 1)
            };

            let missing: Vec<PathBuf> = sources.iter().filter(|p| !p.exists()).cloned().collect();
            if !missing.is_empty() {
                error!(group = %group_key, ?missing, "Input files disappeared before archiving");
                return Err(BuildError::MissingItems {
                    group: group_key.to_string(),
                    missing,
                });
            }

            if let Some(built) = self.attempt(group_key, &sources, &base, attempt) {
                return Ok(built);
            }

            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }
        }

        Err(BuildError::BuildFailed {
            group: group_key.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn attempt(
        &self,
        group_key: &str,
        sources: &[PathBuf],
        base: &Path,
        attempt: u32,
    ) -> Option<BuiltArchive> {
        for (index, strategy) in [&self.primary, &self.fallback].into_iter().enumerate() {
            if index > 0 {
                warn!(group = %group_key, strategy = strategy.name(), "Falling back to secondary archive strategy");
            }
            let target = clear_target(&base.with_extension(strategy.extension()));

            if let Err(e) = strategy.create(sources, &target) {
                warn!(group = %group_key, strategy = strategy.name(), error = %e, "Archive creation failed");
                discard(&target);
                continue;
            }
            if let Err(e) = strategy.verify(&target) {
                warn!(group = %group_key, strategy = strategy.name(), error = %e, "Archive failed integrity check");
                discard(&target);
                continue;
            }

            match fs::metadata(&target) {
                Ok(meta) => {
                    info!(
                        group = %group_key,
                        archive = %target.display(),
                        size = meta.len(),
                        strategy = strategy.name(),
                        attempt,
                        "Archive built"
                    );
                    return Some(BuiltArchive {
                        path: target,
                        size_bytes: meta.len(),
                        strategy: strategy.name(),
                        attempt,
                    });
                }
                Err(e) => {
                    warn!(group = %group_key, error = ?e, archive = %target.display(), "Cannot stat archive");
                }
            }
        }
        None
    }

    /// Like [`try_build`](Self::try_build) but never fails: a failed build is
    /// logged and reported as `success == false` with zero size.
    pub fn build(&self, group_key: &str, items: &[Item], output_dir: &Path) -> ArchiveResult {
        self.build_as(group_key, &sanitize_name(group_key), items, output_dir)
    }

    pub fn build_as(
        &self,
        group_key: &str,
        file_stem: &str,
        items: &[Item],
        output_dir: &Path,
    ) -> ArchiveResult {
        match self.try_build_as(group_key, file_stem, items, output_dir) {
            Ok(built) => ArchiveResult {
                group_key: group_key.to_string(),
                archive_path: built.path,
                size_bytes: built.size_bytes,
                success: true,
            },
            Err(e) => {
                error!(group = %group_key, error = %e, "Archive build failed");
                ArchiveResult {
                    group_key: group_key.to_string(),
                    archive_path: self.output_path(file_stem, output_dir),
                    size_bytes: 0,
                    success: false,
                }
            }
        }
    }
}
