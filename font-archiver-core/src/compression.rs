//! Archive strategies.
//!
//! - [`SevenZipStrategy`] shells out to an external 7z binary (LZMA2, level
//!   chosen from host parallelism). Files are copied into a private staging
//!   directory first so the archive only ever sees bare file names.
//! - [`ZipStrategy`] is the built-in deflate fallback; it needs no external tool.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::contract::{ArchiveStrategy, StrategyError};

/// Upper bound for the 7z `-mx` level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Parallelism assumed when the host cannot report it.
pub const DEFAULT_PARALLELISM: usize = 4;

pub fn host_parallelism() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}

/// Compression level: one step per core, capped at [`MAX_COMPRESSION_LEVEL`].
pub fn compression_level(parallelism: Option<usize>) -> u32 {
    let cores = parallelism.unwrap_or(DEFAULT_PARALLELISM).max(1);
    u32::try_from(cores)
        .unwrap_or(MAX_COMPRESSION_LEVEL)
        .min(MAX_COMPRESSION_LEVEL)
}

fn file_name_of(path: &Path) -> Result<String, StrategyError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            StrategyError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            ))
        })
}

/// External 7z tool, LZMA2 method.
#[derive(Debug, Clone)]
pub struct SevenZipStrategy {
    binary: String,
    level: u32,
}

impl SevenZipStrategy {
    pub fn new(binary: impl Into<String>, level: u32) -> Self {
        Self {
            binary: binary.into(),
            level: level.min(MAX_COMPRESSION_LEVEL),
        }
    }

    /// Level derived from this host's parallelism.
    pub fn for_host(binary: impl Into<String>) -> Self {
        Self::new(binary, compression_level(host_parallelism()))
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn run(&self, command: &mut Command) -> Result<std::process::Output, StrategyError> {
        command.output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StrategyError::ToolMissing {
                    tool: self.binary.clone(),
                }
            } else {
                StrategyError::Io(e)
            }
        })
    }
}

impl ArchiveStrategy for SevenZipStrategy {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn extension(&self) -> &'static str {
        "7z"
    }

    fn create(&self, items: &[PathBuf], target: &Path) -> Result<(), StrategyError> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let target = fs::canonicalize(&parent)?.join(file_name_of(target)?);

        let staging = tempfile::Builder::new()
            .prefix(&format!(
                "temp_{stem}_{}_",
                chrono::Utc::now().timestamp_millis()
            ))
            .tempdir_in(&parent)?;

        let mut names = Vec::with_capacity(items.len());
        for item in items {
            let name = file_name_of(item)?;
            fs::copy(item, staging.path().join(&name))?;
            names.push(name);
        }
        debug!(staging = %staging.path().display(), files = names.len(), "Prepared 7z staging copy");

        let output = self.run(
            Command::new(&self.binary)
                .arg("a")
                .arg("-t7z")
                .arg(format!("-mx={}", self.level))
                .arg("-m0=lzma2")
                .arg("-y")
                .arg(&target)
                .args(&names)
                .current_dir(staging.path()),
        )?;

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(error = ?e, path = %staging_path.display(), "Failed to remove 7z staging directory");
        }

        if !output.status.success() {
            return Err(StrategyError::ToolFailed {
                tool: self.binary.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(
            archive = %target.display(),
            level = self.level,
            "Created 7z archive"
        );
        Ok(())
    }

    fn verify(&self, target: &Path) -> Result<(), StrategyError> {
        if !target.exists() {
            return Err(StrategyError::Integrity {
                path: target.to_path_buf(),
                reason: "archive was not created".to_string(),
            });
        }
        let output = self.run(Command::new(&self.binary).arg("t").arg(target))?;
        if !output.status.success() {
            return Err(StrategyError::Integrity {
                path: target.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Built-in deflate zip writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipStrategy;

impl ArchiveStrategy for ZipStrategy {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn extension(&self) -> &'static str {
        "zip"
    }

    fn create(&self, items: &[PathBuf], target: &Path) -> Result<(), StrategyError> {
        let mut writer = ZipWriter::new(File::create(target)?);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for item in items {
            let name = file_name_of(item)?;
            writer.start_file(name.as_str(), options)?;
            let mut source = File::open(item)?;
            io::copy(&mut source, &mut writer)?;
        }
        writer.finish()?;
        info!(archive = %target.display(), files = items.len(), "Created zip archive");
        Ok(())
    }

    fn verify(&self, target: &Path) -> Result<(), StrategyError> {
        let integrity = |reason: String| StrategyError::Integrity {
            path: target.to_path_buf(),
            reason,
        };

        let mut archive = ZipArchive::new(File::open(target)?)
            .map_err(|e| integrity(format!("cannot open archive: {e}")))?;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| integrity(format!("entry {index}: {e}")))?;
            // Reading to the end checks the entry's CRC32.
            io::copy(&mut entry, &mut io::sink())
                .map_err(|e| integrity(format!("entry {}: {e}", entry.name())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_follows_parallelism_and_is_capped() {
        assert_eq!(compression_level(Some(2)), 2);
        assert_eq!(compression_level(Some(64)), MAX_COMPRESSION_LEVEL);
        assert_eq!(compression_level(None), 4);
        assert_eq!(compression_level(Some(0)), 1);
    }

    #[test]
    fn zip_round_trip_passes_verification() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("Foo-Bold.ttf");
        let b = dir.path().join("Foo-Italic.ttf");
        fs::write(&a, b"bold glyphs").unwrap();
        fs::write(&b, b"italic glyphs").unwrap();
        let target = dir.path().join("Foo.zip");

        ZipStrategy.create(&[a, b], &target).unwrap();
        ZipStrategy.verify(&target).unwrap();

        let archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["Foo-Bold.ttf", "Foo-Italic.ttf"]);
    }

    #[test]
    fn zip_verify_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("broken.zip");
        fs::write(&target, b"definitely not a zip").unwrap();
        assert!(matches!(
            ZipStrategy.verify(&target),
            Err(StrategyError::Integrity { .. })
        ));
    }

    #[test]
    fn missing_seven_zip_binary_is_reported_as_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("Bar.ttf");
        fs::write(&font, b"glyphs").unwrap();
        let strategy = SevenZipStrategy::new("font-archiver-no-such-7z", 5);
        let err = strategy
            .create(&[font], &dir.path().join("Bar.7z"))
            .unwrap_err();
        assert!(matches!(err, StrategyError::ToolMissing { .. }), "{err:?}");
    }
}
