//! `git` + `git lfs` implementation of [`VersionControl`].
//!
//! Credentials never reach the repository config: the remote is added without
//! them and the push receives an `http.extraHeader` on its command line only.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, Output};

use tracing::{debug, info, warn};

use crate::contract::{VcsError, VersionControl};

#[derive(Clone)]
pub struct GitCli {
    binary: String,
    auth_header: Option<String>,
}

impl fmt::Debug for GitCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCli")
            .field("binary", &self.binary)
            .field("auth_header", &self.auth_header.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            auth_header: None,
        }
    }

    /// HTTP header (`"Authorization: ..."`) sent with every push.
    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }

    fn output(&self, dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        Command::new(&self.binary)
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    VcsError::Unavailable {
                        tool: self.binary.clone(),
                    }
                } else {
                    VcsError::Io(e)
                }
            })
    }

    /// Run and require a zero exit status. `shown` replaces the argument list in
    /// errors and logs when the arguments may carry credentials.
    fn run_as(&self, dir: &Path, args: &[&str], shown: &str) -> Result<Output, VcsError> {
        let output = self.output(dir, args)?;
        if output.status.success() {
            debug!(dir = %dir.display(), command = %shown, "git command succeeded");
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(dir = %dir.display(), command = %shown, status = ?output.status, stderr = %stderr, "git command failed");
            Err(VcsError::CommandFailed {
                command: format!("{} {shown}", self.binary),
                status: output.status.to_string(),
                stderr,
            })
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        self.run_as(dir, args, &args.join(" "))
    }

    fn succeeds(&self, args: &[&str]) -> bool {
        matches!(
            Command::new(&self.binary).args(args).output(),
            Ok(output) if output.status.success()
        )
    }
}

impl VersionControl for GitCli {
    fn is_available(&self) -> bool {
        let git = self.succeeds(&["--version"]);
        let lfs = git && self.succeeds(&["lfs", "version"]);
        if !git {
            info!(tool = %self.binary, "git is not installed");
        } else if !lfs {
            info!(tool = %self.binary, "git lfs is not installed");
        }
        git && lfs
    }

    fn init(&self, dir: &Path) -> Result<(), VcsError> {
        self.run(dir, &["init"])?;
        info!(dir = %dir.display(), "Initialised local repository");
        Ok(())
    }

    fn lfs_install(&self, dir: &Path) -> Result<(), VcsError> {
        self.run(dir, &["lfs", "install", "--local"]).map(drop)
    }

    fn lfs_track(&self, dir: &Path, pattern: &str) -> Result<(), VcsError> {
        self.run(dir, &["lfs", "track", pattern]).map(drop)
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError> {
        let output = self.output(dir, &["branch", "--show-current"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(branch).filter(|b| !b.is_empty()))
    }

    fn create_branch(&self, dir: &Path, name: &str) -> Result<(), VcsError> {
        self.run(dir, &["checkout", "-B", name]).map(drop)
    }

    fn add(&self, dir: &Path, rel_path: &str) -> Result<(), VcsError> {
        self.run(dir, &["add", "--", rel_path]).map(drop)
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, VcsError> {
        let output = self.run(dir, &["status", "--porcelain"])?;
        Ok(!output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    fn commit(&self, dir: &Path, message: &str, allow_empty: bool) -> Result<(), VcsError> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(dir, &args)?;
        info!(dir = %dir.display(), allow_empty, "Committed");
        Ok(())
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError> {
        self.run(dir, &["remote", "add", name, url]).map(drop)
    }

    fn push(&self, dir: &Path, remote: &str, branch: &str, force: bool) -> Result<(), VcsError> {
        let mut push = vec!["push", "-u", remote, branch];
        if force {
            push.push("--force");
        }
        let shown = push.join(" ");
        let header = self
            .auth_header
            .as_ref()
            .map(|h| format!("http.extraHeader={h}"));
        let mut args = Vec::with_capacity(push.len() + 2);
        if let Some(header) = header.as_deref() {
            args.extend(["-c", header]);
        }
        args.extend(push);
        self.run_as(dir, &args, &shown)?;
        info!(dir = %dir.display(), remote, branch, force, "Pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git_installed() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let git = GitCli::new("font-archiver-no-such-git");
        assert!(!git.is_available());
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            git.init(dir.path()),
            Err(VcsError::Unavailable { .. })
        ));
    }

    #[test]
    fn credentials_never_land_in_the_repository_config() {
        if !git_installed() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::default().with_auth_header("Authorization: Basic SECRET123");
        git.init(dir.path()).unwrap();
        let unreachable = dir.path().join("no-such-remote.git");
        git.add_remote(dir.path(), "origin", &unreachable.to_string_lossy())
            .unwrap();
        let err = git.push(dir.path(), "origin", "main", false).unwrap_err();

        let config = fs::read_to_string(dir.path().join(".git").join("config")).unwrap();
        assert!(!config.contains("SECRET123"), "{config}");
        assert!(!err.to_string().contains("SECRET123"), "{err}");
        assert!(!format!("{git:?}").contains("SECRET123"));
    }
}
