use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const MIB: u64 = 1024 * 1024;

/// Files at or above this size go through the staged bulk-transfer path.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 70 * MIB;

/// Aggregate transfer size above which the size advisory gate fires.
pub const DEFAULT_TRANSFER_WARNING_BYTES: u64 = 1000 * MIB;

/// Stock operating-system families excluded when no exclusions are configured.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "Arial",
    "Calibri",
    "Cambria",
    "Candara",
    "Comic Sans MS",
    "Consolas",
    "Constantia",
    "Corbel",
    "Courier New",
    "Ebrima",
    "Franklin Gothic",
    "Gabriola",
    "Gadugi",
    "Georgia",
    "Impact",
    "Javanese Text",
    "Leelawadee UI",
    "Lucida Console",
    "Lucida Sans Unicode",
    "Malgun Gothic",
    "Microsoft Sans Serif",
    "MingLiU",
    "MS Gothic",
    "MS PGothic",
    "MS UI Gothic",
    "MV Boli",
    "Myanmar Text",
    "Nirmala UI",
    "Palatino Linotype",
    "Segoe MDL2 Assets",
    "Segoe Print",
    "Segoe Script",
    "Segoe UI",
    "SimSun",
    "Sitka",
    "Sylfaen",
    "Symbol",
    "Tahoma",
    "Times New Roman",
    "Trebuchet MS",
    "Verdana",
    "Webdings",
    "Wingdings",
    "Yu Gothic",
];

/// Full pipeline configuration as read from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            sources = self.discovery.sources.len(),
            exclusions = self.discovery.exclusions.len(),
            repo = %self.remote.repo_name,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Source directories in priority order; the first source wins on identity collisions.
    pub sources: Vec<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Case-insensitive substrings; a group whose key contains one is dropped.
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
    /// Keep only the first N groups in alphabetical key order, not in the order
    /// sources were scanned. The dropped keys are reported as `limited`.
    #[serde(default)]
    pub max_groups: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Where archives are written; defaults to `archives/` in the run directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_seven_zip")]
    pub seven_zip_binary: String,
    /// Worker count; defaults to host parallelism.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            seven_zip_binary: default_seven_zip(),
            concurrency: None,
        }
    }
}

impl ArchiveConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_repo_name")]
    pub repo_name: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,
    #[serde(default = "default_transfer_warning_bytes")]
    pub transfer_warning_bytes: u64,
    #[serde(default = "default_deletion_grace_secs")]
    pub deletion_grace_secs: u64,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Use the local VCS + LFS path when the tools are installed.
    #[serde(default = "default_true")]
    pub use_vcs: bool,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    /// Optional `.gitignore` copied into the staging root.
    #[serde(default)]
    pub gitignore: Option<PathBuf>,
    /// File holding the API token, read when `GITHUB_TOKEN` is unset.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            repo_name: default_repo_name(),
            description: default_description(),
            private: false,
            large_file_threshold: default_large_file_threshold(),
            transfer_warning_bytes: default_transfer_warning_bytes(),
            deletion_grace_secs: default_deletion_grace_secs(),
            branch: default_branch(),
            use_vcs: true,
            commit_message: default_commit_message(),
            gitignore: None,
            token_file: None,
        }
    }
}

impl RemoteConfig {
    pub fn deletion_grace(&self) -> Duration {
        Duration::from_secs(self.deletion_grace_secs)
    }
}

fn default_extensions() -> Vec<String> {
    vec!["ttf".to_string(), "otf".to_string()]
}

fn default_exclusions() -> Vec<String> {
    DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_seven_zip() -> String {
    "7z".to_string()
}

fn default_repo_name() -> String {
    "Font-Storage".to_string()
}

fn default_description() -> String {
    "Collection of fonts organized by family".to_string()
}

fn default_large_file_threshold() -> u64 {
    DEFAULT_LARGE_FILE_THRESHOLD
}

fn default_transfer_warning_bytes() -> u64 {
    DEFAULT_TRANSFER_WARNING_BYTES
}

fn default_deletion_grace_secs() -> u64 {
    2
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_commit_message() -> String {
    "Add font archives".to_string()
}
