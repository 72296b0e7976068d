/// `load_config` module: loads the static YAML pipeline config and resolves the
/// API token from the environment.
///
/// This module is the only place where untrusted YAML is parsed. Secrets never
/// come from YAML: the token is read from `GITHUB_TOKEN` (a `.env` file is
/// honoured by `main`) or, failing that, from the file named by
/// `remote.token_file`.
///
/// # Errors
/// All errors use `anyhow::Error` with context and surface at the CLI boundary.
use anyhow::{bail, Context, Result};
use font_archiver_core::config::{PipelineConfig, RemoteConfig};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Loads a YAML config file into a [`PipelineConfig`], filling in defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let config: PipelineConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    if config.discovery.sources.is_empty() {
        bail!("Config {:?} lists no discovery sources", path_ref);
    }
    config.trace_loaded();
    Ok(config)
}

/// Token from `GITHUB_TOKEN`, else from `remote.token_file`.
pub fn resolve_token(remote: &RemoteConfig) -> Result<String> {
    if let Ok(token) = env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            info!(source = TOKEN_ENV, "GitHub token loaded from environment");
            return Ok(token);
        }
    }

    let Some(token_file) = remote.token_file.as_deref() else {
        bail!("No GitHub token: set {TOKEN_ENV} or configure remote.token_file");
    };
    let token = fs::read_to_string(token_file)
        .with_context(|| format!("Failed to read token file {}", token_file.display()))?
        .trim()
        .to_string();
    if token.is_empty() {
        bail!("Token file {} is empty", token_file.display());
    }
    info!(source = %token_file.display(), "GitHub token loaded from file");
    Ok(token)
}
