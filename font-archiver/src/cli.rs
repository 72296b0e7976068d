///
/// This module implements the CLI interface for font-archiver: command parsing,
/// the interactive decisions the core refuses to make, and the user-visible
/// summary.
///
/// All pipeline logic (discovery, archiving, staging, repository lifecycle and
/// sync) lives in [`font-archiver-core`]. This module wires it together, asks
/// the questions, and passes the answers down.
///
/// ## Commands
/// - `archive`: discover and build archives, no remote interaction.
/// - `sync`: `archive`, then stage, check preconditions, ensure the repository
///   and publish.
///
/// ## How To Use
/// - For command-line users: `font-archiver --help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`]
///   and a run directory.
///
/// [`font-archiver-core`]: ../../font-archiver-core/
use crate::load_config::{load_config, resolve_token};
use crate::progress::LoggingReporter;
use crate::prompt::confirm;
use crate::shutdown::setup_shutdown_handler;
use crate::upload::{repo_web_url, GitHubClient};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use font_archiver_core::archive::ArchiveBuilder;
use font_archiver_core::config::{PipelineConfig, MIB};
use font_archiver_core::contract::{Classifier, FileNameOnly, RepoHandle};
use font_archiver_core::discovery::discover;
use font_archiver_core::lifecycle::{
    assess_preconditions, ensure_repo, find_repo, new_repository, AdvisoryGate, ExistingRepoPolicy,
    GateDecisions,
};
use font_archiver_core::orchestrator::{run_all, ArchiveRun, CancelFlag};
use font_archiver_core::staging::{prepare, StagingOptions};
use font_archiver_core::synchronise::{publish, verify_published, PublishOptions, PublishOutcome};
use font_archiver_core::vcs::GitCli;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the directory under the run directory that archives are written to.
pub const ARCHIVE_DIR: &str = "archives";

/// CLI for font-archiver: archive font families and publish them to GitHub.
#[derive(Parser)]
#[clap(
    name = "font-archiver",
    version,
    about = "Archive installed font families and publish them to a GitHub repository"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover font families and build one archive per family
    Archive {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(flatten)]
        run: RunArgs,
    },
    /// Archive, then publish the archives to the remote repository
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(flatten)]
        run: RunArgs,
        /// Append to an existing repository instead of asking
        #[clap(long, conflicts_with = "replace")]
        append: bool,
        /// Delete and recreate an existing repository instead of asking
        #[clap(long)]
        replace: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Write archives here instead of the run directory
    #[clap(long)]
    pub output_dir: Option<PathBuf>,
    /// Number of archives built in parallel
    #[clap(long)]
    pub concurrency: Option<usize>,
    /// Answer yes to every confirmation
    #[clap(long, short = 'y')]
    pub yes: bool,
    /// Keep the run directory after the run
    #[clap(long)]
    pub keep_temp: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.output_dir {
            config.archive.output_dir = Some(dir.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.archive.concurrency = Some(concurrency);
        }
    }
}

fn megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / MIB as f64)
}

struct Archived {
    run: ArchiveRun,
    items: usize,
}

/// Discovery and the parallel archive build.
async fn build_archives(
    config: &PipelineConfig,
    classifier: &dyn Classifier,
    run_dir: &Path,
    cancel: &CancelFlag,
) -> Result<Archived> {
    let reporter = LoggingReporter::new().into_callback();
    let report = discover(&config.discovery, classifier, Some(&reporter));
    if report.groups.is_empty() {
        bail!("No font families found outside the exclusion list");
    }
    let items = report.item_count();
    println!(
        "Found {} fonts in {} families ({} excluded, {} duplicates).",
        items,
        report.groups.len(),
        report.excluded.len(),
        report.duplicates.len()
    );

    let output_dir = config
        .archive
        .output_dir
        .clone()
        .unwrap_or_else(|| run_dir.join(ARCHIVE_DIR));
    let builder = Arc::new(ArchiveBuilder::from_config(&config.archive));
    let run = run_all(
        builder,
        report.groups,
        &output_dir,
        config.archive.concurrency,
        cancel,
        Some(&reporter),
    )
    .await;

    println!(
        "Created {} archives ({} failed), total size {}.",
        run.successes().count(),
        run.failures().count(),
        megabytes(run.total_size_bytes)
    );
    for failed in run.failures() {
        println!("  {} {}", style("failed:").red(), failed.group_key);
    }
    if run.cancelled {
        println!(
            "{} Interrupted: {} families were not archived. Completed archives are in {}",
            style("!").yellow().bold(),
            run.not_awaited,
            output_dir.display()
        );
    }
    Ok(Archived { run, items })
}

fn existing_repo_policy(append: bool, replace: bool, yes: bool, handle: &RepoHandle) -> Result<ExistingRepoPolicy> {
    if append {
        return Ok(ExistingRepoPolicy::Append);
    }
    if replace {
        return Ok(ExistingRepoPolicy::Replace);
    }
    // --yes never picks the destructive answer.
    if yes {
        return Ok(ExistingRepoPolicy::Append);
    }
    let fresh = confirm(
        &format!("Repository '{handle}' already exists. Delete it and start fresh?"),
        false,
    )?;
    Ok(if fresh {
        ExistingRepoPolicy::Replace
    } else {
        ExistingRepoPolicy::Append
    })
}

fn gate_decisions(gates: &[AdvisoryGate], yes: bool) -> Result<GateDecisions> {
    let mut decisions = GateDecisions::default();
    for gate in gates {
        println!("{} {}", style("Warning:").yellow().bold(), gate);
        let accepted = confirm("Do you want to continue?", yes)?;
        match gate {
            AdvisoryGate::StorageClass { .. } => decisions.accept_storage_class = accepted,
            AdvisoryGate::LargeTransfer { .. } => decisions.accept_large_transfer = accepted,
        }
    }
    Ok(decisions)
}

async fn sync(
    config: &PipelineConfig,
    classifier: &dyn Classifier,
    run_dir: &Path,
    cancel: &CancelFlag,
    args: &RunArgs,
    append: bool,
    replace: bool,
) -> Result<()> {
    let token = resolve_token(&config.remote)?;
    let archived = build_archives(config, classifier, run_dir, cancel).await?;
    if archived.run.cancelled {
        bail!("Interrupted before publishing");
    }
    if archived.run.successes().count() == 0 {
        bail!("No archives were created");
    }
    if !confirm(
        "Proceed with creating the repository and uploading to GitHub?",
        args.yes,
    )? {
        println!("Nothing uploaded.");
        return Ok(());
    }

    let staging_root = run_dir.join(&config.remote.repo_name);
    let manifest = prepare(
        &staging_root,
        &archived.run.results,
        archived.items,
        &StagingOptions {
            gitignore: config.remote.gitignore.clone(),
        },
    )
    .context("Failed to prepare the staging directory")?;

    let client = GitHubClient::new(token);
    let preconditions = assess_preconditions(
        &client,
        manifest.total_bytes(),
        config.remote.transfer_warning_bytes,
    )
    .await?;
    gate_decisions(&preconditions.gates, args.yes)?.resolve(&preconditions.gates)?;

    let handle = RepoHandle::new(&preconditions.account.login, &config.remote.repo_name);
    let policy = match find_repo(&client, &handle).await? {
        Some(_) => existing_repo_policy(append, replace, args.yes, &handle)?,
        None => ExistingRepoPolicy::Append,
    };
    let ensured = ensure_repo(
        &client,
        &handle,
        &new_repository(&config.remote),
        policy,
        config.remote.deletion_grace(),
    )
    .await?;
    tracing::info!(repo = %handle, state = ?ensured.state, "Repository ready");

    let options = PublishOptions::from_config(&config.remote, client.remote_url(&handle));
    let vcs = GitCli::default().with_auth_header(client.git_auth_header());
    let reporter = LoggingReporter::new().into_callback();
    let report = publish(&manifest, &handle, &client, Some(&vcs), &options, Some(&reporter)).await;

    match verify_published(&client, &handle, &manifest).await {
        Ok(missing) if !missing.is_empty() => println!(
            "{} not visible remotely yet: {}",
            style("Note:").yellow(),
            missing.join(", ")
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not list the remote repository"),
    }

    let committed = report.committed().count();
    match report.outcome {
        PublishOutcome::Success => {
            println!(
                "\n{} Uploaded {} files. Repository: {}",
                style("Done.").green().bold(),
                committed,
                repo_web_url(&handle)
            );
            Ok(())
        }
        PublishOutcome::Partial => {
            println!(
                "\n{} Uploaded {} of {} files. Repository: {}",
                style("Partial.").yellow().bold(),
                committed,
                report.files.len(),
                repo_web_url(&handle)
            );
            for file in report.failed() {
                println!("  {} {}", style("failed:").red(), file.path);
            }
            bail!("Some files were not uploaded; staged files remain in {}", staging_root.display())
        }
        PublishOutcome::Failed => bail!(
            "Nothing was uploaded; staged files remain in {}",
            staging_root.display()
        ),
    }
}

/// Offer to delete the run directory after a successful run; keep it otherwise.
fn finish(run_dir: &Path, ok: bool, args: &RunArgs) -> Result<()> {
    if !ok || args.keep_temp {
        println!("Local files are kept in {}", run_dir.display());
        return Ok(());
    }
    if confirm(
        &format!("Delete the temporary directory {}?", run_dir.display()),
        args.yes,
    )? {
        match fs::remove_dir_all(run_dir) {
            Ok(()) => tracing::info!(path = %run_dir.display(), "Deleted run directory"),
            Err(e) => {
                tracing::warn!(error = ?e, path = %run_dir.display(), "Failed to delete run directory");
                println!("Could not delete {}: {e}", run_dir.display());
            }
        }
    } else {
        println!("Local files are kept in {}", run_dir.display());
    }
    Ok(())
}

async fn execute(
    cli: &Cli,
    args: &RunArgs,
    classifier: &dyn Classifier,
    run_dir: &Path,
    cancel: &CancelFlag,
) -> Result<()> {
    let (config_path, sync_flags) = match &cli.command {
        Commands::Archive { config, .. } => (config, None),
        Commands::Sync {
            config,
            append,
            replace,
            ..
        } => (config, Some((*append, *replace))),
    };
    let mut config = load_config(config_path)?;
    args.apply(&mut config);

    match sync_flags {
        None => {
            tracing::info!(command = "archive", "Starting archive run");
            let archived = build_archives(&config, classifier, run_dir, cancel).await?;
            if archived.run.cancelled {
                bail!("Interrupted");
            }
            Ok(())
        }
        Some((append, replace)) => {
            tracing::info!(command = "sync", "Starting sync run");
            sync(&config, classifier, run_dir, cancel, args, append, replace).await
        }
    }
}

/// Async CLI entrypoint for integration tests and main(). Items are grouped
/// by file name.
pub async fn run(cli: Cli, run_dir: PathBuf) -> Result<()> {
    run_with_classifier(cli, run_dir, &FileNameOnly).await
}

/// [`run`] with a caller-supplied [`Classifier`], e.g. one that reads the
/// family name from font metadata. Unclassifiable items still fall back to
/// their file name.
pub async fn run_with_classifier(
    cli: Cli,
    run_dir: PathBuf,
    classifier: &dyn Classifier,
) -> Result<()> {
    let cancel = CancelFlag::new();
    setup_shutdown_handler(cancel.clone());

    let args = match &cli.command {
        Commands::Archive { run, .. } | Commands::Sync { run, .. } => run.clone(),
    };
    let result = execute(&cli, &args, classifier, &run_dir, &cancel).await;

    // Archive runs never offer to delete: the log stays next to the archives.
    let cleanup_args = RunArgs {
        keep_temp: args.keep_temp || matches!(cli.command, Commands::Archive { .. }),
        ..args.clone()
    };
    finish(&run_dir, result.is_ok(), &cleanup_args)?;
    result
}
