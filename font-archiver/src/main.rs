use anyhow::{Context, Result};
use clap::Parser;
use font_archiver::cli::{run, Cli};
use font_archiver_core::staging::create_run_dir;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "font-archiver.log";

/// Logs go to stderr and to a file in the run directory.
fn init_tracing(run_dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::never(run_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let run_dir = create_run_dir(None).context("Failed to create the run directory")?;
    let _guard = init_tracing(&run_dir);
    tracing::info!(run_dir = %run_dir.display(), "font-archiver starting");

    let result = run(cli, run_dir).await;
    match &result {
        Ok(_) => tracing::info!("Run completed successfully"),
        Err(e) => tracing::error!(error = %e, "Run exited with error"),
    }
    result
}
