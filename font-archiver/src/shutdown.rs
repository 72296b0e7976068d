use console::Term;
use font_archiver_core::orchestrator::CancelFlag;

/// Exit status for a forced quit (128 + SIGINT).
pub const FORCE_QUIT_STATUS: i32 = 130;

/// Install the Ctrl+C handler: the first press raises `cancel`, the second exits.
pub fn setup_shutdown_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stderr().is_term();
        if is_tty {
            eprintln!("\n\nInterrupt received, finishing archives already in progress...");
            eprintln!("Press Ctrl+C again to force quit.");
        }
        tracing::warn!("Interrupt received, no new archive tasks will be awaited");
        cancel.cancel();

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to wait for second Ctrl+C");
            return;
        }
        if is_tty {
            eprintln!("Force quit!");
        }
        std::process::exit(FORCE_QUIT_STATUS);
    });
}
