//! Yes/no confirmations. The only place the program reads from the terminal.

use anyhow::Result;
use console::{style, Term};
use tracing::info;

/// Ask `question`. `assume_yes` answers yes without asking. Without an
/// interactive terminal the answer is no.
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        info!(question, "Confirmed by --yes");
        return Ok(true);
    }

    let term = Term::stderr();
    if !term.is_term() {
        info!(question, "No terminal to ask, treating as declined");
        return Ok(false);
    }

    term.write_str(&format!("{} {question} [y/N] ", style("?").yellow().bold()))?;
    let answer = term.read_line()?;
    let accepted = answer.trim().eq_ignore_ascii_case("y") || answer.trim().eq_ignore_ascii_case("yes");
    info!(question, accepted, "User answered");
    Ok(accepted)
}
