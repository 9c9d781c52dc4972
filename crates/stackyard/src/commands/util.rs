//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use stackyard_core::{Orchestrator, Role, Site};

use crate::cli::RoleArg;
use crate::error::CliError;

/// Resolve a site by id, slug or name.
pub async fn resolve_site(orchestrator: &Orchestrator, identifier: &str) -> Result<Site, CliError> {
    Ok(orchestrator.find_site(identifier).await?)
}

pub fn role(arg: RoleArg) -> Role {
    match arg {
        RoleArg::Web => Role::Web,
        RoleArg::App => Role::App,
        RoleArg::Database => Role::Database,
        RoleArg::Cache => Role::Cache,
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Spinner on stderr for slow engine calls. Hidden in quiet mode and
/// when stderr is not a terminal.
pub fn spinner(message: impl Into<String>, quiet: bool) -> ProgressBar {
    if quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Print a status line on stderr unless quiet.
pub fn note(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{message}");
    }
}
