//! Config subcommand handlers.

use std::io::IsTerminal;
use std::path::PathBuf;

use dialoguer::Input;
use stackyard_config::ConfigError;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

use super::util;

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// The file as TOML, followed by the directories it resolves to.
fn format_config(cfg: &Config) -> Result<String, CliError> {
    use std::fmt::Write;

    let mut out = toml::to_string_pretty(cfg).map_err(ConfigError::from)?;
    let _ = writeln!(out);
    for (key, resolved) in [("base_dir", cfg.base_dir()), ("sites_root", cfg.sites_root())] {
        let shown = resolved.map_or_else(|e| format!("unresolved ({e})"), |p| p.display().to_string());
        let _ = writeln!(out, "# effective {key}: {shown}");
    }
    Ok(out.trim_end().to_owned())
}

fn prompt_settings(mut cfg: Config) -> Result<Config, CliError> {
    let sites_root = cfg.sites_root()?;
    let sites_root: String = Input::new()
        .with_prompt("Directory for site content")
        .default(sites_root.display().to_string())
        .interact_text()
        .map_err(prompt_err)?;
    cfg.sites_root = Some(PathBuf::from(sites_root));

    cfg.http_port = Input::new()
        .with_prompt("Proxy HTTP port")
        .default(cfg.http_port)
        .interact_text()
        .map_err(prompt_err)?;
    Ok(cfg)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let text = format_config(&cfg)?;
            let out = output::render_single(&global.output, &cfg, |_| text.clone(), |_| {
                config::active_path(global).display().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config::active_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let cfg = if global.yes || !std::io::stdin().is_terminal() {
                Config::default()
            } else {
                prompt_settings(Config::default())?
            };
            config::save_config_to(&cfg, &path)?;
            util::note(
                global.quiet,
                &format!("Configuration written to {}", path.display()),
            );
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::active_path(global).display());
            Ok(())
        }
    }
}
