//! CLI configuration: thin wrapper around `stackyard_config` that honors
//! the `--config` flag.

use std::path::PathBuf;

pub use stackyard_config::{Config, save_config_to};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file in effect: `--config` / `STACKYARD_CONFIG`, else the
/// platform default.
pub fn active_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(stackyard_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(stackyard_config::load_config_from(&active_path(global))?)
}
