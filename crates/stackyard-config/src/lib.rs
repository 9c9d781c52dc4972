//! Configuration for the `stackyard` CLI.
//!
//! One TOML file plus `STACKYARD_*` environment overrides, translated into
//! `stackyard_core::EngineConfig`. The engine itself never reads files;
//! everything on disk is resolved here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stackyard_core::{ContentSource, EngineConfig, ImageSet, VersionDefaults};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("could not determine a {what} directory for this user")]
    NoHome { what: &'static str },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Name prefix for every container, network and volume stackyard owns.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Rendered configs and the site registry. Platform data dir if unset.
    pub base_dir: Option<PathBuf>,

    /// Parent of each site's content directory. `~/stackyard-sites` if unset.
    pub sites_root: Option<PathBuf>,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Host port the shared proxy publishes.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Seed empty content directories on first start.
    #[serde(default)]
    pub bootstrap_content: bool,

    /// Bundle used for seeding: an http(s) URL or a local `.tar.gz` path.
    #[serde(default = "default_bootstrap_url")]
    pub bootstrap_url: String,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub versions: Versions,

    #[serde(default)]
    pub images: Images,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            base_dir: None,
            sites_root: None,
            stop_grace_secs: default_stop_grace(),
            http_port: default_http_port(),
            bootstrap_content: false,
            bootstrap_url: default_bootstrap_url(),
            defaults: Defaults::default(),
            versions: Versions::default(),
            images: Images::default(),
        }
    }
}

fn default_prefix() -> String {
    "stackyard".into()
}
fn default_stop_grace() -> u64 {
    10
}
fn default_http_port() -> u16 {
    80
}
fn default_bootstrap_url() -> String {
    "https://wordpress.org/latest.tar.gz".into()
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// Version pins for sites that don't choose their own.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Versions {
    pub php: String,
    pub database: String,
    pub cache: String,
}

impl Default for Versions {
    fn default() -> Self {
        let v = VersionDefaults::default();
        Self {
            php: v.php,
            database: v.database,
            cache: v.cache,
        }
    }
}

/// Image overrides. Unset entries keep the built-in image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Images {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbadmin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<String>,
    /// Repository for the app role; the site's PHP version is the tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_repo: Option<String>,
}

impl Images {
    fn apply(&self, set: &mut ImageSet) {
        let pairs = [
            (&self.proxy, &mut set.proxy),
            (&self.mail, &mut set.mail),
            (&self.dbadmin, &mut set.dbadmin),
            (&self.web, &mut set.web),
            (&self.app_repo, &mut set.app_repo),
            (&self.database_repo, &mut set.database_repo),
            (&self.cache_repo, &mut set.cache_repo),
        ];
        for (over, slot) in pairs {
            if let Some(image) = over {
                slot.clone_from(image);
            }
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "stackyard", "stackyard")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("stackyard");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `STACKYARD_*` variables.
/// Nested keys use a double underscore: `STACKYARD_VERSIONS__PHP=8.2`.
fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STACKYARD_").split("__"))
}

/// Load the config from the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from an explicit path. A missing file yields defaults
/// (plus any environment overrides).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Saving ──────────────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    cfg.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix_ok = !self.prefix.is_empty()
            && self.prefix.starts_with(|c: char| c.is_ascii_lowercase())
            && self
                .prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !prefix_ok {
            return Err(ConfigError::Validation {
                field: "prefix".into(),
                reason: format!(
                    "'{}' must start with a letter and use only a-z, 0-9 and '-'",
                    self.prefix
                ),
            });
        }
        if self.http_port == 0 {
            return Err(ConfigError::Validation {
                field: "http_port".into(),
                reason: "must be between 1 and 65535".into(),
            });
        }
        if self.bootstrap_content && self.bootstrap_url.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "bootstrap_url".into(),
                reason: "required when bootstrap_content is enabled".into(),
            });
        }
        Ok(())
    }

    /// Effective base directory.
    pub fn base_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.base_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .ok_or(ConfigError::NoHome { what: "data" })
    }

    /// Effective parent directory for site content.
    pub fn sites_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.sites_root {
            return Ok(dir.clone());
        }
        BaseDirs::new()
            .map(|d| d.home_dir().join("stackyard-sites"))
            .ok_or(ConfigError::NoHome { what: "home" })
    }

    /// Build the engine configuration this file describes.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;
        let mut engine =
            EngineConfig::new(self.base_dir()?, self.sites_root()?).with_prefix(&self.prefix);
        engine.stop_grace = Duration::from_secs(self.stop_grace_secs);
        engine.http_port = self.http_port;
        engine.defaults = VersionDefaults {
            php: self.versions.php.clone(),
            database: self.versions.database.clone(),
            cache: self.versions.cache.clone(),
        };
        self.images.apply(&mut engine.images);
        if self.bootstrap_content {
            engine = engine.with_content_source(ContentSource::parse(self.bootstrap_url.trim()));
        }
        Ok(engine)
    }
}
