//! Clap derive structures for the `stackyard` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.
//! Only clap and std are used here so `build.rs` can include this file
//! to render man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// stackyard -- local multi-container development sites
#[derive(Debug, Parser)]
#[command(
    name = "stackyard",
    version,
    about = "Run local development sites as container stacks behind one proxy",
    long_about = "Provisions an isolated web + app + database + cache stack per site\n\
        and keeps a shared nginx proxy routing <slug>.localhost to every\n\
        running site.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the default location
    #[arg(long, env = "STACKYARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "STACKYARD_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Purge leftovers, reset site flags and start shared services
    Init,

    /// Manage sites
    #[command(alias = "s")]
    Sites(SitesArgs),

    /// Mark every site stopped without touching containers
    Reconcile,

    /// Remove all stackyard containers and networks (data is kept)
    Shutdown,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Sites ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SitesArgs {
    #[command(subcommand)]
    pub command: SitesCommand,
}

/// Stack version pins shared by `create` and `edit`.
#[derive(Debug, Args)]
pub struct VersionArgs {
    /// PHP version (app image tag)
    #[arg(long)]
    pub php: Option<String>,

    /// Database server version
    #[arg(long)]
    pub database: Option<String>,

    /// Cache server version
    #[arg(long)]
    pub cache: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SitesCommand {
    /// List all sites
    #[command(alias = "ls")]
    List,

    /// Show one site
    Show {
        /// Site id, slug or name
        site: String,
    },

    /// Create a site (stopped)
    Create {
        /// Display name; the slug and domain are derived from it
        name: String,

        /// Content directory (defaults to <sites_root>/<slug>)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Served subdirectory of the content directory
        #[arg(long)]
        public_dir: Option<String>,

        #[command(flatten)]
        versions: VersionArgs,

        /// Start the site right away
        #[arg(long)]
        start: bool,
    },

    /// Edit a site's name, served directory or versions
    Edit {
        /// Site id, slug or name
        site: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// Served subdirectory of the content directory
        #[arg(long)]
        public_dir: Option<String>,

        #[command(flatten)]
        versions: VersionArgs,
    },

    /// Start a site's stack and route its domain
    Start {
        /// Site id, slug or name
        site: String,
    },

    /// Stop a site's stack (data is kept)
    Stop {
        /// Site id, slug or name
        site: String,
    },

    /// Delete a site
    #[command(alias = "rm")]
    Delete {
        /// Site id, slug or name
        site: String,

        /// Also remove the database volume and the content directory
        #[arg(long)]
        destroy_data: bool,
    },

    /// Export database and content to a .tar.gz archive
    Export {
        /// Site id, slug or name
        site: String,

        /// Archive path (defaults to ./<slug>-<timestamp>.tar.gz)
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
    },

    /// Show recent log lines of one stack container
    Logs {
        /// Site id, slug or name
        site: String,

        /// Container role
        #[arg(long, short = 'r', default_value = "web")]
        role: RoleArg,

        /// Number of lines
        #[arg(long, short = 'n', default_value = "100")]
        lines: usize,
    },

    /// Run a command in the app container (e.g. `wp plugin list`)
    Exec {
        /// Site id, slug or name
        site: String,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Web,
    App,
    Database,
    Cache,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
