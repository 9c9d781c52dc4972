//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use stackyard_config::ConfigError;
use stackyard_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Container runtime is not reachable")]
    #[diagnostic(
        code(stackyard::runtime_unavailable),
        help(
            "Start Docker (or point DOCKER_HOST at a running daemon) and retry.\n\
             Reason: {reason}"
        )
    )]
    RuntimeUnavailable { reason: String },

    #[error("Runtime request failed: {message}")]
    #[diagnostic(code(stackyard::runtime))]
    Runtime { message: String },

    #[error("Could not pull image {image}")]
    #[diagnostic(
        code(stackyard::image_pull),
        help("Check the image name in your config and your network connection.\n{message}")
    )]
    ImagePull { image: String, message: String },

    // ── Sites ────────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(stackyard::not_found),
        help("Run: stackyard {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{resource_type} '{identifier}' already exists")]
    #[diagnostic(
        code(stackyard::conflict),
        help("Pick a different name; the slug is derived from it.")
    )]
    Conflict {
        resource_type: String,
        identifier: String,
    },

    #[error("{resource_type} '{identifier}' is still in use")]
    #[diagnostic(
        code(stackyard::in_use),
        help("Stop or remove whatever still uses it, then retry.")
    )]
    InUse {
        resource_type: String,
        identifier: String,
    },

    #[error("Site '{slug}' is {state}; {action} is not allowed")]
    #[diagnostic(code(stackyard::invalid_state), help("{hint}"))]
    InvalidState {
        slug: String,
        state: String,
        action: String,
        hint: String,
    },

    // ── Proxy / exec ─────────────────────────────────────────────────
    #[error("The proxy rejected the new routing configuration; previous routing kept")]
    #[diagnostic(code(stackyard::proxy_rejected), help("nginx said:\n{output}"))]
    ProxyRejected { output: String },

    #[error("`{command}` exited with code {exit_code}")]
    #[diagnostic(code(stackyard::command_failed), help("{output}"))]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("Could not download {url}")]
    #[diagnostic(
        code(stackyard::download),
        help("Check bootstrap_url in your config.\n{message}")
    )]
    Download { url: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(stackyard::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(stackyard::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(stackyard::config),
        help("Inspect the file with: stackyard config show")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(stackyard::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Everything else ──────────────────────────────────────────────
    #[error("Interrupted")]
    #[diagnostic(code(stackyard::cancelled))]
    Cancelled,

    #[error("{message}")]
    #[diagnostic(code(stackyard::internal))]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {message}")]
    #[diagnostic(code(stackyard::output))]
    Output { message: String },
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RuntimeUnavailable { .. } | Self::Download { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::InUse { .. } | Self::InvalidState { .. } => {
                exit_code::CONFLICT
            }
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Cancelled => exit_code::CANCELLED,
            _ => exit_code::GENERAL,
        }
    }

    fn site_not_found(identifier: String) -> Self {
        Self::NotFound {
            resource_type: "site".into(),
            identifier,
            list_command: "sites list".into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RuntimeUnavailable { reason } => CliError::RuntimeUnavailable { reason },

            CoreError::Runtime { status, message } => CliError::Runtime {
                message: format!("HTTP {status}: {message}"),
            },
            CoreError::NotFound { kind, name } => CliError::Runtime {
                message: format!("{kind} '{name}' disappeared"),
            },
            CoreError::Conflict { kind, name } => CliError::Conflict {
                resource_type: kind,
                identifier: name,
            },
            CoreError::InUse { kind, name } => CliError::InUse {
                resource_type: kind,
                identifier: name,
            },
            CoreError::ImagePull { image, message } => CliError::ImagePull { image, message },

            CoreError::SiteNotFound { identifier } => CliError::site_not_found(identifier),
            CoreError::SlugCollision { slug } => CliError::Conflict {
                resource_type: "site".into(),
                identifier: slug,
            },
            CoreError::InvalidState {
                slug,
                state,
                action,
            } => {
                let hint = if state == "started" {
                    format!("Stop it first: stackyard sites stop {slug}")
                } else {
                    format!("Start it first: stackyard sites start {slug}")
                };
                CliError::InvalidState {
                    slug,
                    state,
                    action,
                    hint,
                }
            }

            CoreError::ConfigValidationFailed { output } => CliError::ProxyRejected { output },
            CoreError::ExecFailed {
                command,
                exit_code,
                output,
                ..
            } => CliError::CommandFailed {
                command,
                exit_code,
                output,
            },
            CoreError::Download { url, message } => CliError::Download { url, message },

            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Cancelled => CliError::Cancelled,

            CoreError::Io { path, source } => CliError::Internal {
                message: format!("{}: {source}", path.display()),
            },
            CoreError::Registry { message }
            | CoreError::Archive { message }
            | CoreError::Internal(message) => CliError::Internal { message },
        }
    }
}
