// ── Core error types ──
//
// User-facing errors from stackyard-core. Consumers never see raw
// runtime status codes; the `From<stackyard_runtime::Error>` impl
// translates gateway failures into engine-level variants.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Runtime errors ───────────────────────────────────────────────
    #[error("Container runtime is not reachable: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("{kind} '{name}' already exists")]
    Conflict { kind: String, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' is still in use")]
    InUse { kind: String, name: String },

    #[error("Runtime rejected the request (HTTP {status}): {message}")]
    Runtime { status: u16, message: String },

    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    // ── Proxy / exec errors ──────────────────────────────────────────
    #[error("Proxy rejected the rendered configuration; routing left unchanged")]
    ConfigValidationFailed { output: String },

    #[error("Command `{command}` in {container} exited with code {exit_code}")]
    ExecFailed {
        container: String,
        command: String,
        exit_code: i64,
        output: String,
    },

    // ── Site errors ──────────────────────────────────────────────────
    #[error("Site not found: {identifier}")]
    SiteNotFound { identifier: String },

    #[error("A site with slug '{slug}' already exists")]
    SlugCollision { slug: String },

    #[error("Site '{slug}' is {state}; {action} is not allowed")]
    InvalidState {
        slug: String,
        state: String,
        action: String,
    },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Storage errors ───────────────────────────────────────────────
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Site registry error: {message}")]
    Registry { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    // ── Control flow ─────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

// ── Conversion from gateway errors ───────────────────────────────────

impl From<stackyard_runtime::Error> for CoreError {
    fn from(err: stackyard_runtime::Error) -> Self {
        use stackyard_runtime::Error as Rt;

        match err {
            Rt::Unavailable { message } => CoreError::RuntimeUnavailable { reason: message },
            Rt::NotFound { kind, name } => CoreError::NotFound {
                kind: kind.to_string(),
                name,
            },
            Rt::Conflict { kind, name } | Rt::NotModified { kind, name } => CoreError::Conflict {
                kind: kind.to_string(),
                name,
            },
            Rt::InUse { kind, name } => CoreError::InUse {
                kind: kind.to_string(),
                name,
            },
            Rt::Api { status, message } => CoreError::Runtime { status, message },
            Rt::ImagePull { image, message } => CoreError::ImagePull { image, message },
            Rt::Cancelled => CoreError::Cancelled,
        }
    }
}

// ── Idempotent boundary ──────────────────────────────────────────────

/// Absorb a stop or remove that had nothing to do (already gone, already
/// stopped). Conflicts surface: an in-use volume was not removed.
pub(crate) fn absorb_gone<T>(
    result: Result<T, stackyard_runtime::Error>,
    action: &str,
) -> Result<(), CoreError> {
    absorb(result, action, stackyard_runtime::Error::is_gone)
}

/// Absorb a create or start that had nothing to do (already present,
/// already running).
pub(crate) fn absorb_present<T>(
    result: Result<T, stackyard_runtime::Error>,
    action: &str,
) -> Result<(), CoreError> {
    absorb(result, action, stackyard_runtime::Error::is_present)
}

fn absorb<T>(
    result: Result<T, stackyard_runtime::Error>,
    action: &str,
    satisfied: fn(&stackyard_runtime::Error) -> bool,
) -> Result<(), CoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if satisfied(&e) => {
            debug!(action, error = %e, "already satisfied");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use stackyard_runtime::{Error as RtError, ResourceKind};

    use super::*;

    fn err(kind: ResourceKind, conflict: bool) -> Result<(), RtError> {
        let name = "x".to_owned();
        Err(if conflict {
            RtError::Conflict { kind, name }
        } else {
            RtError::NotFound { kind, name }
        })
    }

    #[test]
    fn removes_absorb_only_missing_objects() {
        assert!(absorb_gone(err(ResourceKind::Container, false), "remove").is_ok());
        assert!(absorb_gone(err(ResourceKind::Network, true), "remove").is_err());

        let busy: Result<(), RtError> = Err(RtError::InUse {
            kind: ResourceKind::Volume,
            name: "yard-blog-dbdata".into(),
        });
        let in_use = absorb_gone(busy, "remove volume").expect_err("in-use volume surfaces");
        assert!(matches!(in_use, CoreError::InUse { ref name, .. } if name == "yard-blog-dbdata"));
    }

    #[test]
    fn creates_absorb_only_existing_objects() {
        assert!(absorb_present(err(ResourceKind::Volume, true), "create").is_ok());
        let missing = absorb_present(err(ResourceKind::Container, false), "start")
            .expect_err("missing container surfaces");
        assert!(matches!(missing, CoreError::NotFound { .. }));
    }

    #[test]
    fn surfaces_real_failures() {
        let boom: Result<(), RtError> = Err(RtError::Api {
            status: 500,
            message: "disk full".into(),
        });
        let err = absorb_present(boom, "create").expect_err("surfaced");
        assert!(matches!(err, CoreError::Runtime { status: 500, .. }));

        let down: Result<(), RtError> = Err(RtError::Unavailable {
            message: "socket".into(),
        });
        assert!(matches!(
            absorb_gone(down, "stop").expect_err("surfaced"),
            CoreError::RuntimeUnavailable { .. }
        ));
    }
}
