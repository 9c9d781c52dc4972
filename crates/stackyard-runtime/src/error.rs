use strum::Display;
use thiserror::Error;

/// The kind of runtime object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Network,
    Volume,
    Image,
    Exec,
}

/// Top-level error type for the `stackyard-runtime` crate.
///
/// Every backend classifies its failures into these variants so the engine
/// can decide what is fatal and what is an already-satisfied request.
/// `stackyard-core` maps these into its own error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Reachability ────────────────────────────────────────────────
    /// The runtime daemon could not be reached at all.
    #[error("Container runtime unavailable: {message}")]
    Unavailable { message: String },

    // ── Idempotent conditions ───────────────────────────────────────
    /// The named object does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// An object with this name already exists.
    #[error("{kind} already exists: {name}")]
    Conflict { kind: ResourceKind, name: String },

    /// The object is already in the requested state (e.g. starting a
    /// running container).
    #[error("{kind} {name} already in requested state")]
    NotModified { kind: ResourceKind, name: String },

    /// The object cannot be removed while something still uses it.
    #[error("{kind} {name} is still in use")]
    InUse { kind: ResourceKind, name: String },

    // ── Failures ────────────────────────────────────────────────────
    /// The runtime rejected the request.
    #[error("Runtime API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Pulling an image failed mid-stream.
    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    /// The caller cancelled the operation.
    #[error("Runtime operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the resource already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// A stop or remove that found nothing to do: the object is already
    /// gone or already stopped. A conflict is never "gone"; a volume still
    /// in use answers with one.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotModified { .. })
    }

    /// A create or start that found nothing to do: the object already
    /// exists or already runs.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotModified { .. })
    }

    /// Returns `true` if the daemon itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_classes() {
        let gone = Error::NotFound {
            kind: ResourceKind::Container,
            name: "a".into(),
        };
        let dup = Error::Conflict {
            kind: ResourceKind::Network,
            name: "b".into(),
        };
        let api = Error::Api {
            status: 500,
            message: "boom".into(),
        };
        let running = Error::NotModified {
            kind: ResourceKind::Container,
            name: "c".into(),
        };
        assert!(gone.is_gone() && !gone.is_present());
        assert!(dup.is_present() && !dup.is_gone());
        assert!(running.is_gone() && running.is_present());
        assert!(!api.is_gone() && !api.is_present());
        assert!(!Error::Cancelled.is_gone());

        let busy = Error::InUse {
            kind: ResourceKind::Volume,
            name: "v".into(),
        };
        assert!(!busy.is_gone() && !busy.is_present());
    }

    #[test]
    fn resource_kind_renders_lowercase() {
        let err = Error::NotFound {
            kind: ResourceKind::Volume,
            name: "data".into(),
        };
        assert_eq!(err.to_string(), "volume not found: data");
    }
}
