// ── Runtime-neutral resource descriptions ──
//
// Plain data handed to a `RuntimeGateway`. Backends translate these into
// their own request shapes; nothing here knows about Docker.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

/// What gets mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MountSource {
    /// A host path (file or directory).
    Bind(PathBuf),
    /// A named volume managed by the runtime.
    Volume(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Bind(source.into()),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name.into()),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Docker-style bind string: `source:target[:ro]`.
    pub fn to_bind_string(&self) -> String {
        let source = match &self.source {
            MountSource::Bind(path) => path.display().to_string(),
            MountSource::Volume(name) => name.clone(),
        };
        if self.read_only {
            format!("{source}:{}:ro", self.target)
        } else {
            format!("{source}:{}", self.target)
        }
    }
}

/// A host port published to a container port (TCP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A network a container joins, with the DNS aliases it answers to there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    pub fn new(network: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            network: network.into(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
        }
    }
}

/// Everything needed to create one container.
///
/// The first entry of `networks` is the primary network the container is
/// created on; the rest are connected immediately after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortMapping>,
    pub networks: Vec<NetworkAttachment>,
    pub extra_hosts: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    pub name: String,
    pub internal: bool,
    pub labels: BTreeMap<String, String>,
}

impl NetworkSpec {
    /// A plain, non-internal bridge network.
    pub fn bridge(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal: false,
            labels: BTreeMap::new(),
        }
    }
}

/// Result of listing containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
    pub running: bool,
}

/// Output and exit status of an in-container command.
///
/// `output` interleaves both streams in arrival order, for display.
/// Consumers that parse what a command printed read `stdout` alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub output: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn new(exit_code: i64, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        Self {
            output: format!("{stdout}{stderr}"),
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Exit 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Non-zero exit with `stderr`.
    pub fn failed(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self::new(exit_code, "", stderr)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
