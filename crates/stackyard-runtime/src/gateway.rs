// ── Runtime gateway abstraction ──
//
// The only seam between the engine and a container runtime. All calls
// are name-addressed; IDs never leak out of a backend.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::{ContainerSpec, ContainerSummary, ExecOutput, NetworkSpec};

pub type Result<T> = std::result::Result<T, Error>;

/// Capability interface over a single host's container runtime.
///
/// Implementations must classify failures: missing objects as
/// [`Error::NotFound`], duplicate names as [`Error::Conflict`], no-op state
/// changes as [`Error::NotModified`] and an unreachable daemon as
/// [`Error::Unavailable`].
#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Verify the daemon is reachable.
    async fn ping(&self) -> Result<()>;

    // ── Containers ──────────────────────────────────────────────────

    /// All containers (running or not) whose name starts with `prefix`.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>>;

    async fn container_exists(&self, name: &str) -> Result<bool>;

    async fn container_running(&self, name: &str) -> Result<bool>;

    /// Create (but do not start) a container and attach it to every
    /// network listed in `spec`. If any attachment fails the container is
    /// removed again, so a name that exists is never half-wired.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Names of the networks a container is attached to.
    async fn attached_networks(&self, container: &str) -> Result<Vec<String>>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stop with a bounded grace period before the runtime kills it.
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()>;

    /// Remove a container. `force` removes it even while running.
    /// Anonymous and named volumes are never removed here.
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    // ── Networks ────────────────────────────────────────────────────

    /// Names of all networks whose name starts with `prefix`.
    async fn list_networks(&self, prefix: &str) -> Result<Vec<String>>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()>;

    async fn remove_network(&self, name: &str) -> Result<()>;

    async fn connect_network(&self, container: &str, network: &str, aliases: &[String])
    -> Result<()>;

    async fn disconnect_network(&self, container: &str, network: &str) -> Result<()>;

    // ── Volumes ─────────────────────────────────────────────────────

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    // ── Images ──────────────────────────────────────────────────────

    /// Pull `image` unless it is already present locally.
    /// Returns `true` when a pull actually happened.
    async fn pull_image_if_missing(&self, image: &str, cancel: &CancellationToken)
    -> Result<bool>;

    // ── Exec & logs ─────────────────────────────────────────────────

    /// Run a command in a running container and collect its output.
    async fn exec(
        &self,
        container: &str,
        cmd: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        self.exec_with_env(container, cmd, &[], cancel).await
    }

    /// [`exec`](Self::exec) with extra `KEY=VALUE` environment entries,
    /// for secrets that must not appear on the command line.
    async fn exec_with_env(
        &self,
        container: &str,
        cmd: &[String],
        env: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput>;

    /// The last `lines` lines of a container's log.
    async fn logs(&self, container: &str, lines: usize) -> Result<String>;
}

/// Race `fut` against `cancel`, returning [`Error::Cancelled`] if the token
/// fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
