// ── In-memory runtime ──
//
// A faithful-enough model of a container daemon kept entirely in process:
// names are unique, networks refuse removal while containers are attached,
// exec requires a running container, images must be pulled before use.
// Every mutating call is journaled so tests can assert on side effects.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ResourceKind};
use crate::gateway::{Result, RuntimeGateway};
use crate::types::{ContainerSpec, ContainerSummary, ExecOutput, MountSource, NetworkSpec};

/// One recorded side effect against the in-memory runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    CreateNetwork(String),
    RemoveNetwork(String),
    ConnectNetwork { container: String, network: String },
    CreateVolume(String),
    RemoveVolume(String),
    PullImage(String),
    Exec {
        container: String,
        cmd: Vec<String>,
        env: Vec<String>,
    },
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    running: bool,
    /// Network name -> aliases.
    networks: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeMap<String, MemoryContainer>,
    networks: BTreeMap<String, NetworkSpec>,
    volumes: BTreeSet<String>,
    images: BTreeSet<String>,
    /// Command prefix (space-joined) -> scripted reply.
    exec_replies: Vec<(String, ExecOutput)>,
    /// Container names whose next create fails.
    create_failures: BTreeSet<String>,
    /// Tokens cancelled once the named container has been created.
    cancel_on_create: Vec<(String, CancellationToken)>,
    logs: HashMap<String, Vec<String>>,
    journal: Vec<RuntimeCall>,
}

/// Runtime gateway that keeps all state in memory.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ───────────────────────────────────────────────────

    /// Make every call fail with [`Error::Unavailable`] while `down` is set.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Reply to any exec whose command line starts with `prefix`.
    /// Later registrations win over earlier ones.
    pub async fn reply_to_exec(&self, prefix: &str, reply: ExecOutput) {
        self.state
            .lock()
            .await
            .exec_replies
            .push((prefix.to_owned(), reply));
    }

    /// Fail the next creation of `container` with an API error.
    pub async fn fail_next_create(&self, container: &str) {
        self.state
            .lock()
            .await
            .create_failures
            .insert(container.to_owned());
    }

    /// Cancel `token` right after `container` is created, to interrupt an
    /// operation part way through.
    pub async fn cancel_after_create(&self, container: &str, token: CancellationToken) {
        self.state
            .lock()
            .await
            .cancel_on_create
            .push((container.to_owned(), token));
    }

    /// Append log lines for a container.
    pub async fn push_logs(&self, container: &str, lines: &[&str]) {
        self.state
            .lock()
            .await
            .logs
            .entry(container.to_owned())
            .or_default()
            .extend(lines.iter().map(|l| (*l).to_owned()));
    }

    /// Pretend an image is already cached locally.
    pub async fn seed_image(&self, image: &str) {
        self.state.lock().await.images.insert(image.to_owned());
    }

    /// Remove every container and network at once, as an unclean host
    /// restart would. Volumes survive.
    pub async fn wipe_containers(&self) {
        let mut state = self.state.lock().await;
        state.containers.clear();
        state.networks.clear();
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub async fn journal(&self) -> Vec<RuntimeCall> {
        self.state.lock().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.state.lock().await.journal.clear();
    }

    /// Number of container creations recorded in the journal.
    pub async fn container_creations(&self) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|c| matches!(c, RuntimeCall::CreateContainer(_)))
            .count()
    }

    /// Command lines of every exec recorded in the journal, space-joined.
    pub async fn exec_history(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Exec { cmd, .. } => Some(cmd.join(" ")),
                _ => None,
            })
            .collect()
    }

    pub async fn container_names(&self) -> Vec<String> {
        self.state.lock().await.containers.keys().cloned().collect()
    }

    pub async fn network_names(&self) -> Vec<String> {
        self.state.lock().await.networks.keys().cloned().collect()
    }

    pub async fn volume_names(&self) -> Vec<String> {
        self.state.lock().await.volumes.iter().cloned().collect()
    }

    /// The spec a container was created from.
    pub async fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .map(|c| c.spec.clone())
    }

    /// Networks (and aliases) a container is attached to.
    pub async fn container_networks(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .map(|c| c.networks.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable {
                message: "in-memory runtime marked unavailable".into(),
            });
        }
        Ok(())
    }
}

fn not_found(kind: ResourceKind, name: &str) -> Error {
    Error::NotFound {
        kind,
        name: name.to_owned(),
    }
}

fn conflict(kind: ResourceKind, name: &str) -> Error {
    Error::Conflict {
        kind,
        name: name.to_owned(),
    }
}

#[async_trait]
impl RuntimeGateway for MemoryRuntime {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .containers
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, c)| ContainerSummary {
                name: name.clone(),
                image: c.spec.image.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().await.containers.contains_key(name))
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .containers
            .get(name)
            .is_some_and(|c| c.running))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if state.create_failures.remove(&spec.name) {
            return Err(Error::Api {
                status: 500,
                message: format!("injected create failure for {}", spec.name),
            });
        }
        if state.containers.contains_key(&spec.name) {
            return Err(conflict(ResourceKind::Container, &spec.name));
        }
        if !state.images.contains(&spec.image) {
            return Err(not_found(ResourceKind::Image, &spec.image));
        }
        if let Some(missing) = spec
            .networks
            .iter()
            .find(|n| !state.networks.contains_key(&n.network))
        {
            return Err(not_found(ResourceKind::Network, &missing.network));
        }

        let networks = spec
            .networks
            .iter()
            .map(|n| (n.network.clone(), n.aliases.clone()))
            .collect();
        state.containers.insert(
            spec.name.clone(),
            MemoryContainer {
                spec: spec.clone(),
                running: false,
                networks,
            },
        );
        state
            .journal
            .push(RuntimeCall::CreateContainer(spec.name.clone()));
        for (_, token) in state.cancel_on_create.iter().filter(|(n, _)| *n == spec.name) {
            token.cancel();
        }
        Ok(())
    }

    async fn attached_networks(&self, container: &str) -> Result<Vec<String>> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .containers
            .get(container)
            .map(|c| c.networks.keys().cloned().collect())
            .ok_or_else(|| not_found(ResourceKind::Container, container))
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found(ResourceKind::Container, name))?;
        if container.running {
            return Err(Error::NotModified {
                kind: ResourceKind::Container,
                name: name.to_owned(),
            });
        }
        container.running = true;
        state
            .journal
            .push(RuntimeCall::StartContainer(name.to_owned()));
        Ok(())
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found(ResourceKind::Container, name))?;
        if !container.running {
            return Err(Error::NotModified {
                kind: ResourceKind::Container,
                name: name.to_owned(),
            });
        }
        container.running = false;
        state
            .journal
            .push(RuntimeCall::StopContainer(name.to_owned()));
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let running = state
            .containers
            .get(name)
            .ok_or_else(|| not_found(ResourceKind::Container, name))?
            .running;
        if running && !force {
            return Err(conflict(ResourceKind::Container, name));
        }
        state.containers.remove(name);
        state
            .journal
            .push(RuntimeCall::RemoveContainer(name.to_owned()));
        Ok(())
    }

    async fn list_networks(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .networks
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().await.networks.contains_key(name))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.networks.contains_key(&spec.name) {
            return Err(conflict(ResourceKind::Network, &spec.name));
        }
        state.networks.insert(spec.name.clone(), spec.clone());
        state
            .journal
            .push(RuntimeCall::CreateNetwork(spec.name.clone()));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.networks.contains_key(name) {
            return Err(not_found(ResourceKind::Network, name));
        }
        if state
            .containers
            .values()
            .any(|c| c.networks.contains_key(name))
        {
            return Err(Error::Api {
                status: 403,
                message: format!("network {name} has active endpoints"),
            });
        }
        state.networks.remove(name);
        state
            .journal
            .push(RuntimeCall::RemoveNetwork(name.to_owned()));
        Ok(())
    }

    async fn connect_network(
        &self,
        container: &str,
        network: &str,
        aliases: &[String],
    ) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.networks.contains_key(network) {
            return Err(not_found(ResourceKind::Network, network));
        }
        let entry = state
            .containers
            .get_mut(container)
            .ok_or_else(|| not_found(ResourceKind::Container, container))?;
        if entry.networks.contains_key(network) {
            return Err(conflict(ResourceKind::Network, network));
        }
        entry
            .networks
            .insert(network.to_owned(), aliases.to_vec());
        state.journal.push(RuntimeCall::ConnectNetwork {
            container: container.to_owned(),
            network: network.to_owned(),
        });
        Ok(())
    }

    async fn disconnect_network(&self, container: &str, network: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let entry = state
            .containers
            .get_mut(container)
            .ok_or_else(|| not_found(ResourceKind::Container, container))?;
        entry
            .networks
            .remove(network)
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::Network, network))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().await.volumes.contains(name))
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.volumes.insert(name.to_owned()) {
            return Err(conflict(ResourceKind::Volume, name));
        }
        state.journal.push(RuntimeCall::CreateVolume(name.to_owned()));
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let in_use = state.containers.values().any(|c| {
            c.spec
                .mounts
                .iter()
                .any(|m| matches!(&m.source, MountSource::Volume(v) if v == name))
        });
        if in_use {
            return Err(Error::InUse {
                kind: ResourceKind::Volume,
                name: name.to_owned(),
            });
        }
        if !state.volumes.remove(name) {
            return Err(not_found(ResourceKind::Volume, name));
        }
        state.journal.push(RuntimeCall::RemoveVolume(name.to_owned()));
        Ok(())
    }

    async fn pull_image_if_missing(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.check_available()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut state = self.state.lock().await;
        if !state.images.insert(image.to_owned()) {
            return Ok(false);
        }
        state.journal.push(RuntimeCall::PullImage(image.to_owned()));
        Ok(true)
    }

    async fn exec_with_env(
        &self,
        container: &str,
        cmd: &[String],
        env: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        self.check_available()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut state = self.state.lock().await;
        match state.containers.get(container) {
            None => return Err(not_found(ResourceKind::Container, container)),
            Some(c) if !c.running => {
                return Err(Error::Api {
                    status: 409,
                    message: format!("container {container} is not running"),
                });
            }
            Some(_) => {}
        }

        state.journal.push(RuntimeCall::Exec {
            container: container.to_owned(),
            cmd: cmd.to_vec(),
            env: env.to_vec(),
        });

        let line = cmd.join(" ");
        let reply = state
            .exec_replies
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default();
        Ok(reply)
    }

    async fn logs(&self, container: &str, lines: usize) -> Result<String> {
        self.check_available()?;
        let state = self.state.lock().await;
        if !state.containers.contains_key(container) {
            return Err(not_found(ResourceKind::Container, container));
        }
        let all = state.logs.get(container).map(Vec::as_slice).unwrap_or_default();
        let start = all.len().saturating_sub(lines);
        Ok(all
            .get(start..)
            .unwrap_or_default()
            .iter()
            .map(|l| format!("{l}\n"))
            .collect())
    }
}
