// ── Docker Engine backend ──
//
// `RuntimeGateway` over the Docker Engine API via bollard. HTTP status
// codes are folded into the crate's error classes here and nowhere else.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions,
    ListNetworksOptions,
};
use bollard::service::{EndpointSettings, HostConfig, PortBinding};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, ResourceKind};
use crate::gateway::{Result, RuntimeGateway, cancellable};
use crate::types::{ContainerSpec, ContainerSummary, ExecOutput, NetworkSpec};

/// Runtime gateway backed by a local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    ///
    /// No request is made here; call [`RuntimeGateway::ping`] to verify the
    /// daemon is actually reachable.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| Error::Unavailable {
            message: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn inspect_running(&self, name: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name))?;
        Ok(inspect.state.and_then(|s| s.running).unwrap_or(false))
    }
}

// ── Error classification ────────────────────────────────────────────

fn classify(err: bollard::errors::Error, kind: ResourceKind, name: &str) -> Error {
    use bollard::errors::Error as Bollard;

    match err {
        Bollard::DockerResponseServerError {
            status_code: 404, ..
        } => Error::NotFound {
            kind,
            name: name.to_owned(),
        },
        Bollard::DockerResponseServerError {
            status_code: 409, ..
        } => Error::Conflict {
            kind,
            name: name.to_owned(),
        },
        Bollard::DockerResponseServerError {
            status_code: 304, ..
        } => Error::NotModified {
            kind,
            name: name.to_owned(),
        },
        Bollard::DockerResponseServerError {
            status_code,
            message,
        } => Error::Api {
            status: status_code,
            message,
        },
        other => Error::Unavailable {
            message: other.to_string(),
        },
    }
}

/// Map an existence check to `Ok(false)` on not-found.
fn exists<T>(res: std::result::Result<T, Error>) -> Result<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Request builders ────────────────────────────────────────────────

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .iter()
        .map(|p| (format!("{}/tcp", p.container), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|p| {
            let binding = PortBinding {
                host_ip: None,
                host_port: Some(p.host.to_string()),
            };
            (format!("{}/tcp", p.container), Some(vec![binding]))
        })
        .collect();

    let primary = spec.networks.first();

    let host_config = HostConfig {
        binds: Some(spec.mounts.iter().map(|m| m.to_bind_string()).collect()),
        port_bindings: Some(port_bindings),
        network_mode: primary.map(|n| n.network.clone()),
        extra_hosts: (!spec.extra_hosts.is_empty()).then(|| spec.extra_hosts.clone()),
        ..Default::default()
    };

    // Only the primary network can be set at create time on older
    // daemons; the rest are connected afterwards.
    let networking_config = primary.map(|n| NetworkingConfig {
        endpoints_config: HashMap::from([(
            n.network.clone(),
            EndpointSettings {
                aliases: Some(n.aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        cmd: spec.cmd.clone(),
        working_dir: spec.working_dir.clone(),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn strip_slash(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

// ── Gateway implementation ──────────────────────────────────────────

#[async_trait]
impl RuntimeGateway for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Unavailable {
                message: e.to_string(),
            })
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Container, prefix))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .as_ref()?
                    .iter()
                    .map(|n| strip_slash(n))
                    .find(|n| n.starts_with(prefix))?
                    .to_owned();
                Some(ContainerSummary {
                    name,
                    image: c.image.unwrap_or_default(),
                    running: c.state.as_deref() == Some("running"),
                })
            })
            .collect())
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        exists(self.inspect_running(name).await)
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        match self.inspect_running(name).await {
            Err(e) if e.is_not_found() => Ok(false),
            other => other,
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| classify(e, ResourceKind::Container, &spec.name))?;

        info!(container = %spec.name, id = %response.id, "created container");

        for attachment in spec.networks.iter().skip(1) {
            let connected = self
                .connect_network(&spec.name, &attachment.network, &attachment.aliases)
                .await;
            if let Err(e) = connected {
                warn!(
                    container = %spec.name,
                    network = %attachment.network,
                    error = %e,
                    "network attach failed; removing container"
                );
                if let Err(cleanup) = self.remove_container(&spec.name, true).await {
                    warn!(container = %spec.name, error = %cleanup, "could not remove container");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn attached_networks(&self, container: &str) -> Result<Vec<String>> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, container))?;
        let mut names: Vec<String> = inspect
            .network_settings
            .and_then(|s| s.networks)
            .map(|n| n.into_keys().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name))?;
        debug!(container = %name, "started container");
        Ok(())
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name))?;
        debug!(container = %name, "stopped container");
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: false,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Container, name))?;
        info!(container = %name, "removed container");
        Ok(())
    }

    async fn list_networks(&self, prefix: &str) -> Result<Vec<String>> {
        let options = ListNetworksOptions::<String> {
            filters: HashMap::new(),
        };
        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| classify(e, ResourceKind::Network, prefix))?;
        Ok(networks
            .into_iter()
            .filter_map(|n| n.name)
            .filter(|n| n.starts_with(prefix))
            .collect())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let res = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, name));
        exists(res)
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let labels: HashMap<&str, &str> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let options = CreateNetworkOptions {
            name: spec.name.as_str(),
            driver: "bridge",
            internal: spec.internal,
            labels,
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, &spec.name))?;
        info!(network = %spec.name, "created network");
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, name))?;
        info!(network = %name, "removed network");
        Ok(())
    }

    async fn connect_network(
        &self,
        container: &str,
        network: &str,
        aliases: &[String],
    ) -> Result<()> {
        let options = ConnectNetworkOptions {
            container,
            endpoint_config: EndpointSettings {
                aliases: Some(aliases.to_vec()),
                ..Default::default()
            },
        };
        self.docker
            .connect_network(network, options)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, network))?;
        debug!(container = %container, network = %network, ?aliases, "connected network");
        Ok(())
    }

    async fn disconnect_network(&self, container: &str, network: &str) -> Result<()> {
        let options = DisconnectNetworkOptions {
            container,
            force: true,
        };
        self.docker
            .disconnect_network(network, options)
            .await
            .map_err(|e| classify(e, ResourceKind::Network, network))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        let res = self
            .docker
            .inspect_volume(name)
            .await
            .map_err(|e| classify(e, ResourceKind::Volume, name));
        exists(res)
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let options = CreateVolumeOptions {
            name,
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(|e| classify(e, ResourceKind::Volume, name))?;
        info!(volume = %name, "created volume");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
            .map_err(|e| match classify(e, ResourceKind::Volume, name) {
                Error::Conflict { kind, name } => Error::InUse { kind, name },
                other => other,
            })?;
        info!(volume = %name, "removed volume");
        Ok(())
    }

    async fn pull_image_if_missing(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let present = exists(
            self.docker
                .inspect_image(image)
                .await
                .map_err(|e| classify(e, ResourceKind::Image, image)),
        )?;
        if present {
            debug!(image = %image, "image already present");
            return Ok(false);
        }

        info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let pull = async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(result) = stream.next().await {
                match result {
                    Ok(progress) => {
                        if let Some(status) = progress.status {
                            debug!(image = %image, status = %status, "pull progress");
                        }
                    }
                    Err(e) => {
                        return Err(Error::ImagePull {
                            image: image.to_owned(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            Ok(true)
        };
        cancellable(cancel, pull).await
    }

    async fn exec_with_env(
        &self,
        container: &str,
        cmd: &[String],
        env: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        debug!(container = %container, ?cmd, env = env.len(), "exec");

        let options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            env: (!env.is_empty()).then(|| env.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let run = async {
            let exec = self
                .docker
                .create_exec(container, options)
                .await
                .map_err(|e| classify(e, ResourceKind::Container, container))?;

            let started = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| classify(e, ResourceKind::Exec, &exec.id))?;

            let mut out = ExecOutput::default();
            if let StartExecResults::Attached { output: mut stream, .. } = started {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            let text = String::from_utf8_lossy(&message);
                            out.stdout.push_str(&text);
                            out.output.push_str(&text);
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            let text = String::from_utf8_lossy(&message);
                            out.stderr.push_str(&text);
                            out.output.push_str(&text);
                        }
                        Ok(_) => {}
                        Err(e) => return Err(classify(e, ResourceKind::Exec, &exec.id)),
                    }
                }
            }

            let inspect = self
                .docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| classify(e, ResourceKind::Exec, &exec.id))?;

            out.exit_code = inspect.exit_code.unwrap_or(-1);
            Ok(out)
        };
        cancellable(cancel, run).await
    }

    async fn logs(&self, container: &str, lines: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let log = chunk.map_err(|e| classify(e, ResourceKind::Container, container))?;
            output.push_str(&log.to_string());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{Mount, NetworkAttachment, PortMapping};

    fn server_error(status_code: u16) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: "test".into(),
        }
    }

    #[test]
    fn status_codes_map_to_error_classes() {
        assert!(classify(server_error(404), ResourceKind::Container, "x").is_not_found());
        assert!(classify(server_error(409), ResourceKind::Network, "x").is_conflict());
        assert!(classify(server_error(304), ResourceKind::Container, "x").is_gone());
        assert!(matches!(
            classify(server_error(500), ResourceKind::Volume, "x"),
            Error::Api { status: 500, .. }
        ));
    }

    #[test]
    fn container_config_uses_primary_network_only() {
        let spec = ContainerSpec {
            name: "yard-blog-web".into(),
            image: "nginx:1.28-alpine".into(),
            env: BTreeMap::from([("A".into(), "1".into())]),
            mounts: vec![Mount::bind("/srv/blog", "/var/www/html").read_only()],
            ports: vec![PortMapping {
                host: 8080,
                container: 80,
            }],
            networks: vec![
                NetworkAttachment::new("yard-blog", &["web"]),
                NetworkAttachment::new("yard-global", &["yard-blog-web"]),
            ],
            ..Default::default()
        };

        let config = container_config(&spec);
        let host = config.host_config.expect("host config");
        assert_eq!(host.network_mode.as_deref(), Some("yard-blog"));
        assert_eq!(
            host.binds,
            Some(vec!["/srv/blog:/var/www/html:ro".to_owned()])
        );
        assert_eq!(config.env, Some(vec!["A=1".to_owned()]));

        let endpoints = config.networking_config.expect("networking").endpoints_config;
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints.contains_key("yard-blog"));
    }
}
