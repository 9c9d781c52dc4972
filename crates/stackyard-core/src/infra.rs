// ── Shared infrastructure ──
//
// The global bridge network plus the proxy, mail sink and database admin
// UI. Created on demand, exactly once; never recreated if present.

use std::collections::BTreeMap;
use std::sync::Arc;

use stackyard_runtime::{
    ContainerSpec, Mount, NetworkAttachment, NetworkSpec, PortMapping, RuntimeGateway,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CoreError, absorb_gone, absorb_present};
use crate::layout::{Layout, PROXY_CONFIG_MOUNT};
use crate::model::GlobalNames;

/// Label attached to every object this engine creates.
pub const MANAGED_LABEL: &str = "io.stackyard.managed";

/// What a bootstrap pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfraReport {
    pub created: Vec<String>,
    pub started: Vec<String>,
}

/// What a purge removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub containers: Vec<String>,
    pub networks: Vec<String>,
}

pub struct Bootstrapper {
    runtime: Arc<dyn RuntimeGateway>,
    config: Arc<EngineConfig>,
    layout: Layout,
    names: GlobalNames,
}

impl Bootstrapper {
    pub fn new(runtime: Arc<dyn RuntimeGateway>, config: Arc<EngineConfig>) -> Self {
        let layout = Layout::new(&config);
        let names = GlobalNames::new(&config.prefix);
        Self {
            runtime,
            config,
            layout,
            names,
        }
    }

    pub fn names(&self) -> &GlobalNames {
        &self.names
    }

    // ── Service descriptors ──────────────────────────────────────────

    /// The shared services, in creation order.
    pub fn service_specs(&self) -> Vec<ContainerSpec> {
        let images = &self.config.images;
        let network = self.names.network();
        let labels = BTreeMap::from([(MANAGED_LABEL.to_owned(), "true".to_owned())]);

        let proxy_conf = format!("{PROXY_CONFIG_MOUNT}/nginx.conf");
        let proxy = ContainerSpec {
            name: self.names.proxy(),
            image: images.proxy.clone(),
            cmd: Some(vec![
                "nginx".into(),
                "-c".into(),
                proxy_conf,
                "-g".into(),
                "daemon off;".into(),
            ]),
            mounts: vec![Mount::bind(self.layout.proxy_dir(), PROXY_CONFIG_MOUNT).read_only()],
            ports: vec![PortMapping {
                host: self.config.http_port,
                container: 80,
            }],
            networks: vec![NetworkAttachment::new(&network, &["proxy"])],
            labels: labels.clone(),
            ..Default::default()
        };

        let mail = ContainerSpec {
            name: self.names.mail(),
            image: images.mail.clone(),
            ports: vec![
                PortMapping {
                    host: 1025,
                    container: 1025,
                },
                PortMapping {
                    host: 8025,
                    container: 8025,
                },
            ],
            networks: vec![NetworkAttachment::new(&network, &["mail"])],
            labels: labels.clone(),
            ..Default::default()
        };

        let dbadmin = ContainerSpec {
            name: self.names.dbadmin(),
            image: images.dbadmin.clone(),
            env: BTreeMap::from([("ADMINER_DEFAULT_SERVER".to_owned(), "database".to_owned())]),
            ports: vec![PortMapping {
                host: 8080,
                container: 8080,
            }],
            networks: vec![NetworkAttachment::new(&network, &["dbadmin"])],
            labels,
            ..Default::default()
        };

        vec![proxy, mail, dbadmin]
    }

    // ── Ensure ───────────────────────────────────────────────────────

    /// Make sure the shared network and every shared service exist and
    /// run. Network first; only missing pieces are created.
    pub async fn ensure_global_infrastructure(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InfraReport, CoreError> {
        let mut report = InfraReport::default();

        let network = self.names.network();
        match self.runtime.network_exists(&network).await {
            Ok(true) => debug!(network = %network, "shared network present"),
            Ok(false) => {
                let res = self.runtime.create_network(&NetworkSpec::bridge(&network)).await;
                absorb_present(res, "create shared network")?;
                report.created.push(network.clone());
            }
            Err(e) => {
                warn!(network = %network, error = %e, "network lookup failed; assuming absent");
                self.runtime
                    .create_network(&NetworkSpec::bridge(&network))
                    .await?;
                report.created.push(network.clone());
            }
        }

        for spec in self.service_specs() {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.ensure_service(&spec, cancel, &mut report).await?;
        }

        if !report.created.is_empty() {
            info!(created = ?report.created, "shared infrastructure provisioned");
        }
        Ok(report)
    }

    async fn ensure_service(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
        report: &mut InfraReport,
    ) -> Result<(), CoreError> {
        let lookup_failed = match self.runtime.container_exists(&spec.name).await {
            Ok(true) => {
                if !self.runtime.container_running(&spec.name).await? {
                    let res = self.runtime.start_container(&spec.name).await;
                    absorb_present(res, "start shared service")?;
                    report.started.push(spec.name.clone());
                }
                return Ok(());
            }
            Ok(false) => false,
            Err(e) => {
                warn!(container = %spec.name, error = %e, "container lookup failed; assuming absent");
                true
            }
        };

        self.runtime.pull_image_if_missing(&spec.image, cancel).await?;
        let created = self.runtime.create_container(spec).await;
        if lookup_failed {
            created?;
        } else {
            absorb_present(created, "create shared service")?;
        }
        let res = self.runtime.start_container(&spec.name).await;
        absorb_present(res, "start shared service")?;
        report.created.push(spec.name.clone());
        Ok(())
    }

    // ── Purge ────────────────────────────────────────────────────────

    /// Force-remove every container, then every network, carrying the
    /// engine's prefix. Volumes are never touched.
    pub async fn purge(&self) -> Result<PurgeReport, CoreError> {
        let prefix = self.names.owned_prefix();
        let mut report = PurgeReport::default();

        for container in self.runtime.list_containers(&prefix).await? {
            let res = self.runtime.remove_container(&container.name, true).await;
            absorb_gone(res, "purge container")?;
            report.containers.push(container.name);
        }
        for network in self.runtime.list_networks(&prefix).await? {
            let res = self.runtime.remove_network(&network).await;
            absorb_gone(res, "purge network")?;
            report.networks.push(network);
        }

        info!(
            containers = report.containers.len(),
            networks = report.networks.len(),
            "purged runtime objects"
        );
        Ok(report)
    }
}
