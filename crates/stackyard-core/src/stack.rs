// ── Stack provisioner ──
//
// One site's private network, its four role containers and the database
// volume. Every role is described by a `RoleSpec`; a single routine turns
// any of them into a container.

use std::collections::BTreeMap;
use std::sync::Arc;

use stackyard_runtime::{ContainerSpec, Mount, NetworkAttachment, NetworkSpec, RuntimeGateway};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CoreError, absorb_gone, absorb_present};
use crate::infra::MANAGED_LABEL;
use crate::layout::{DOCUMENT_ROOT, Layout, WEB_CONFIG_MOUNT};
use crate::model::{GlobalNames, Role, Site, StackNames};

/// Database name and user inside every site's database container.
pub const DB_NAME: &str = "wordpress";
pub const DB_USER: &str = "wordpress";

const PHP_INI_TARGET: &str = "/usr/local/etc/php/conf.d/zz-stackyard.ini";
const DB_CNF_TARGET: &str = "/etc/mysql/conf.d/stackyard.cnf";
const DB_DATA_DIR: &str = "/var/lib/mysql";

/// Whether provisioning built a fresh stack or picked up an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Resumed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownOptions {
    /// Also remove the database volume.
    pub destroy_data: bool,
}

// ── Role descriptor ──────────────────────────────────────────────────

/// Per-role container configuration. Names are filled in by the
/// provisioner; everything else varies by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub role: Role,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub mounts: Vec<Mount>,
    /// Alias on the site's private network.
    pub alias: &'static str,
    /// Also join the shared network, aliased by container name.
    pub joins_global: bool,
    pub extra_hosts: Vec<String>,
}

impl RoleSpec {
    fn new(role: Role, image: String, alias: &'static str) -> Self {
        Self {
            role,
            image,
            env: BTreeMap::new(),
            cmd: None,
            working_dir: None,
            mounts: Vec::new(),
            alias,
            joins_global: false,
            extra_hosts: Vec::new(),
        }
    }

    fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_owned(), value.into());
        self
    }

    fn cmd(mut self, args: &[&str]) -> Self {
        self.cmd = Some(args.iter().map(|a| (*a).to_owned()).collect());
        self
    }

    fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Resolve into a runtime container description.
    pub fn into_container(self, names: &StackNames, global: &GlobalNames) -> ContainerSpec {
        let name = names.container(self.role);
        let mut networks = vec![NetworkAttachment::new(names.network(), &[self.alias])];
        if self.joins_global {
            networks.push(NetworkAttachment::new(global.network(), &[name.as_str()]));
        }
        let labels = BTreeMap::from([
            (MANAGED_LABEL.to_owned(), "true".to_owned()),
            ("io.stackyard.role".to_owned(), self.role.to_string()),
        ]);
        ContainerSpec {
            name,
            image: self.image,
            env: self.env,
            cmd: self.cmd,
            working_dir: self.working_dir,
            mounts: self.mounts,
            ports: Vec::new(),
            networks,
            extra_hosts: self.extra_hosts,
            labels,
        }
    }
}

// ── Provisioner ──────────────────────────────────────────────────────

pub struct StackProvisioner {
    runtime: Arc<dyn RuntimeGateway>,
    config: Arc<EngineConfig>,
    layout: Layout,
    global: GlobalNames,
}

impl StackProvisioner {
    pub fn new(runtime: Arc<dyn RuntimeGateway>, config: Arc<EngineConfig>) -> Self {
        let layout = Layout::new(&config);
        let global = GlobalNames::new(&config.prefix);
        Self {
            runtime,
            config,
            layout,
            global,
        }
    }

    pub fn names(&self, site: &Site) -> StackNames {
        StackNames::new(&self.config.prefix, &site.slug)
    }

    /// Role descriptor for one member of `site`'s stack.
    pub fn role_spec(&self, site: &Site, role: Role) -> RoleSpec {
        let images = &self.config.images;
        match role {
            Role::Web => {
                let conf = format!("{WEB_CONFIG_MOUNT}/nginx.conf");
                let mut spec = RoleSpec::new(Role::Web, images.web.clone(), "web")
                    .cmd(&["nginx", "-c", conf.as_str(), "-g", "daemon off;"])
                    .mount(Mount::bind(&site.files_dir, DOCUMENT_ROOT).read_only())
                    .mount(
                        Mount::bind(self.layout.site_web_dir(&site.slug), WEB_CONFIG_MOUNT)
                            .read_only(),
                    );
                spec.joins_global = true;
                spec
            }
            Role::App => {
                let mut spec = RoleSpec::new(
                    Role::App,
                    format!("{}:{}", images.app_repo, site.php_version),
                    "app",
                )
                .env("MYSQL_HOST", "database")
                .env("MYSQL_DATABASE", DB_NAME)
                .env("MYSQL_USER", DB_USER)
                .env("MYSQL_PASSWORD", site.db_password.as_str())
                .env("REDIS_HOST", "cache")
                .env("WP_CLI_ALLOW_ROOT", "true")
                .mount(Mount::bind(&site.files_dir, DOCUMENT_ROOT))
                .mount(Mount::bind(self.layout.php_ini(), PHP_INI_TARGET).read_only());
                spec.working_dir = Some(DOCUMENT_ROOT.to_owned());
                spec.extra_hosts = vec![
                    format!("{}:host-gateway", site.domain),
                    "host.docker.internal:host-gateway".to_owned(),
                ];
                spec
            }
            Role::Database => RoleSpec::new(
                Role::Database,
                format!("{}:{}", images.database_repo, site.database_version),
                "database",
            )
            .cmd(&["mysqld", "--innodb-flush-method=fsync"])
            .env("MYSQL_ROOT_PASSWORD", site.db_password.as_str())
            .env("MYSQL_DATABASE", DB_NAME)
            .env("MYSQL_USER", DB_USER)
            .env("MYSQL_PASSWORD", site.db_password.as_str())
            .mount(Mount::volume(self.names(site).volume(), DB_DATA_DIR))
            .mount(Mount::bind(self.layout.db_cnf(), DB_CNF_TARGET).read_only()),
            Role::Cache => RoleSpec::new(
                Role::Cache,
                format!("{}:{}-alpine", images.cache_repo, site.cache_version),
                "cache",
            )
            .cmd(&["redis-server", "--appendonly", "yes"]),
        }
    }

    /// Full container description for one role.
    pub fn container_spec(&self, site: &Site, role: Role) -> ContainerSpec {
        self.role_spec(site, role)
            .into_container(&self.names(site), &self.global)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// A stack exists when its web container exists.
    pub async fn stack_exists(&self, site: &Site) -> Result<bool, CoreError> {
        let web = self.names(site).container(Role::Web);
        Ok(self.runtime.container_exists(&web).await?)
    }

    /// Every role container is running.
    pub async fn stack_running(&self, site: &Site) -> Result<bool, CoreError> {
        let names = self.names(site);
        for role in Role::ALL {
            if !self.runtime.container_running(&names.container(role)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Provision ────────────────────────────────────────────────────

    /// Bring `site`'s stack up. A fresh stack is built in creation order;
    /// an existing one is resumed. Either way only missing members are
    /// created, so re-running after a partial failure completes the set.
    pub async fn provision_stack(
        &self,
        site: &Site,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome, CoreError> {
        let names = self.names(site);
        let outcome = if self.stack_exists(site).await? {
            ProvisionOutcome::Resumed
        } else {
            ProvisionOutcome::Created
        };
        debug!(site = %site.slug, ?outcome, "provisioning stack");

        let network = names.network();
        if !self.runtime.network_exists(&network).await? {
            let res = self.runtime.create_network(&NetworkSpec::bridge(&network)).await;
            absorb_present(res, "create site network")?;
        }

        let volume = names.volume();
        if !self.runtime.volume_exists(&volume).await? {
            let res = self.runtime.create_volume(&volume).await;
            absorb_present(res, "create database volume")?;
        }

        for role in Role::ALL {
            self.ensure_role_container(site, role, cancel).await?;
        }
        self.start_existing(site).await?;

        info!(site = %site.slug, ?outcome, "stack running");
        Ok(outcome)
    }

    /// Create one role container unless it already exists. An existing one
    /// is re-attached to any network it is missing. Returns whether a
    /// container was created.
    pub async fn ensure_role_container(
        &self,
        site: &Site,
        role: Role,
        cancel: &CancellationToken,
    ) -> Result<bool, CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let spec = self.container_spec(site, role);
        if self.runtime.container_exists(&spec.name).await? {
            self.repair_networks(&spec).await?;
            return Ok(false);
        }
        if self.runtime.pull_image_if_missing(&spec.image, cancel).await? {
            info!(image = %spec.image, "pulled image");
        }
        self.runtime.create_container(&spec).await?;
        debug!(container = %spec.name, "created role container");
        Ok(true)
    }

    async fn repair_networks(&self, spec: &ContainerSpec) -> Result<(), CoreError> {
        let attached = self.runtime.attached_networks(&spec.name).await?;
        for wanted in &spec.networks {
            if attached.contains(&wanted.network) {
                continue;
            }
            warn!(container = %spec.name, network = %wanted.network, "reattaching missing network");
            let res = self
                .runtime
                .connect_network(&spec.name, &wanted.network, &wanted.aliases)
                .await;
            absorb_present(res, "reattach network")?;
        }
        Ok(())
    }

    /// Start every role container in dependency order; running ones are
    /// left alone.
    pub async fn start_existing(&self, site: &Site) -> Result<(), CoreError> {
        let names = self.names(site);
        for role in Role::START_ORDER {
            let res = self.runtime.start_container(&names.container(role)).await;
            absorb_present(res, "start role container")?;
        }
        Ok(())
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Stop and remove the role containers, then the private network.
    /// The database volume is kept unless `opts.destroy_data`.
    pub async fn teardown_stack(
        &self,
        site: &Site,
        opts: TeardownOptions,
    ) -> Result<(), CoreError> {
        let names = self.names(site);
        let grace = self.config.stop_grace;

        for role in Role::STOP_ORDER {
            let container = names.container(role);
            let res = self.runtime.stop_container(&container, grace).await;
            absorb_gone(res, "stop role container")?;
            let res = self.runtime.remove_container(&container, true).await;
            absorb_gone(res, "remove role container")?;
        }

        let res = self.runtime.remove_network(&names.network()).await;
        absorb_gone(res, "remove site network")?;

        if opts.destroy_data {
            let res = self.runtime.remove_volume(&names.volume()).await;
            absorb_gone(res, "remove database volume")?;
            info!(site = %site.slug, "stack and data removed");
        } else {
            info!(site = %site.slug, "stack removed; data kept");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use stackyard_runtime::{MemoryRuntime, RuntimeCall};

    use super::*;
    use crate::model::SiteId;

    fn site() -> Site {
        Site {
            id: SiteId::new(),
            name: "My Blog".into(),
            slug: "my-blog".into(),
            domain: "my-blog.localhost".into(),
            files_dir: PathBuf::from("/srv/my-blog"),
            public_dir: String::new(),
            php_version: "8.3".into(),
            database_version: "8.4".into(),
            cache_version: "7.4".into(),
            db_password: "secret".into(),
            started: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn provisioner() -> (Arc<MemoryRuntime>, StackProvisioner) {
        let rt = Arc::new(MemoryRuntime::new());
        rt.create_network(&NetworkSpec::bridge("yard-global"))
            .await
            .expect("global network");
        let config = EngineConfig::new("/base", "/sites").with_prefix("yard");
        let prov = StackProvisioner::new(rt.clone(), Arc::new(config));
        (rt, prov)
    }

    #[test]
    fn role_specs_differ_only_where_roles_differ() {
        let config = EngineConfig::new("/base", "/sites").with_prefix("yard");
        let prov = StackProvisioner::new(Arc::new(MemoryRuntime::new()), Arc::new(config));
        let site = site();

        let web = prov.container_spec(&site, Role::Web);
        assert_eq!(web.name, "yard-my-blog-web");
        assert_eq!(
            web.networks,
            vec![
                NetworkAttachment::new("yard-my-blog", &["web"]),
                NetworkAttachment::new("yard-global", &["yard-my-blog-web"]),
            ]
        );

        let db = prov.container_spec(&site, Role::Database);
        assert_eq!(db.image, "mysql:8.4");
        assert_eq!(db.networks.len(), 1);
        assert!(
            db.mounts
                .contains(&Mount::volume("yard-my-blog-dbdata", "/var/lib/mysql"))
        );

        let app = prov.container_spec(&site, Role::App);
        assert_eq!(app.image, "wodby/php:8.3");
        assert_eq!(app.env.get("MYSQL_PASSWORD").map(String::as_str), Some("secret"));
        assert!(app.mounts.iter().any(|m| m.read_only && m.target == PHP_INI_TARGET));

        assert_eq!(prov.container_spec(&site, Role::Cache).image, "redis:7.4-alpine");
    }

    #[tokio::test]
    async fn provision_creates_in_order_and_starts_dependencies_first() {
        let (rt, prov) = provisioner().await;
        let site = site();
        rt.clear_journal().await;

        let outcome = prov
            .provision_stack(&site, &CancellationToken::new())
            .await
            .expect("provision");
        assert_eq!(outcome, ProvisionOutcome::Created);

        let journal = rt.journal().await;
        let created: Vec<_> = journal
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::CreateContainer(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![
                "yard-my-blog-web",
                "yard-my-blog-app",
                "yard-my-blog-database",
                "yard-my-blog-cache"
            ]
        );
        let started: Vec<_> = journal
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::StartContainer(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            started,
            vec![
                "yard-my-blog-database",
                "yard-my-blog-cache",
                "yard-my-blog-app",
                "yard-my-blog-web"
            ]
        );
        assert!(prov.stack_running(&site).await.expect("check"));
    }

    #[tokio::test]
    async fn resume_creates_only_missing_members() {
        let (rt, prov) = provisioner().await;
        let site = site();
        rt.fail_next_create("yard-my-blog-cache").await;
        let cancel = CancellationToken::new();

        prov.provision_stack(&site, &cancel)
            .await
            .expect_err("injected failure");
        rt.clear_journal().await;

        let outcome = prov
            .provision_stack(&site, &cancel)
            .await
            .expect("second attempt");
        assert_eq!(outcome, ProvisionOutcome::Resumed);
        assert_eq!(rt.container_creations().await, 1);
        assert!(prov.stack_running(&site).await.expect("check"));
    }

    #[tokio::test]
    async fn existing_container_rejoins_networks_it_lost() {
        let (rt, prov) = provisioner().await;
        let site = site();
        rt.create_network(&NetworkSpec::bridge("yard-my-blog"))
            .await
            .expect("private network");

        // Created, but the attach to the shared network never happened.
        let mut web = prov.container_spec(&site, Role::Web);
        web.networks.truncate(1);
        rt.seed_image(&web.image).await;
        rt.create_container(&web).await.expect("half-wired web");

        prov.provision_stack(&site, &CancellationToken::new())
            .await
            .expect("provision");

        let nets = rt.container_networks("yard-my-blog-web").await;
        assert_eq!(
            nets.get("yard-global").map(Vec::as_slice),
            Some(&["yard-my-blog-web".to_owned()][..])
        );
        assert!(rt.journal().await.contains(&RuntimeCall::ConnectNetwork {
            container: "yard-my-blog-web".into(),
            network: "yard-global".into(),
        }));

        rt.clear_journal().await;
        prov.provision_stack(&site, &CancellationToken::new())
            .await
            .expect("again");
        assert!(!rt
            .journal()
            .await
            .iter()
            .any(|c| matches!(c, RuntimeCall::ConnectNetwork { .. })));
    }

    #[tokio::test]
    async fn teardown_keeps_volume_unless_destroying() {
        let (rt, prov) = provisioner().await;
        let site = site();
        let cancel = CancellationToken::new();

        prov.provision_stack(&site, &cancel).await.expect("provision");
        prov.teardown_stack(&site, TeardownOptions::default())
            .await
            .expect("teardown");
        assert_eq!(rt.container_names().await, Vec::<String>::new());
        assert_eq!(rt.network_names().await, vec!["yard-global"]);
        assert_eq!(rt.volume_names().await, vec!["yard-my-blog-dbdata"]);

        prov.teardown_stack(&site, TeardownOptions::default())
            .await
            .expect("teardown of nothing is fine");
        prov.teardown_stack(&site, TeardownOptions { destroy_data: true })
            .await
            .expect("destroy");
        assert!(rt.volume_names().await.is_empty());
    }
}
