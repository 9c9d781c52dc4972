// ── Site orchestrator ──
//
// Public entry point of the engine. Sequences bootstrapper, provisioner
// and proxy for each lifecycle operation, persists the outcome and tells
// the event sink. The registry is always written after the runtime work
// it describes has succeeded. Lifecycle steps on one site are exclusive
// across processes through `locks/site-<id>.lock`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use stackyard_runtime::{ExecOutput, RuntimeGateway};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{self, BootstrapOutcome, ExportMetadata, ExportReport};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::events::{EventSink, NoopSink};
use crate::fs::{self, FileLock};
use crate::infra::{Bootstrapper, InfraReport, PurgeReport};
use crate::layout::Layout;
use crate::model::naming::RESERVED_SLUG;
use crate::model::{NewSite, Role, Site, SiteId, SiteState, SiteUpdate, slugify};
use crate::proxy::{Activation, ProxyController, clean_public_dir};
use crate::registry::SiteRegistry;
use crate::stack::{StackProvisioner, TeardownOptions};

const PASSWORD_LEN: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also remove the database volume and the content directory.
    pub destroy_data: bool,
}

/// What `initialize` found and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub purged: PurgeReport,
    /// Sites whose `started` flag was cleared.
    pub reconciled: usize,
    pub infra: InfraReport,
}

/// Exclusive hold on one site. Fields drop in order: file lock first.
struct SiteGuard {
    file: FileLock,
    _local: OwnedMutexGuard<()>,
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// Cheaply cloneable handle over one engine instance.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: Arc<EngineConfig>,
    layout: Layout,
    runtime: Arc<dyn RuntimeGateway>,
    registry: Arc<dyn SiteRegistry>,
    events: Arc<dyn EventSink>,
    infra: Bootstrapper,
    stacks: StackProvisioner,
    proxy: ProxyController,
    /// One lifecycle operation per site at a time.
    site_locks: DashMap<SiteId, Arc<Mutex<()>>>,
    /// Serialises slug collision checks with the insert that follows.
    create_lock: Mutex<()>,
    /// Transitional states; absent means "derive from `started`".
    states: DashMap<SiteId, SiteState>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        runtime: Arc<dyn RuntimeGateway>,
        registry: Arc<dyn SiteRegistry>,
    ) -> Self {
        Self::with_events(config, runtime, registry, Arc::new(NoopSink))
    }

    pub fn with_events(
        config: EngineConfig,
        runtime: Arc<dyn RuntimeGateway>,
        registry: Arc<dyn SiteRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            inner: Arc::new(OrchestratorInner {
                layout: Layout::new(&config),
                infra: Bootstrapper::new(runtime.clone(), config.clone()),
                stacks: StackProvisioner::new(runtime.clone(), config.clone()),
                proxy: ProxyController::new(runtime.clone(), &config),
                config,
                runtime,
                registry,
                events,
                site_locks: DashMap::new(),
                create_lock: Mutex::new(()),
                states: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    // ── Startup / shutdown ───────────────────────────────────────────

    /// Bring the engine to a known state: check the runtime, lay out the
    /// base directory, purge leftovers from a previous run, clear stale
    /// `started` flags, rewrite routing files (no reload) and make sure
    /// the shared services run.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<InitReport, CoreError> {
        let inner = &self.inner;
        inner.runtime.ping().await?;
        inner.layout.prepare().await?;

        let purged = inner.infra.purge().await?;
        let reconciled = self.reconcile().await?;

        inner.proxy.prepare().await?;
        inner
            .proxy
            .refresh(inner.registry.as_ref(), false, cancel)
            .await?;

        let infra = inner.infra.ensure_global_infrastructure(cancel).await?;
        info!(
            reconciled,
            purged = purged.containers.len(),
            "engine initialized"
        );
        Ok(InitReport {
            purged,
            reconciled,
            infra,
        })
    }

    /// Remove every container and network this engine owns and mark all
    /// sites stopped. Volumes and content are kept.
    pub async fn shutdown(&self) -> Result<PurgeReport, CoreError> {
        let report = self.inner.infra.purge().await?;
        let reconciled = self.reconcile().await?;
        info!(reconciled, "engine shut down");
        Ok(report)
    }

    /// Clear `started` on every site. Touches nothing but the registry;
    /// callers decide whether to provision or reload afterwards.
    pub async fn reconcile(&self) -> Result<usize, CoreError> {
        let mut cleared = 0;
        for mut site in self.inner.registry.get_sites().await? {
            if !site.started {
                continue;
            }
            let _guard = self.lock_site(site.id).await?;
            site.started = false;
            let site = self.inner.registry.update_site(site).await?;
            self.set_state(&site, SiteState::Stopped);
            cleared += 1;
        }
        if cleared > 0 {
            info!(cleared, "reconciled stale started flags");
            self.emit_sites().await;
        }
        Ok(cleared)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn list_sites(&self) -> Result<Vec<Site>, CoreError> {
        self.inner.registry.get_sites().await
    }

    pub async fn get_site(&self, id: SiteId) -> Result<Site, CoreError> {
        self.inner
            .registry
            .get_site(id)
            .await?
            .ok_or_else(|| CoreError::SiteNotFound {
                identifier: id.to_string(),
            })
    }

    /// Resolve an id, slug or (case-insensitive) name.
    pub async fn find_site(&self, identifier: &str) -> Result<Site, CoreError> {
        if let Ok(id) = identifier.parse::<SiteId>() {
            if let Some(site) = self.inner.registry.get_site(id).await? {
                return Ok(site);
            }
        }
        let sites = self.inner.registry.get_sites().await?;
        sites
            .iter()
            .find(|s| s.slug == identifier)
            .or_else(|| sites.iter().find(|s| s.name.eq_ignore_ascii_case(identifier)))
            .cloned()
            .ok_or_else(|| CoreError::SiteNotFound {
                identifier: identifier.to_owned(),
            })
    }

    pub async fn site_state(&self, id: SiteId) -> Result<SiteState, CoreError> {
        if let Some(state) = self.inner.states.get(&id) {
            return Ok(*state);
        }
        let site = self.get_site(id).await?;
        Ok(if site.started {
            SiteState::Started
        } else {
            SiteState::Stopped
        })
    }

    // ── Create / edit ────────────────────────────────────────────────

    pub async fn create_site(&self, new: NewSite) -> Result<Site, CoreError> {
        let name = new.name.trim().to_owned();
        if name.is_empty() {
            return Err(CoreError::validation("site name must not be empty"));
        }
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(CoreError::validation(format!(
                "site name '{name}' needs at least one letter or digit"
            )));
        }
        if slug == RESERVED_SLUG {
            return Err(CoreError::validation(format!(
                "'{RESERVED_SLUG}' is reserved for shared infrastructure"
            )));
        }

        let defaults = &self.inner.config.defaults;
        let public_dir = clean_public_dir(new.public_dir.as_deref().unwrap_or_default())?;
        let php_version = version("PHP", new.php_version, &defaults.php)?;
        let database_version = version("database", new.database_version, &defaults.database)?;
        let cache_version = version("cache", new.cache_version, &defaults.cache)?;

        let _local = self.inner.create_lock.lock().await;
        let _file = FileLock::acquire(&self.inner.layout.create_lock()).await?;
        let existing = self.inner.registry.get_sites().await?;
        if existing.iter().any(|s| s.slug == slug) {
            return Err(CoreError::SlugCollision { slug });
        }

        let files_dir = new
            .files_dir
            .unwrap_or_else(|| self.inner.layout.default_content_dir(&slug));
        fs::ensure_dir(&files_dir).await?;

        let now = Utc::now();
        let site = Site {
            id: SiteId::new(),
            name,
            domain: format!("{slug}.localhost"),
            slug,
            files_dir,
            public_dir,
            php_version,
            database_version,
            cache_version,
            db_password: generate_password(),
            started: false,
            created_at: now,
            updated_at: now,
        };
        let site = self.inner.registry.add_site(site).await?;
        info!(site = %site.slug, id = %site.id, "site created");

        self.set_state(&site, SiteState::Stopped);
        self.emit_sites().await;
        Ok(site)
    }

    /// Edit name, versions or served directory. Slug and domain never
    /// change; stack settings only change while stopped.
    pub async fn update_site(&self, id: SiteId, update: SiteUpdate) -> Result<Site, CoreError> {
        let _guard = self.lock_site(id).await?;
        let mut site = self.get_site(id).await?;

        if update.touches_stack() && site.started {
            return Err(CoreError::InvalidState {
                slug: site.slug,
                state: SiteState::Started.to_string(),
                action: "changing stack settings".into(),
            });
        }

        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(CoreError::validation("site name must not be empty"));
            }
            name.clone_into(&mut site.name);
        }
        if let Some(dir) = update.public_dir {
            site.public_dir = clean_public_dir(&dir)?;
        }
        if let Some(v) = update.php_version {
            site.php_version = version("PHP", Some(v), "")?;
        }
        if let Some(v) = update.database_version {
            site.database_version = version("database", Some(v), "")?;
        }
        if let Some(v) = update.cache_version {
            site.cache_version = version("cache", Some(v), "")?;
        }

        let site = self.inner.registry.update_site(site).await?;
        debug!(site = %site.slug, "site updated");
        self.emit_sites().await;
        Ok(site)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bring a site's stack up and route its domain to it. Starting a
    /// site whose stack already runs changes nothing.
    pub async fn start_site(
        &self,
        id: SiteId,
        cancel: &CancellationToken,
    ) -> Result<Site, CoreError> {
        let _guard = self.lock_site(id).await?;
        let site = self.get_site(id).await?;

        if site.started && self.inner.stacks.stack_running(&site).await? {
            debug!(site = %site.slug, "already started");
            return Ok(site);
        }

        self.set_state(&site, SiteState::Starting);
        let site = match self.bring_up(site.clone(), cancel).await {
            Ok(site) => site,
            Err(e) => {
                warn!(site = %site.slug, error = %e, "start failed");
                self.settle_state(&site);
                return Err(e);
            }
        };
        if let Err(e) = self.refresh_routing(cancel).await {
            warn!(site = %site.slug, error = %e, "routing rejected; rolling start back");
            self.roll_back_start(site).await;
            return Err(e);
        }
        self.set_state(&site, SiteState::Started);
        info!(site = %site.slug, domain = %site.domain, "site started");
        self.emit_sites().await;
        Ok(site)
    }

    /// Undo a start whose routing step failed, so the site stays out of
    /// every later routing pass. Routing files were already restored by
    /// the failed pass. Best effort: the routing error is what the caller
    /// sees.
    async fn roll_back_start(&self, mut site: Site) {
        if let Err(e) = self
            .inner
            .stacks
            .teardown_stack(&site, TeardownOptions::default())
            .await
        {
            warn!(site = %site.slug, error = %e, "rollback teardown failed");
        }
        site.started = false;
        match self.inner.registry.update_site(site.clone()).await {
            Ok(updated) => site = updated,
            Err(e) => warn!(site = %site.slug, error = %e, "rollback could not clear started"),
        }
        self.settle_state(&site);
        self.emit_sites().await;
    }

    async fn bring_up(
        &self,
        mut site: Site,
        cancel: &CancellationToken,
    ) -> Result<Site, CoreError> {
        let inner = &self.inner;
        inner.layout.prepare().await?;
        inner.proxy.prepare().await?;
        inner.infra.ensure_global_infrastructure(cancel).await?;

        if let Some(source) = &inner.config.content_source {
            let served = served_dir(&site)?;
            if let BootstrapOutcome::Extracted(stats) =
                archive::bootstrap_content(source, &served, cancel).await?
            {
                info!(site = %site.slug, files = stats.files, "content seeded");
            }
        }

        inner.proxy.write_site_config(&site).await?;
        let outcome = inner.stacks.provision_stack(&site, cancel).await?;
        debug!(site = %site.slug, ?outcome, "stack provisioned");

        site.started = true;
        inner.registry.update_site(site).await
    }

    /// Tear the stack down (data kept) and drop the site from routing.
    pub async fn stop_site(&self, id: SiteId) -> Result<Site, CoreError> {
        let _guard = self.lock_site(id).await?;
        let mut site = self.get_site(id).await?;

        self.set_state(&site, SiteState::Stopping);
        if let Err(e) = self
            .inner
            .stacks
            .teardown_stack(&site, TeardownOptions::default())
            .await
        {
            warn!(site = %site.slug, error = %e, "stop failed");
            self.settle_state(&site);
            return Err(e);
        }

        site.started = false;
        let site = self.inner.registry.update_site(site).await?;
        self.set_state(&site, SiteState::Stopped);
        info!(site = %site.slug, "site stopped");

        self.refresh_routing(&CancellationToken::new()).await?;
        self.emit_sites().await;
        Ok(site)
    }

    /// Remove a site. Its database volume and content directory survive
    /// unless `opts.destroy_data` is set.
    pub async fn delete_site(&self, id: SiteId, opts: DeleteOptions) -> Result<(), CoreError> {
        let guard = self.lock_site(id).await?;
        let site = self.get_site(id).await?;

        if site.started {
            self.set_state(&site, SiteState::Stopping);
        }
        let teardown = TeardownOptions {
            destroy_data: opts.destroy_data,
        };
        if let Err(e) = self.inner.stacks.teardown_stack(&site, teardown).await {
            self.settle_state(&site);
            return Err(e);
        }
        self.inner.proxy.remove_site_config(&site).await?;

        if opts.destroy_data {
            match tokio::fs::remove_dir_all(&site.files_dir).await {
                Ok(()) => debug!(path = %site.files_dir.display(), "content removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CoreError::io(&site.files_dir, e)),
            }
        }

        self.inner.registry.delete_site(id).await?;
        self.inner.states.remove(&id);
        self.inner.events.site_changed(&site, SiteState::Deleted);
        info!(site = %site.slug, destroy_data = opts.destroy_data, "site deleted");

        self.refresh_routing(&CancellationToken::new()).await?;
        self.emit_sites().await;
        fs::remove_file_if_exists(guard.file.path()).await?;
        drop(guard);
        self.inner.site_locks.remove(&id);
        Ok(())
    }

    // ── Operations on running sites ──────────────────────────────────

    /// Last `lines` lines of one role container's log.
    pub async fn site_logs(
        &self,
        id: SiteId,
        role: Role,
        lines: usize,
    ) -> Result<String, CoreError> {
        let site = self.get_site(id).await?;
        let container = self.inner.stacks.names(&site).container(role);
        Ok(self.inner.runtime.logs(&container, lines).await?)
    }

    /// Run a command (WP-CLI, composer, a shell one-liner) in the app
    /// container. A non-zero exit is an error carrying the output.
    pub async fn run_app_command(
        &self,
        id: SiteId,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, CoreError> {
        if args.is_empty() {
            return Err(CoreError::validation("no command given"));
        }
        let site = self.get_site(id).await?;
        self.require_started(&site, "running commands")?;

        let container = self.inner.stacks.names(&site).container(Role::App);
        let out = self.inner.runtime.exec(&container, args, cancel).await?;
        if !out.success() {
            return Err(CoreError::ExecFailed {
                container,
                command: args.join(" "),
                exit_code: out.exit_code,
                output: out.output,
            });
        }
        Ok(out)
    }

    /// Write a database dump plus the content tree to `dest` (tar.gz).
    pub async fn export_site(
        &self,
        id: SiteId,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExportReport, CoreError> {
        let _guard = self.lock_site(id).await?;
        let site = self.get_site(id).await?;
        self.require_started(&site, "export")?;
        if !self.inner.stacks.stack_running(&site).await? {
            return Err(CoreError::InvalidState {
                slug: site.slug,
                state: "not running".into(),
                action: "export".into(),
            });
        }

        let db = self.inner.stacks.names(&site).container(Role::Database);
        let runtime = self.inner.runtime.as_ref();
        let dump = archive::export::dump_database(runtime, &db, &site.db_password, cancel).await?;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        archive::write_export(dest, ExportMetadata::new(&site), dump, &site.files_dir).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn lock_site(&self, id: SiteId) -> Result<SiteGuard, CoreError> {
        let local = self.inner.site_locks.entry(id).or_default().clone();
        let local = local.lock_owned().await;
        let file = FileLock::acquire(&self.inner.layout.site_lock(id)).await?;
        Ok(SiteGuard {
            file,
            _local: local,
        })
    }

    fn set_state(&self, site: &Site, state: SiteState) {
        self.inner.states.insert(site.id, state);
        self.inner.events.site_changed(site, state);
    }

    /// After a failed transition, fall back to what the registry says.
    fn settle_state(&self, site: &Site) {
        let state = if site.started {
            SiteState::Started
        } else {
            SiteState::Stopped
        };
        self.set_state(site, state);
    }

    fn require_started(&self, site: &Site, action: &str) -> Result<(), CoreError> {
        if site.started {
            return Ok(());
        }
        let state = self
            .inner
            .states
            .get(&site.id)
            .map_or(SiteState::Stopped, |s| *s);
        Err(CoreError::InvalidState {
            slug: site.slug.clone(),
            state: state.to_string(),
            action: action.into(),
        })
    }

    /// Rewrite vhosts and map from the registry, then validate and reload.
    async fn refresh_routing(&self, cancel: &CancellationToken) -> Result<Activation, CoreError> {
        self.inner
            .proxy
            .refresh(self.inner.registry.as_ref(), true, cancel)
            .await
    }

    async fn emit_sites(&self) {
        match self.inner.registry.get_sites().await {
            Ok(sites) => self.inner.events.sites_changed(&sites),
            Err(e) => warn!(error = %e, "could not load sites for event"),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn generate_password() -> String {
    let mut out = String::with_capacity(PASSWORD_LEN);
    while out.len() < PASSWORD_LEN {
        out.extend(Uuid::new_v4().simple().to_string().chars());
    }
    out.truncate(PASSWORD_LEN);
    out
}

/// Validate a version pin, falling back to `default` when unset.
fn version(label: &str, value: Option<String>, default: &str) -> Result<String, CoreError> {
    let v = value.unwrap_or_else(|| default.to_owned());
    let v = v.trim();
    let valid = !v.is_empty()
        && v
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(v.to_owned())
    } else {
        Err(CoreError::validation(format!(
            "{label} version '{v}' is not a valid image tag"
        )))
    }
}

/// Host directory a site serves from.
fn served_dir(site: &Site) -> Result<PathBuf, CoreError> {
    let public = clean_public_dir(&site.public_dir)?;
    Ok(if public.is_empty() {
        site.files_dir.clone()
    } else {
        site.files_dir.join(public)
    })
}
