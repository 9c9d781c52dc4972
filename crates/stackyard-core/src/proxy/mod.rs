// ── Reverse proxy controller ──
//
// Owns every file under the proxy config directory. A regeneration writes
// the vhosts of started sites plus the map, validates inside the running
// proxy and only then reloads. If validation fails the previous files are
// put back, so the proxy never sees a half-applied change. The whole
// write-validate-reload sequence runs under `locks/routing.lock`, shared
// with every other process using the same base directory.

pub mod render;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use stackyard_runtime::RuntimeGateway;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::fs::{self, FileLock};
use crate::layout::{Layout, PROXY_CONFIG_MOUNT};
use crate::model::{GlobalNames, Role, Site, StackNames};
use crate::registry::SiteRegistry;

pub use render::{
    clean_public_dir, nginx_root, render_global_config, render_global_map, render_site_config,
    render_web_config,
};

/// What happened to the running proxy after a regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Files written; the caller asked not to touch the proxy.
    NotRequested,
    /// Files written; the proxy container is not running.
    ProxyDown,
    /// Validated and reloaded.
    Reloaded,
}

/// A file's contents before this pass touched it.
struct Snapshot {
    path: PathBuf,
    previous: Option<Vec<u8>>,
}

/// Held for one pass over the routing files. Fields drop in order, so the
/// file lock goes before the in-process one.
struct RoutingGuard<'a> {
    _file: FileLock,
    _local: MutexGuard<'a, ()>,
}

pub struct ProxyController {
    runtime: Arc<dyn RuntimeGateway>,
    layout: Layout,
    prefix: String,
    proxy_container: String,
    lock: Mutex<()>,
}

impl ProxyController {
    pub fn new(runtime: Arc<dyn RuntimeGateway>, config: &EngineConfig) -> Self {
        Self {
            runtime,
            layout: Layout::new(config),
            prefix: config.prefix.clone(),
            proxy_container: GlobalNames::new(&config.prefix).proxy(),
            lock: Mutex::new(()),
        }
    }

    fn web_container(&self, site: &Site) -> String {
        StackNames::new(&self.prefix, &site.slug).container(Role::Web)
    }

    fn main_conf_in_container() -> String {
        format!("{PROXY_CONFIG_MOUNT}/nginx.conf")
    }

    async fn routing_guard(&self) -> Result<RoutingGuard<'_>, CoreError> {
        let local = self.lock.lock().await;
        let file = FileLock::acquire(&self.layout.routing_lock()).await?;
        Ok(RoutingGuard {
            _file: file,
            _local: local,
        })
    }

    /// Write the main config and, if there is none yet, an empty map so the
    /// proxy can start before any site exists.
    pub async fn prepare(&self) -> Result<(), CoreError> {
        let _guard = self.routing_guard().await?;
        fs::ensure_dir(&self.layout.proxy_sites_dir()).await?;
        write_if_changed(&self.layout.proxy_main_conf(), &render_global_config()).await?;
        if fs::read_optional(&self.layout.map_conf()).await?.is_none() {
            let empty = render_global_map(&[], |s| self.web_container(s));
            fs::write_atomic(&self.layout.map_conf(), empty.as_bytes()).await?;
        }
        Ok(())
    }

    // ── Per-site files ───────────────────────────────────────────────

    /// Write the config of `site`'s own web server. Routing files (vhost
    /// and map) only change inside [`regenerate`](Self::regenerate).
    pub async fn write_site_config(&self, site: &Site) -> Result<(), CoreError> {
        let web_conf = render_web_config(site)?;
        fs::ensure_dir(&self.layout.site_web_dir(&site.slug)).await?;
        write_if_changed(&self.layout.site_web_conf(&site.slug), &web_conf).await?;
        debug!(site = %site.slug, "web server config written");
        Ok(())
    }

    /// Delete `site`'s vhost and web server config. Absent files are fine.
    pub async fn remove_site_config(&self, site: &Site) -> Result<(), CoreError> {
        let _guard = self.routing_guard().await?;
        fs::remove_file_if_exists(&self.layout.site_proxy_conf(&site.slug)).await?;

        let web_dir = self.layout.site_web_dir(&site.slug);
        match tokio::fs::remove_dir_all(&web_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::io(&web_dir, e)),
        }
        debug!(site = %site.slug, "site configs removed");
        Ok(())
    }

    // ── Regenerate + activate ────────────────────────────────────────

    /// [`regenerate`](Self::regenerate) from the registry as it stands
    /// once the routing lock is held, so a pass never works from a list
    /// another process has since changed.
    pub async fn refresh(
        &self,
        registry: &dyn SiteRegistry,
        activate: bool,
        cancel: &CancellationToken,
    ) -> Result<Activation, CoreError> {
        let _guard = self.routing_guard().await?;
        let sites = registry.get_sites().await?;
        self.regenerate_locked(&sites, activate, cancel).await
    }

    /// Rewrite the vhosts of started sites and the map from `sites` (the
    /// whole registry), dropping every other vhost. With `activate`,
    /// validate and reload the running proxy; a failed validation restores
    /// the previous files.
    pub async fn regenerate(
        &self,
        sites: &[Site],
        activate: bool,
        cancel: &CancellationToken,
    ) -> Result<Activation, CoreError> {
        let _guard = self.routing_guard().await?;
        self.regenerate_locked(sites, activate, cancel).await
    }

    async fn regenerate_locked(
        &self,
        sites: &[Site],
        activate: bool,
        cancel: &CancellationToken,
    ) -> Result<Activation, CoreError> {
        let mut snapshots = Vec::new();

        let result = self.write_routing(sites, &mut snapshots).await;
        if let Err(e) = result {
            restore(snapshots).await;
            return Err(e);
        }
        debug!(
            sites = sites.len(),
            changed = snapshots.len(),
            "routing files regenerated"
        );

        if !activate {
            return Ok(Activation::NotRequested);
        }
        match self.activate_locked(cancel).await {
            Ok(activation) => Ok(activation),
            Err(e) => {
                if !snapshots.is_empty() {
                    warn!(error = %e, files = snapshots.len(), "activation failed; restoring routing files");
                    restore(snapshots).await;
                }
                Err(e)
            }
        }
    }

    /// Validate and reload the proxy with whatever is on disk.
    pub async fn activate(&self, cancel: &CancellationToken) -> Result<Activation, CoreError> {
        let _guard = self.routing_guard().await?;
        self.activate_locked(cancel).await
    }

    async fn write_routing(
        &self,
        sites: &[Site],
        snapshots: &mut Vec<Snapshot>,
    ) -> Result<(), CoreError> {
        fs::ensure_dir(&self.layout.proxy_sites_dir()).await?;

        let routed: Vec<&Site> = sites.iter().filter(|s| s.started).collect();
        let wanted: BTreeSet<PathBuf> = routed
            .iter()
            .map(|s| self.layout.site_proxy_conf(&s.slug))
            .collect();
        for stale in self.existing_site_confs().await? {
            if !wanted.contains(&stale) {
                let previous = fs::read_optional(&stale).await?;
                fs::remove_file_if_exists(&stale).await?;
                snapshots.push(Snapshot {
                    path: stale,
                    previous,
                });
            }
        }

        for site in routed {
            let path = self.layout.site_proxy_conf(&site.slug);
            if let Some(snap) = write_if_changed(&path, &render_site_config(site)).await? {
                snapshots.push(snap);
            }
        }

        let map = render_global_map(sites, |s| self.web_container(s));
        if let Some(snap) = write_if_changed(&self.layout.map_conf(), &map).await? {
            snapshots.push(snap);
        }
        Ok(())
    }

    async fn existing_site_confs(&self) -> Result<Vec<PathBuf>, CoreError> {
        let dir = self.layout.proxy_sites_dir();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| CoreError::io(&dir, e))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "conf") {
                found.push(path);
            }
        }
        Ok(found)
    }

    async fn activate_locked(&self, cancel: &CancellationToken) -> Result<Activation, CoreError> {
        if !self.runtime.container_running(&self.proxy_container).await? {
            warn!(container = %self.proxy_container, "proxy not running; reload skipped");
            return Ok(Activation::ProxyDown);
        }

        let conf = Self::main_conf_in_container();
        let test = vec!["nginx".to_owned(), "-t".into(), "-c".into(), conf.clone()];
        let checked = self
            .runtime
            .exec(&self.proxy_container, &test, cancel)
            .await?;
        if !checked.success() {
            warn!(exit_code = checked.exit_code, "proxy config validation failed");
            return Err(CoreError::ConfigValidationFailed {
                output: checked.output,
            });
        }

        let reload = vec![
            "nginx".to_owned(),
            "-c".into(),
            conf,
            "-s".into(),
            "reload".into(),
        ];
        let reloaded = self
            .runtime
            .exec(&self.proxy_container, &reload, cancel)
            .await?;
        if !reloaded.success() {
            return Err(CoreError::ExecFailed {
                container: self.proxy_container.clone(),
                command: reload.join(" "),
                exit_code: reloaded.exit_code,
                output: reloaded.output,
            });
        }
        info!("proxy reloaded");
        Ok(Activation::Reloaded)
    }
}

/// Write `contents` unless the file already holds exactly that. Returns the
/// previous state when something was written.
async fn write_if_changed(
    path: &std::path::Path,
    contents: &str,
) -> Result<Option<Snapshot>, CoreError> {
    let previous = fs::read_optional(path).await?;
    if previous.as_deref() == Some(contents.as_bytes()) {
        return Ok(None);
    }
    fs::write_atomic(path, contents.as_bytes()).await?;
    Ok(Some(Snapshot {
        path: path.to_path_buf(),
        previous,
    }))
}

/// Put files back the way they were, newest change first. Best effort: a
/// failure here is logged, the original error is what the caller sees.
async fn restore(snapshots: Vec<Snapshot>) {
    for snap in snapshots.into_iter().rev() {
        let res = match &snap.previous {
            Some(bytes) => fs::write_atomic(&snap.path, bytes).await,
            None => fs::remove_file_if_exists(&snap.path).await,
        };
        if let Err(e) = res {
            warn!(path = %snap.path.display(), error = %e, "failed to restore routing file");
        }
    }
}
