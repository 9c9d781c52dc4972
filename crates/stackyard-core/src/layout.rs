// ── On-disk layout ──
//
// base_dir/
//   config/nginx/proxy/nginx.conf      shared proxy main config
//   config/nginx/proxy/map.conf        routing map (started sites only)
//   config/nginx/proxy/sites/<slug>.conf
//   config/nginx/web/<slug>/nginx.conf config for a site's own web server
//   config/php/php.ini                 shared runtime config (read-only in app)
//   config/db/db.cnf                   shared database config
//   sites.json                         site registry
//   locks/create.lock                  held while a new site is registered
//   locks/routing.lock                 held while routing files change
//   locks/site-<id>.lock               held during a site's lifecycle step
// sites_root/<slug>/                   default content directory
//
// The proxy and web containers mount *directories*, never single files,
// so a rename-over inside them is visible without a restart.

use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::fs;

/// Mount point of `config/nginx/proxy` inside the proxy container.
pub const PROXY_CONFIG_MOUNT: &str = "/etc/nginx/stackyard";
/// Mount point of `config/nginx/web/<slug>` inside a site's web container.
pub const WEB_CONFIG_MOUNT: &str = "/etc/nginx/site";
/// Document root inside web and app containers.
pub const DOCUMENT_ROOT: &str = "/var/www/html";

const DEFAULT_PHP_INI: &str = "\
; Shared PHP settings for every stackyard site.
memory_limit = 512M
upload_max_filesize = 128M
post_max_size = 128M
max_execution_time = 300
display_errors = On
sendmail_path = \"/usr/sbin/sendmail -S host.docker.internal:1025\"
";

const DEFAULT_DB_CNF: &str = "\
[mysqld]
character-set-server = utf8mb4
collation-server = utf8mb4_unicode_ci
max_allowed_packet = 128M
";

/// Resolved paths for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
    sites_root: PathBuf,
}

impl Layout {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: config.base_dir.clone(),
            sites_root: config.sites_root.clone(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    // ── Proxy ────────────────────────────────────────────────────────

    /// Directory mounted into the shared proxy.
    pub fn proxy_dir(&self) -> PathBuf {
        self.base.join("config").join("nginx").join("proxy")
    }

    pub fn proxy_main_conf(&self) -> PathBuf {
        self.proxy_dir().join("nginx.conf")
    }

    pub fn map_conf(&self) -> PathBuf {
        self.proxy_dir().join("map.conf")
    }

    pub fn proxy_sites_dir(&self) -> PathBuf {
        self.proxy_dir().join("sites")
    }

    pub fn site_proxy_conf(&self, slug: &str) -> PathBuf {
        self.proxy_sites_dir().join(format!("{slug}.conf"))
    }

    // ── Per-site web server ──────────────────────────────────────────

    /// Directory mounted into a site's web container.
    pub fn site_web_dir(&self, slug: &str) -> PathBuf {
        self.base.join("config").join("nginx").join("web").join(slug)
    }

    pub fn site_web_conf(&self, slug: &str) -> PathBuf {
        self.site_web_dir(slug).join("nginx.conf")
    }

    // ── Shared runtime configs ───────────────────────────────────────

    pub fn php_ini(&self) -> PathBuf {
        self.base.join("config").join("php").join("php.ini")
    }

    pub fn db_cnf(&self) -> PathBuf {
        self.base.join("config").join("db").join("db.cnf")
    }

    // ── Registry & content ───────────────────────────────────────────

    pub fn registry_file(&self) -> PathBuf {
        self.base.join("sites.json")
    }

    // ── Cross-process locks ──────────────────────────────────────────

    pub fn locks_dir(&self) -> PathBuf {
        self.base.join("locks")
    }

    pub fn routing_lock(&self) -> PathBuf {
        self.locks_dir().join("routing.lock")
    }

    /// Held from the slug collision check until the new site is stored.
    pub fn create_lock(&self) -> PathBuf {
        self.locks_dir().join("create.lock")
    }

    pub fn site_lock(&self, id: impl std::fmt::Display) -> PathBuf {
        self.locks_dir().join(format!("site-{id}.lock"))
    }

    pub fn default_content_dir(&self, slug: &str) -> PathBuf {
        self.sites_root.join(slug)
    }

    /// Create the directory tree and seed shared runtime configs that are
    /// missing. Existing files are left alone so operator edits survive.
    pub async fn prepare(&self) -> Result<(), CoreError> {
        for dir in [
            self.proxy_sites_dir(),
            self.base.join("config").join("nginx").join("web"),
            self.base.join("config").join("php"),
            self.base.join("config").join("db"),
            self.locks_dir(),
            self.sites_root.clone(),
        ] {
            fs::ensure_dir(&dir).await?;
        }

        seed(&self.php_ini(), DEFAULT_PHP_INI).await?;
        seed(&self.db_cnf(), DEFAULT_DB_CNF).await
    }
}

async fn seed(path: &Path, contents: &str) -> Result<(), CoreError> {
    if fs::read_optional(path).await?.is_none() {
        fs::write_atomic(path, contents.as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_seeds_once_and_keeps_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::new(dir.path().join("base"), dir.path().join("sites"));
        let layout = Layout::new(&config);

        layout.prepare().await.expect("prepare");
        assert!(layout.proxy_sites_dir().is_dir());
        assert!(dir.path().join("sites").is_dir());

        std::fs::write(layout.php_ini(), "memory_limit = 1G\n").expect("edit");
        layout.prepare().await.expect("prepare again");
        assert_eq!(
            std::fs::read_to_string(layout.php_ini()).expect("read"),
            "memory_limit = 1G\n"
        );
    }

    #[test]
    fn per_site_paths_are_keyed_by_slug() {
        let config = EngineConfig::new("/b", "/s");
        let layout = Layout::new(&config);
        assert_eq!(
            layout.site_proxy_conf("blog"),
            PathBuf::from("/b/config/nginx/proxy/sites/blog.conf")
        );
        assert_eq!(
            layout.site_web_conf("blog"),
            PathBuf::from("/b/config/nginx/web/blog/nginx.conf")
        );
        assert_eq!(layout.default_content_dir("blog"), PathBuf::from("/s/blog"));
        assert_eq!(
            layout.site_lock("abc"),
            PathBuf::from("/b/locks/site-abc.lock")
        );
    }
}
