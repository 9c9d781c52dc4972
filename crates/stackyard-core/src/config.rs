// ── Engine configuration ──
//
// Describes *where* the engine keeps its files and *which* images and
// names it uses. Never touches disk; stackyard-config (or a test)
// builds one and hands it in.

use std::path::PathBuf;
use std::time::Duration;

/// Images for the shared services and the per-site roles.
///
/// Role images are repositories; the per-site version pin becomes the tag
/// (`<repo>:<version>`, with `-alpine` appended for the cache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub proxy: String,
    pub mail: String,
    pub dbadmin: String,
    pub web: String,
    pub app_repo: String,
    pub database_repo: String,
    pub cache_repo: String,
}

impl Default for ImageSet {
    fn default() -> Self {
        Self {
            proxy: "nginx:1.28".into(),
            mail: "mailhog/mailhog".into(),
            dbadmin: "adminer:latest".into(),
            web: "nginx:1.28-alpine".into(),
            app_repo: "wodby/php".into(),
            database_repo: "mysql".into(),
            cache_repo: "redis".into(),
        }
    }
}

/// Version pins applied when a new site does not choose its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDefaults {
    pub php: String,
    pub database: String,
    pub cache: String,
}

impl Default for VersionDefaults {
    fn default() -> Self {
        Self {
            php: "8.3".into(),
            database: "8.4".into(),
            cache: "7.4".into(),
        }
    }
}

/// Where a new site's initial content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// A `.tar.gz` bundle fetched over HTTP(S).
    Url(url::Url),
    /// A `.tar.gz` bundle on the local filesystem.
    File(PathBuf),
}

impl ContentSource {
    /// Interpret `raw` as an http(s) URL, falling back to a file path.
    pub fn parse(raw: &str) -> Self {
        match url::Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(url),
            _ => Self::File(PathBuf::from(raw)),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix for every runtime object this engine owns. Purging removes
    /// everything carrying it, so it must not be shared with other tools.
    pub prefix: String,
    /// Per-machine directory holding rendered configs and the registry.
    pub base_dir: PathBuf,
    /// Parent of every site's default content directory.
    pub sites_root: PathBuf,
    /// Grace period before a stopping container is killed.
    pub stop_grace: Duration,
    pub images: ImageSet,
    pub defaults: VersionDefaults,
    /// Seed empty content directories from this bundle on start.
    pub content_source: Option<ContentSource>,
    /// Host port the shared proxy listens on.
    pub http_port: u16,
}

impl EngineConfig {
    pub fn new(base_dir: impl Into<PathBuf>, sites_root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: "stackyard".into(),
            base_dir: base_dir.into(),
            sites_root: sites_root.into(),
            stop_grace: Duration::from_secs(10),
            images: ImageSet::default(),
            defaults: VersionDefaults::default(),
            content_source: None,
            http_port: 80,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_content_source(mut self, source: ContentSource) -> Self {
        self.content_source = Some(source);
        self
    }
}
