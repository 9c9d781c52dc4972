// ── JSON file registry ──
//
// The whole registry is one JSON document rewritten atomically on every
// mutation. Several processes may share the file: each mutation holds the
// sibling `<file>.lock` and re-reads the document under it, so no writer
// works from a stale copy. Reads take no lock; the rename-over write means
// they always see a whole document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{SiteRegistry, missing, sort_sites};
use crate::error::CoreError;
use crate::fs::{self, FileLock};
use crate::model::{Site, SiteId};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    sites: Vec<Site>,
}

type SiteMap = BTreeMap<SiteId, Site>;

/// Registry persisted as a JSON file.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    lock_path: PathBuf,
    /// Orders this process's writers ahead of the file lock.
    write_lock: Mutex<()>,
}

impl FileRegistry {
    /// Open (or lazily create) the registry at `path`. An existing file
    /// must parse.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let registry = Self {
            lock_path: path.with_file_name(lock_name),
            path,
            write_lock: Mutex::new(()),
        };
        let sites = registry.load().await?;
        debug!(path = %registry.path.display(), sites = sites.len(), "opened site registry");
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<SiteMap, CoreError> {
        let Some(bytes) = fs::read_optional(&self.path).await? else {
            return Ok(BTreeMap::new());
        };
        let doc: Document = serde_json::from_slice(&bytes).map_err(|e| CoreError::Registry {
            message: format!("{} is not a valid registry: {e}", self.path.display()),
        })?;
        if doc.version > FORMAT_VERSION {
            return Err(CoreError::Registry {
                message: format!(
                    "{} has format version {}, newer than supported {FORMAT_VERSION}",
                    self.path.display(),
                    doc.version
                ),
            });
        }
        Ok(doc.sites.into_iter().map(|s| (s.id, s)).collect())
    }

    async fn persist(&self, sites: &SiteMap) -> Result<(), CoreError> {
        let mut list: Vec<Site> = sites.values().cloned().collect();
        sort_sites(&mut list);
        let doc = Document {
            version: FORMAT_VERSION,
            sites: list,
        };
        let json = serde_json::to_vec_pretty(&doc).map_err(|e| CoreError::Registry {
            message: format!("failed to encode registry: {e}"),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::ensure_dir(parent).await?;
        }
        fs::write_atomic(&self.path, &json).await
    }

    /// Load the current document under both locks, let `change` edit it,
    /// then write it back.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut SiteMap) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _local = self.write_lock.lock().await;
        let _file = FileLock::acquire(&self.lock_path).await?;
        let mut sites = self.load().await?;
        let out = change(&mut sites)?;
        self.persist(&sites).await?;
        Ok(out)
    }
}

#[async_trait]
impl SiteRegistry for FileRegistry {
    async fn get_sites(&self) -> Result<Vec<Site>, CoreError> {
        let mut sites: Vec<Site> = self.load().await?.into_values().collect();
        sort_sites(&mut sites);
        Ok(sites)
    }

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, CoreError> {
        Ok(self.load().await?.remove(&id))
    }

    async fn add_site(&self, mut site: Site) -> Result<Site, CoreError> {
        self.mutate(|sites| {
            if sites.contains_key(&site.id) {
                return Err(CoreError::Registry {
                    message: format!("site {} already registered", site.id),
                });
            }
            let now = Utc::now();
            site.created_at = now;
            site.updated_at = now;
            sites.insert(site.id, site.clone());
            Ok(site)
        })
        .await
    }

    async fn update_site(&self, mut site: Site) -> Result<Site, CoreError> {
        self.mutate(|sites| {
            let existing = sites.get(&site.id).ok_or_else(|| missing(site.id))?;
            site.created_at = existing.created_at;
            site.updated_at = Utc::now();
            sites.insert(site.id, site.clone());
            Ok(site)
        })
        .await
    }

    async fn delete_site(&self, id: SiteId) -> Result<(), CoreError> {
        self.mutate(|sites| match sites.remove(&id) {
            Some(_) => Ok(()),
            None => Err(missing(id)),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;

    fn site(name: &str) -> Site {
        let slug = crate::model::slugify(name);
        Site {
            id: SiteId::new(),
            name: name.into(),
            domain: format!("{slug}.localhost"),
            files_dir: PathBuf::from("/srv").join(&slug),
            slug,
            public_dir: String::new(),
            php_version: "8.3".into(),
            database_version: "8.4".into(),
            cache_version: "7.4".into(),
            db_password: "pw".into(),
            started: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.json");

        let registry = FileRegistry::open(&path).await.expect("open");
        let added = registry.add_site(site("My Blog")).await.expect("add");
        let mut edited = added.clone();
        edited.started = true;
        registry.update_site(edited).await.expect("update");

        let reopened = FileRegistry::open(&path).await.expect("reopen");
        let loaded = reopened
            .get_site(added.id)
            .await
            .expect("get")
            .expect("present");
        assert!(loaded.started);
        assert_eq!(loaded.slug, "my-blog");
        assert_eq!(loaded.created_at, added.created_at);
    }

    #[tokio::test]
    async fn delete_unknown_is_site_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = FileRegistry::open(dir.path().join("sites.json"))
            .await
            .expect("open");
        assert!(matches!(
            registry.delete_site(SiteId::new()).await,
            Err(CoreError::SiteNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn separate_handles_do_not_lose_each_others_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.json");

        let a = FileRegistry::open(&path).await.expect("open a");
        let b = FileRegistry::open(&path).await.expect("open b");
        a.add_site(site("Alpha")).await.expect("add alpha");
        let beta = b.add_site(site("Beta")).await.expect("add beta");

        let mut started = beta.clone();
        started.started = true;
        a.update_site(started).await.expect("update via other handle");

        let reopened = FileRegistry::open(&path).await.expect("reopen");
        let sites = reopened.get_sites().await.expect("list");
        let slugs: Vec<_> = sites.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["alpha", "beta"]);
        assert!(sites[1].started);
        assert!(dir.path().join("sites.json.lock").exists());
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_file_keep_every_site() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.json");
        let handles: Vec<_> = futures_util::future::join_all(
            (0..4).map(|_| FileRegistry::open(path.clone())),
        )
        .await
        .into_iter()
        .map(|r| r.expect("open"))
        .collect();

        let adds = handles
            .iter()
            .enumerate()
            .map(|(i, reg)| reg.add_site(site(&format!("Site {i}"))));
        for added in futures_util::future::join_all(adds).await {
            added.expect("add");
        }

        let reopened = FileRegistry::open(&path).await.expect("reopen");
        assert_eq!(reopened.get_sites().await.expect("list").len(), 4);
    }

    #[tokio::test]
    async fn rejects_corrupt_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sites.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            FileRegistry::open(&path).await,
            Err(CoreError::Registry { .. })
        ));
    }
}
