use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{SiteRegistry, missing, sort_sites};
use crate::error::CoreError;
use crate::model::{Site, SiteId};

/// Volatile registry for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    sites: DashMap<SiteId, Site>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SiteRegistry for MemoryRegistry {
    async fn get_sites(&self) -> Result<Vec<Site>, CoreError> {
        let mut sites: Vec<Site> = self.sites.iter().map(|r| r.value().clone()).collect();
        sort_sites(&mut sites);
        Ok(sites)
    }

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, CoreError> {
        Ok(self.sites.get(&id).map(|r| r.value().clone()))
    }

    async fn add_site(&self, mut site: Site) -> Result<Site, CoreError> {
        if self.sites.contains_key(&site.id) {
            return Err(CoreError::Registry {
                message: format!("site {} already registered", site.id),
            });
        }
        let now = Utc::now();
        site.created_at = now;
        site.updated_at = now;
        self.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn update_site(&self, mut site: Site) -> Result<Site, CoreError> {
        let mut entry = self.sites.get_mut(&site.id).ok_or_else(|| missing(site.id))?;
        site.created_at = entry.created_at;
        site.updated_at = Utc::now();
        *entry = site.clone();
        Ok(site)
    }

    async fn delete_site(&self, id: SiteId) -> Result<(), CoreError> {
        self.sites.remove(&id).map(|_| ()).ok_or_else(|| missing(id))
    }
}
