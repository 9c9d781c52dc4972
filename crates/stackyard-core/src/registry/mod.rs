// ── Site registry contract ──
//
// Persistent CRUD over sites, keyed by immutable id. The registry owns
// `created_at` / `updated_at`; whatever the caller passes is overwritten.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Site, SiteId};

pub use file::FileRegistry;
pub use memory::MemoryRegistry;

#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// All sites, oldest first.
    async fn get_sites(&self) -> Result<Vec<Site>, CoreError>;

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, CoreError>;

    /// Insert a new site, stamping both timestamps.
    async fn add_site(&self, site: Site) -> Result<Site, CoreError>;

    /// Replace an existing site, stamping `updated_at`.
    async fn update_site(&self, site: Site) -> Result<Site, CoreError>;

    async fn delete_site(&self, id: SiteId) -> Result<(), CoreError>;
}

/// Oldest first, ties broken by slug so listings are stable.
fn sort_sites(sites: &mut [Site]) {
    sites.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });
}

fn missing(id: SiteId) -> CoreError {
    CoreError::SiteNotFound {
        identifier: id.to_string(),
    }
}
