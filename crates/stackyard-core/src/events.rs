// ── Lifecycle events ──
//
// The orchestrator reports every committed transition to an `EventSink`.
// `NoopSink` is the default; `BroadcastSink` fans events out to any number
// of subscribers and keeps the latest site list in a watch channel.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use crate::model::{Site, SiteState};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Observer of orchestrator transitions. Called after the registry write
/// for the transition has succeeded; must not block.
pub trait EventSink: Send + Sync {
    /// The full site list, after any create, edit, delete or state change.
    fn sites_changed(&self, sites: &[Site]);

    /// One site entered `state`.
    fn site_changed(&self, site: &Site, state: SiteState);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn sites_changed(&self, _sites: &[Site]) {}
    fn site_changed(&self, _site: &Site, _state: SiteState) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    SitesChanged(Vec<Site>),
    SiteChanged { site: Box<Site>, state: SiteState },
}

/// Fan-out sink backed by tokio channels.
#[derive(Debug)]
pub struct BroadcastSink {
    events: broadcast::Sender<Arc<SiteEvent>>,
    sites: watch::Sender<Arc<Vec<Site>>>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (sites, _) = watch::channel(Arc::new(Vec::new()));
        Self { events, sites }
    }

    /// Subscribe to the raw event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SiteEvent>> {
        self.events.subscribe()
    }

    /// Latest site list; changes whenever `sites_changed` fires.
    pub fn sites(&self) -> watch::Receiver<Arc<Vec<Site>>> {
        self.sites.subscribe()
    }

    /// Events as a `Stream`. A subscriber that falls behind skips what it
    /// missed instead of ending.
    pub fn stream(&self) -> impl Stream<Item = Arc<SiteEvent>> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    debug!(skipped = n, "event subscriber lagged");
                    None
                }
            }
        })
    }

    fn send(&self, event: SiteEvent) {
        // No receivers is fine.
        let _ = self.events.send(Arc::new(event));
    }
}

impl EventSink for BroadcastSink {
    fn sites_changed(&self, sites: &[Site]) {
        self.sites.send_replace(Arc::new(sites.to_vec()));
        self.send(SiteEvent::SitesChanged(sites.to_vec()));
    }

    fn site_changed(&self, site: &Site, state: SiteState) {
        self.send(SiteEvent::SiteChanged {
            site: Box::new(site.clone()),
            state,
        });
    }
}
