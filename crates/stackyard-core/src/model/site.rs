// ── Site domain type ──

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Opaque, immutable site identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(Uuid);

impl SiteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SiteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The unit of orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    /// Operator-chosen display name. Editable.
    pub name: String,
    /// Namespace key for every derived resource. Fixed at creation.
    pub slug: String,
    pub domain: String,
    /// Host directory with the site's content.
    pub files_dir: PathBuf,
    /// Served subdirectory of `files_dir` (empty for the root).
    #[serde(default)]
    pub public_dir: String,
    pub php_version: String,
    pub database_version: String,
    pub cache_version: String,
    /// Injected into the database and app containers.
    pub db_password: String,
    /// Whether the stack is believed to be running.
    #[serde(default)]
    pub started: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a site. Unset fields fall back to engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub files_dir: Option<PathBuf>,
    pub public_dir: Option<String>,
    pub php_version: Option<String>,
    pub database_version: Option<String>,
    pub cache_version: Option<String>,
}

impl NewSite {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A partial edit. Slug and domain are never part of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub public_dir: Option<String>,
    pub php_version: Option<String>,
    pub database_version: Option<String>,
    pub cache_version: Option<String>,
}

impl SiteUpdate {
    /// Whether applying this update changes what the stack runs.
    pub fn touches_stack(&self) -> bool {
        self.public_dir.is_some()
            || self.php_version.is_some()
            || self.database_version.is_some()
            || self.cache_version.is_some()
    }
}

/// Lifecycle state of a site as seen by observers.
///
/// Only `started` is persisted; the transitional states live in memory
/// while an operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SiteState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Deleted,
}

/// One of the four containers in a site stack.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Web,
    App,
    Database,
    Cache,
}

impl Role {
    /// Creation order.
    pub const ALL: [Role; 4] = [Role::Web, Role::App, Role::Database, Role::Cache];

    /// Start order: dependencies first.
    pub const START_ORDER: [Role; 4] = [Role::Database, Role::Cache, Role::App, Role::Web];

    /// Stop order: entry points first.
    pub const STOP_ORDER: [Role; 4] = [Role::Web, Role::App, Role::Cache, Role::Database];
}
