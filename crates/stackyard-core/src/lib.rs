//! Site orchestration engine behind the `stackyard` CLI.
//!
//! Turns a registry of local development sites into running container
//! stacks behind one shared reverse proxy:
//!
//! - **[`Orchestrator`]**: Public facade. Owns the per-site locks and the
//!   lifecycle state machine (`Stopped → Starting → Started → Stopping`),
//!   sequences the components below and persists each transition only after
//!   the runtime work behind it succeeded.
//!
//! - **[`Bootstrapper`]**: Shared network plus proxy, mail sink and database
//!   admin containers, created once and never recreated. Also performs the
//!   start-up purge of everything carrying the engine prefix.
//!
//! - **[`StackProvisioner`]**: Per-site private network, database volume and
//!   the four role containers, each described by a data-driven [`RoleSpec`].
//!
//! - **[`ProxyController`]**: Renders vhosts and the routing map, writes them
//!   atomically, validates inside the proxy and reloads it, restoring the
//!   previous files when validation fails.
//!
//! - **[`archive`]**: Site export (database dump + content tree as tar.gz)
//!   and content bootstrap from a downloaded bundle.
//!
//! - **[`SiteRegistry`]**: Persistence contract, with JSON-file and
//!   in-memory implementations.

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod infra;
pub mod layout;
pub mod model;
pub mod orchestrator;
pub mod proxy;
pub mod registry;
pub mod stack;

// ── Primary re-exports ──────────────────────────────────────────────
pub use archive::{BootstrapOutcome, ExportMetadata, ExportReport, ExportedSite};
pub use config::{ContentSource, EngineConfig, ImageSet, VersionDefaults};
pub use error::CoreError;
pub use events::{BroadcastSink, EventSink, NoopSink, SiteEvent};
pub use infra::{Bootstrapper, InfraReport, PurgeReport};
pub use layout::Layout;
pub use model::{
    GlobalNames, NewSite, Role, Site, SiteId, SiteState, SiteUpdate, StackNames, slugify,
};
pub use orchestrator::{DeleteOptions, InitReport, Orchestrator};
pub use proxy::{Activation, ProxyController};
pub use registry::{FileRegistry, MemoryRegistry, SiteRegistry};
pub use stack::{ProvisionOutcome, RoleSpec, StackProvisioner, TeardownOptions};

// Runtime types that appear in this crate's public API.
pub use stackyard_runtime::{ExecOutput, RuntimeGateway};
