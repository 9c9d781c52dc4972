// ── Domain model ──
//
// Sites, their lifecycle states, stack roles, and the naming scheme that
// derives every runtime object name from a slug.

pub mod naming;
pub mod site;
pub mod slug;

pub use naming::{GlobalNames, StackNames};
pub use site::{NewSite, Role, Site, SiteId, SiteState, SiteUpdate};
pub use slug::slugify;
