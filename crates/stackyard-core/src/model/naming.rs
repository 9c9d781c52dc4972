// ── Deterministic resource names ──
//
// Every runtime object is `<prefix>-…`. Shared infrastructure lives under
// `<prefix>-global`; a site's objects under `<prefix>-<slug>`.

use super::site::Role;

/// Slug reserved for shared infrastructure.
pub const RESERVED_SLUG: &str = "global";

/// Names of the process-wide shared infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalNames {
    prefix: String,
}

impl GlobalNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
        }
    }

    /// Shared bridge network every site's web container joins.
    pub fn network(&self) -> String {
        format!("{}-global", self.prefix)
    }

    pub fn proxy(&self) -> String {
        format!("{}-global-proxy", self.prefix)
    }

    pub fn mail(&self) -> String {
        format!("{}-global-mail", self.prefix)
    }

    pub fn dbadmin(&self) -> String {
        format!("{}-global-dbadmin", self.prefix)
    }

    /// Name prefix matching every object this engine owns.
    pub fn owned_prefix(&self) -> String {
        format!("{}-", self.prefix)
    }
}

/// Names of one site's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackNames {
    prefix: String,
    slug: String,
}

impl StackNames {
    pub fn new(prefix: &str, slug: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            slug: slug.to_owned(),
        }
    }

    /// Private per-site network.
    pub fn network(&self) -> String {
        format!("{}-{}", self.prefix, self.slug)
    }

    pub fn container(&self, role: Role) -> String {
        format!("{}-{}-{role}", self.prefix, self.slug)
    }

    /// Database volume. Outlives the stack.
    pub fn volume(&self) -> String {
        format!("{}-{}-dbdata", self.prefix, self.slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_names_follow_pattern() {
        let names = StackNames::new("yard", "my-blog");
        assert_eq!(names.network(), "yard-my-blog");
        assert_eq!(names.container(Role::Web), "yard-my-blog-web");
        assert_eq!(names.container(Role::App), "yard-my-blog-app");
        assert_eq!(names.container(Role::Database), "yard-my-blog-database");
        assert_eq!(names.container(Role::Cache), "yard-my-blog-cache");
        assert_eq!(names.volume(), "yard-my-blog-dbdata");
    }

    #[test]
    fn global_names_follow_pattern() {
        let names = GlobalNames::new("yard");
        assert_eq!(names.network(), "yard-global");
        assert_eq!(names.proxy(), "yard-global-proxy");
        assert_eq!(names.owned_prefix(), "yard-");
    }
}
