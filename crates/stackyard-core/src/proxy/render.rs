// ── nginx config rendering ──
//
// Pure string builders. Upstreams are always referenced through variables
// and the embedded resolver, so a config naming a stopped site's container
// still passes `nginx -t`.

use std::fmt::Write as _;

use crate::error::CoreError;
use crate::layout::{DOCUMENT_ROOT, PROXY_CONFIG_MOUNT};
use crate::model::Site;

/// Docker's embedded DNS server.
const RESOLVER: &str = "resolver 127.0.0.11 valid=10s ipv6=off;";

/// Main config of the shared proxy.
pub fn render_global_config() -> String {
    format!(
        "\
# Managed by stackyard. Rewritten on every start.
worker_processes auto;

events {{
    worker_connections 1024;
}}

http {{
    {RESOLVER}
    client_max_body_size 128m;
    proxy_http_version 1.1;
    proxy_set_header Host $host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;

    include {PROXY_CONFIG_MOUNT}/map.conf;

    server {{
        listen 80 default_server;
        return 404;
    }}

    include {PROXY_CONFIG_MOUNT}/sites/*.conf;
}}
"
    )
}

/// Virtual host routing `site.domain` through the global map. A site that
/// is not in the map answers 503.
pub fn render_site_config(site: &Site) -> String {
    format!(
        "\
# {name} ({id})
server {{
    listen 80;
    server_name {domain};

    location / {{
        if ($site_upstream = \"\") {{
            return 503;
        }}
        proxy_pass http://$site_upstream;
    }}
}}
",
        name = site.name.replace(['\n', '\r'], " "),
        id = site.id,
        domain = site.domain,
    )
}

/// Routing table: domain -> web container, for `started` sites only.
pub fn render_global_map(sites: &[Site], web_container: impl Fn(&Site) -> String) -> String {
    let mut out = String::from("map $host $site_upstream {\n    default \"\";\n");
    for site in sites.iter().filter(|s| s.started) {
        let _ = writeln!(out, "    {} {}:80;", site.domain, web_container(site));
    }
    out.push_str("}\n");
    out
}

/// Main config of a site's own web server: static files from the served
/// directory, PHP handed to the app container.
pub fn render_web_config(site: &Site) -> Result<String, CoreError> {
    let root = nginx_root(&site.public_dir)?;
    Ok(format!(
        "\
# Managed by stackyard for {domain}.
worker_processes 1;

events {{
    worker_connections 512;
}}

http {{
    include /etc/nginx/mime.types;
    default_type application/octet-stream;
    sendfile on;
    client_max_body_size 128m;
    {RESOLVER}

    server {{
        listen 80;
        server_name {domain};
        root {root};
        index index.php index.html;

        location / {{
            try_files $uri $uri/ /index.php?$args;
        }}

        location ~ \\.php$ {{
            set $app_upstream app:9000;
            fastcgi_split_path_info ^(.+\\.php)(/.+)$;
            fastcgi_pass $app_upstream;
            fastcgi_index index.php;
            include /etc/nginx/fastcgi_params;
            fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
            fastcgi_param PATH_INFO $fastcgi_path_info;
        }}
    }}
}}
",
        domain = site.domain,
    ))
}

// ── Served directory ─────────────────────────────────────────────────

/// Normalise a served subdirectory: `""`, `"/"` and `"."` mean the root,
/// surrounding slashes are dropped, `..` and characters nginx would need
/// quoted are rejected.
pub fn clean_public_dir(raw: &str) -> Result<String, CoreError> {
    let raw = raw.trim();
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')))
    {
        return Err(CoreError::validation(format!(
            "public directory '{raw}' contains unsupported character '{bad}'"
        )));
    }

    let mut parts = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(CoreError::validation(format!(
                    "public directory '{raw}' must stay inside the site directory"
                )));
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Document root as seen inside the web container.
pub fn nginx_root(public_dir: &str) -> Result<String, CoreError> {
    let cleaned = clean_public_dir(public_dir)?;
    if cleaned.is_empty() {
        Ok(DOCUMENT_ROOT.to_owned())
    } else {
        Ok(format!("{DOCUMENT_ROOT}/{cleaned}"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::SiteId;

    fn site(slug: &str, started: bool) -> Site {
        Site {
            id: SiteId::new(),
            name: slug.into(),
            slug: slug.into(),
            domain: format!("{slug}.localhost"),
            files_dir: PathBuf::from("/srv").join(slug),
            public_dir: String::new(),
            php_version: "8.3".into(),
            database_version: "8.4".into(),
            cache_version: "7.4".into(),
            db_password: "pw".into(),
            started,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn map_lists_only_started_sites() {
        let sites = [site("alpha", true), site("beta", false), site("gamma", true)];
        let map = render_global_map(&sites, |s| format!("yard-{}-web", s.slug));
        assert_eq!(
            map,
            "map $host $site_upstream {\n    default \"\";\n    \
             alpha.localhost yard-alpha-web:80;\n    \
             gamma.localhost yard-gamma-web:80;\n}\n"
        );
    }

    #[test]
    fn empty_map_still_declares_variable() {
        let map = render_global_map(&[], |_| unreachable!());
        assert!(map.contains("default \"\";"));
    }

    #[test]
    fn site_config_routes_domain_through_map() {
        let conf = render_site_config(&site("alpha", false));
        assert!(conf.contains("server_name alpha.localhost;"));
        assert!(conf.contains("proxy_pass http://$site_upstream;"));
    }

    #[test]
    fn public_dir_is_cleaned() {
        assert_eq!(clean_public_dir("").expect("root"), "");
        assert_eq!(clean_public_dir("/").expect("root"), "");
        assert_eq!(clean_public_dir("/web/").expect("web"), "web");
        assert_eq!(clean_public_dir("./a//b/").expect("nested"), "a/b");
        assert_eq!(nginx_root("public").expect("root"), "/var/www/html/public");
        assert_eq!(nginx_root("/").expect("root"), "/var/www/html");
    }

    #[test]
    fn public_dir_rejects_escapes_and_odd_characters() {
        assert!(clean_public_dir("../etc").is_err());
        assert!(clean_public_dir("a/../../b").is_err());
        assert!(clean_public_dir("web; root /").is_err());
        assert!(clean_public_dir("{x}").is_err());
    }

    #[test]
    fn web_config_uses_cleaned_root() {
        let mut s = site("alpha", false);
        s.public_dir = "/web/".into();
        let conf = render_web_config(&s).expect("render");
        assert!(conf.contains("root /var/www/html/web;"));
        assert!(conf.contains("fastcgi_pass $app_upstream;"));
        assert!(conf.contains("location ~ \\.php$ {"));
    }
}
