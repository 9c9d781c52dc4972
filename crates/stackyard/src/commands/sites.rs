//! Site command handlers.

use std::path::PathBuf;

use bytesize::ByteSize;
use chrono::Utc;
use serde::Serialize;
use stackyard_core::stack::{DB_NAME, DB_USER};
use stackyard_core::{DeleteOptions, NewSite, Orchestrator, Site, SiteState, SiteUpdate};
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use crate::cli::{GlobalOpts, SitesArgs, SitesCommand, VersionArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Views ───────────────────────────────────────────────────────────

/// A site plus its live lifecycle state.
#[derive(Serialize)]
struct SiteView {
    #[serde(flatten)]
    site: Site,
    state: SiteState,
}

async fn view(orchestrator: &Orchestrator, site: Site) -> Result<SiteView, CliError> {
    let state = orchestrator.site_state(site.id).await?;
    Ok(SiteView { site, state })
}

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "PHP")]
    php: String,
    #[tabled(rename = "DB")]
    database: String,
}

fn site_row(v: &SiteView, color: bool) -> SiteRow {
    SiteRow {
        slug: v.site.slug.clone(),
        name: v.site.name.clone(),
        domain: v.site.domain.clone(),
        state: output::paint_state(v.state, color),
        php: v.site.php_version.clone(),
        database: v.site.database_version.clone(),
    }
}

fn site_url(site: &Site, http_port: u16) -> String {
    if http_port == 80 {
        format!("http://{}", site.domain)
    } else {
        format!("http://{}:{http_port}", site.domain)
    }
}

fn site_detail(v: &SiteView, http_port: u16, color: bool) -> String {
    let s = &v.site;
    let public = if s.public_dir.is_empty() {
        "(content root)".to_owned()
    } else {
        s.public_dir.clone()
    };
    output::detail_block(&[
        ("Name", s.name.clone()),
        ("Slug", s.slug.clone()),
        ("URL", site_url(s, http_port)),
        ("State", output::paint_state(v.state, color)),
        ("Content", s.files_dir.display().to_string()),
        ("Public dir", public),
        ("PHP", s.php_version.clone()),
        ("Database", s.database_version.clone()),
        ("Cache", s.cache_version.clone()),
        ("DB name", DB_NAME.to_owned()),
        ("DB user", DB_USER.to_owned()),
        ("DB password", s.db_password.clone()),
        ("ID", s.id.to_string()),
        ("Created", s.created_at.to_rfc3339()),
    ])
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub async fn handle(
    orchestrator: &Orchestrator,
    args: SitesArgs,
    global: &GlobalOpts,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let http_port = orchestrator.config().http_port;

    match args.command {
        SitesCommand::List => {
            let mut views = Vec::new();
            for site in orchestrator.list_sites().await? {
                views.push(view(orchestrator, site).await?);
            }
            let out = output::render_list(
                &global.output,
                &views,
                |v| site_row(v, color),
                |v| v.site.slug.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SitesCommand::Show { site } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            show(orchestrator, site, global, http_port, color).await
        }

        SitesCommand::Create {
            name,
            path,
            public_dir,
            versions: VersionArgs {
                php,
                database,
                cache,
            },
            start,
        } => {
            let site = orchestrator
                .create_site(NewSite {
                    name,
                    files_dir: path,
                    public_dir,
                    php_version: php,
                    database_version: database,
                    cache_version: cache,
                })
                .await?;
            util::note(global.quiet, &format!("Created site '{}'", site.slug));

            let site = if start {
                start_site(orchestrator, &site, global, cancel).await?
            } else {
                site
            };
            show(orchestrator, site, global, http_port, color).await
        }

        SitesCommand::Edit {
            site,
            name,
            public_dir,
            versions: VersionArgs {
                php,
                database,
                cache,
            },
        } => {
            let update = SiteUpdate {
                name,
                public_dir,
                php_version: php,
                database_version: database,
                cache_version: cache,
            };
            if update == SiteUpdate::default() {
                return Err(CliError::Validation {
                    field: "edit".into(),
                    reason: "nothing to change; pass at least one option".into(),
                });
            }
            let site = util::resolve_site(orchestrator, &site).await?;
            let site = orchestrator.update_site(site.id, update).await?;
            util::note(global.quiet, &format!("Updated site '{}'", site.slug));
            show(orchestrator, site, global, http_port, color).await
        }

        SitesCommand::Start { site } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let site = start_site(orchestrator, &site, global, cancel).await?;
            util::note(
                global.quiet,
                &format!("Site '{}' is up at {}", site.slug, site_url(&site, http_port)),
            );
            Ok(())
        }

        SitesCommand::Stop { site } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let bar = util::spinner(format!("Stopping {}", site.slug), global.quiet);
            let result = orchestrator.stop_site(site.id).await;
            bar.finish_and_clear();
            let site = result?;
            util::note(global.quiet, &format!("Stopped site '{}'", site.slug));
            Ok(())
        }

        SitesCommand::Delete { site, destroy_data } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let prompt = if destroy_data {
                format!(
                    "Delete site '{}' and destroy its database and {}?",
                    site.slug,
                    site.files_dir.display()
                )
            } else {
                format!(
                    "Delete site '{}'? Database volume and content are kept.",
                    site.slug
                )
            };
            if !util::confirm(&prompt, global.yes)? {
                return Ok(());
            }

            let bar = util::spinner(format!("Deleting {}", site.slug), global.quiet);
            let result = orchestrator
                .delete_site(site.id, DeleteOptions { destroy_data })
                .await;
            bar.finish_and_clear();
            result?;
            util::note(global.quiet, &format!("Deleted site '{}'", site.slug));
            Ok(())
        }

        SitesCommand::Export { site, file } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let dest = file.unwrap_or_else(|| default_export_path(&site));

            let bar = util::spinner(format!("Exporting {}", site.slug), global.quiet);
            let result = orchestrator.export_site(site.id, &dest, cancel).await;
            bar.finish_and_clear();
            let report = result?;

            let out = output::render_single(
                &global.output,
                &report,
                |r| {
                    format!(
                        "Exported '{}' to {} ({}, {} files, {} directories)",
                        site.slug,
                        r.path.display(),
                        ByteSize(r.bytes),
                        r.files,
                        r.dirs
                    )
                },
                |r| r.path.display().to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        SitesCommand::Logs { site, role, lines } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let logs = orchestrator
                .site_logs(site.id, util::role(role), lines)
                .await?;
            print!("{logs}");
            Ok(())
        }

        SitesCommand::Exec { site, command } => {
            let site = util::resolve_site(orchestrator, &site).await?;
            let out = orchestrator
                .run_app_command(site.id, &command, cancel)
                .await?;
            print!("{}", out.output);
            Ok(())
        }
    }
}

async fn show(
    orchestrator: &Orchestrator,
    site: Site,
    global: &GlobalOpts,
    http_port: u16,
    color: bool,
) -> Result<(), CliError> {
    let v = view(orchestrator, site).await?;
    let out = output::render_single(
        &global.output,
        &v,
        |v| site_detail(v, http_port, color),
        |v| v.site.slug.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn start_site(
    orchestrator: &Orchestrator,
    site: &Site,
    global: &GlobalOpts,
    cancel: &CancellationToken,
) -> Result<Site, CliError> {
    let bar = util::spinner(
        format!("Starting {} (first start pulls images)", site.slug),
        global.quiet,
    );
    let result = orchestrator.start_site(site.id, cancel).await;
    bar.finish_and_clear();
    Ok(result?)
}

fn default_export_path(site: &Site) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("{}-{stamp}.tar.gz", site.slug))
}
