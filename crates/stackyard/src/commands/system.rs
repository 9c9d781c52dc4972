//! Engine-wide commands: init, reconcile, shutdown.

use serde::Serialize;
use stackyard_core::Orchestrator;
use tokio_util::sync::CancellationToken;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct InitSummary {
    purged_containers: Vec<String>,
    purged_networks: Vec<String>,
    reconciled: usize,
    created: Vec<String>,
    restarted: Vec<String>,
}

fn init_detail(s: &InitSummary) -> String {
    let list = |v: &[String]| {
        if v.is_empty() {
            "-".to_owned()
        } else {
            v.join(", ")
        }
    };
    output::detail_block(&[
        ("Purged", list(&s.purged_containers)),
        ("Networks purged", list(&s.purged_networks)),
        ("Sites reset", s.reconciled.to_string()),
        ("Services created", list(&s.created)),
        ("Services restarted", list(&s.restarted)),
    ])
}

pub async fn init(
    orchestrator: &Orchestrator,
    global: &GlobalOpts,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let bar = util::spinner("Preparing shared services", global.quiet);
    let result = orchestrator.initialize(cancel).await;
    bar.finish_and_clear();
    let report = result?;

    let summary = InitSummary {
        purged_containers: report.purged.containers,
        purged_networks: report.purged.networks,
        reconciled: report.reconciled,
        created: report.infra.created,
        restarted: report.infra.started,
    };
    let out = output::render_single(&global.output, &summary, init_detail, |s| {
        s.reconciled.to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn reconcile(orchestrator: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    let cleared = orchestrator.reconcile().await?;
    util::note(
        global.quiet,
        &format!("Marked {cleared} site(s) stopped"),
    );
    Ok(())
}

pub async fn shutdown(orchestrator: &Orchestrator, global: &GlobalOpts) -> Result<(), CliError> {
    if !util::confirm(
        "Remove every stackyard container and network? Data is kept.",
        global.yes,
    )? {
        return Ok(());
    }
    let bar = util::spinner("Shutting down", global.quiet);
    let result = orchestrator.shutdown().await;
    bar.finish_and_clear();
    let report = result?;
    util::note(
        global.quiet,
        &format!(
            "Removed {} container(s) and {} network(s)",
            report.containers.len(),
            report.networks.len()
        ),
    );
    Ok(())
}
