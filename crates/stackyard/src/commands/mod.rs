//! Command dispatch: bridges CLI args -> orchestrator calls -> output.

pub mod config_cmd;
pub mod sites;
pub mod system;
pub mod util;

use std::sync::Arc;

use stackyard_config::Config;
use stackyard_core::{CoreError, FileRegistry, Layout, Orchestrator};
use stackyard_runtime::DockerRuntime;
use tokio_util::sync::CancellationToken;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Build an orchestrator over the local Docker daemon and the on-disk
/// registry. Nothing here talks to Docker yet.
pub async fn open_engine(cfg: &Config) -> Result<Orchestrator, CliError> {
    let engine = cfg.to_engine_config()?;
    let registry = FileRegistry::open(Layout::new(&engine).registry_file()).await?;
    let runtime = DockerRuntime::connect().map_err(CoreError::from)?;
    Ok(Orchestrator::new(
        engine,
        Arc::new(runtime),
        Arc::new(registry),
    ))
}

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    orchestrator: &Orchestrator,
    global: &GlobalOpts,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    match cmd {
        Command::Init => system::init(orchestrator, global, cancel).await,
        Command::Sites(args) => sites::handle(orchestrator, args, global, cancel).await,
        Command::Reconcile => system::reconcile(orchestrator, global).await,
        Command::Shutdown => system::shutdown(orchestrator, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal {
            message: "command is handled before the engine is opened".into(),
        }),
    }
}
