//! Implementation of the `run` subcommand.

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use cappat_engine::TaskManager;
use clap::Parser;
use itertools::Itertools as _;
use tracing::error;
use tracing::info;

use super::TaskListArgs;

/// Arguments to the `run` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The participant tasks to run.
    #[clap(flatten)]
    pub task_list: TaskListArgs,

    /// Skips the group level once the participant jobs finished.
    #[clap(long)]
    pub skip_group: bool,

    /// Replaces the group level command derived from the settings.
    ///
    /// The command is split with shell quoting rules.
    #[clap(long, value_name = "COMMAND", conflicts_with = "skip_group")]
    pub group_command: Option<String>,
}

/// Submits the participant tasks, waits for them and runs the group level.
pub async fn run(args: Args) -> Result<()> {
    let settings = args.task_list.settings.load()?;
    let tasks = args.task_list.task_list(&settings)?;
    let mut manager =
        TaskManager::build(tasks, settings).context("failed to create the task manager")?;

    if let Some(command) = &args.group_command {
        let command = shlex::split(command)
            .with_context(|| format!("invalid group level command `{command}`"))?;
        manager.set_group_command(command);
    }

    let ids = manager
        .map_participant()
        .await
        .context("failed to submit participant jobs")?;
    info!(
        backend = manager.backend_name(),
        jobs = %ids.iter().join(","),
        "waiting on participant jobs"
    );

    let token = manager.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("interrupted: no longer waiting on participant jobs");
            token.cancel();
        }
    });

    let result = manager.wait_participant().await;
    interrupt.abort();
    result.context("participant jobs did not finish successfully")?;

    if args.skip_group {
        info!("skipping the group level");
        return Ok(());
    }

    if !manager
        .run_group_level()
        .await
        .context("failed to run the group level")?
    {
        bail!("the group level did not produce any output");
    }

    Ok(())
}
