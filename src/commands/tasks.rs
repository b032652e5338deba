//! Implementation of the `tasks` subcommand.

use anyhow::Result;
use clap::Parser;

use super::TaskListArgs;

/// Arguments to the `tasks` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The task list to print.
    #[clap(flatten)]
    pub task_list: TaskListArgs,
}

/// Prints the participant task list, one task per line.
pub fn tasks(args: Args) -> Result<()> {
    let settings = args.task_list.settings.load()?;
    for task in args.task_list.task_list(&settings)? {
        println!("{task}");
    }

    Ok(())
}
