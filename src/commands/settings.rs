//! Implementation of the `settings` subcommand.

use anyhow::Context;
use anyhow::Result;
use cappat_engine::selector::resolve_identity;
use cappat_engine::selector::select;
use clap::Parser;

use super::SettingsArgs;

/// Arguments to the `settings` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The settings to resolve.
    #[clap(flatten)]
    pub settings: SettingsArgs,
}

/// Validates the settings and prints them as the selected backend would
/// use them.
pub fn settings(args: Args) -> Result<()> {
    let settings = args.settings.load()?;
    let identity = resolve_identity(settings.execution_system.as_deref())?;
    let kind = select(&identity)?;
    let backend = kind.create();
    let settings = settings.freeze(backend.as_ref())?;

    println!("# execution system: {identity}");
    println!("# backend: {kind}");
    print!(
        "{}",
        serde_yaml_ng::to_string(&settings).context("failed to serialize settings")?
    );
    Ok(())
}
