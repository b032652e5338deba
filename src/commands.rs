//! Implementation of cappat CLI commands.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use cappat_engine::Settings;
use cappat_engine::Task;
use clap::Args;
use tracing::info;

use crate::participants::TaskTemplate;
use crate::participants::discover_subjects;
use crate::participants::select_subjects;
use crate::participants::shuffle_subjects;

pub mod run;
pub mod settings;
pub mod tasks;

/// Arguments for loading the settings of a run.
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// The settings file (YAML, or TOML with a `.toml` extension).
    #[clap(value_name = "SETTINGS")]
    pub settings: PathBuf,

    /// The identity of the execution system; defaults to the host name.
    #[clap(long, env = "CAPPAT_EXECUTION_SYSTEM", value_name = "ID")]
    pub execution_system: Option<String>,

    /// The working directory of the run; overrides the settings.
    #[clap(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// The BIDS app executable; overrides the settings.
    #[clap(long, value_name = "PATH")]
    pub executable: Option<String>,

    /// The BIDS dataset directory; overrides the settings.
    #[clap(long, value_name = "DIR")]
    pub bids_dir: Option<PathBuf>,
}

impl SettingsArgs {
    /// Loads the settings file and applies the command line overrides.
    pub fn load(&self) -> Result<Settings> {
        let mut settings = Settings::from_path(&self.settings).with_context(|| {
            format!(
                "failed to load settings from `{path}`",
                path = self.settings.display()
            )
        })?;

        if let Some(system) = &self.execution_system {
            settings.execution_system = Some(system.clone());
        }

        if let Some(dir) = &self.work_dir {
            settings.work_dir = Some(dir.clone());
        }

        if let Some(executable) = &self.executable {
            settings.executable = Some(executable.clone());
        }

        if let Some(dir) = &self.bids_dir {
            settings.bids_dir = Some(dir.clone());
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Arguments describing the participant task list.
#[derive(Args, Debug)]
pub struct TaskListArgs {
    /// The settings of the run.
    #[clap(flatten)]
    pub settings: SettingsArgs,

    /// The label(s) of the participant(s) to analyze, without the `sub-`
    /// prefix; defaults to every participant of the dataset.
    #[clap(
        short = 'S',
        long = "participant-label",
        value_name = "LABEL",
        num_args = 1..
    )]
    pub participant_labels: Vec<String>,

    /// The number of participants processed by each task.
    #[clap(long, default_value = "1", value_name = "N")]
    pub group_size: NonZeroUsize,

    /// Keeps the participants in dataset order instead of shuffling them
    /// before grouping.
    #[clap(long)]
    pub no_randomize: bool,

    /// The BIDS app invoked by each task; defaults to the settings'
    /// executable.
    #[clap(long, value_name = "NAME")]
    pub bids_app_name: Option<String>,

    /// Extra arguments appended to each participant task.
    #[clap(long, value_name = "ARGS", allow_hyphen_values = true)]
    pub args: Option<String>,
}

impl TaskListArgs {
    /// Builds the participant task list for the given settings.
    pub fn task_list(&self, settings: &Settings) -> Result<Vec<Task>> {
        let bids_dir = settings.bids_dir()?;
        let bids_dir = std::path::absolute(bids_dir).with_context(|| {
            format!(
                "failed to resolve BIDS directory `{path}`",
                path = bids_dir.display()
            )
        })?;
        let output_dir = std::path::absolute(settings.work_dir().join(&settings.output_dir))
            .context("failed to resolve the output directory")?;

        let available = discover_subjects(&bids_dir)?;
        let mut subjects = select_subjects(&available, &self.participant_labels)?;
        if subjects.is_empty() {
            bail!(
                "no participants were found in BIDS directory `{path}`",
                path = bids_dir.display()
            );
        }

        if !self.no_randomize {
            shuffle_subjects(&mut subjects);
        }

        let app = match &self.bids_app_name {
            Some(name) => name.as_str(),
            None => settings.executable()?,
        };

        let template = TaskTemplate {
            app,
            bids_dir: &bids_dir,
            output_dir: &output_dir,
            extra_args: self.args.as_deref(),
        };

        let tasks = template.tasks(&subjects, self.group_size);
        info!(
            participants = subjects.len(),
            tasks = tasks.len(),
            "built participant task list"
        );
        Ok(tasks)
    }
}
