//! Implementation of submission backends.
//!
//! A backend knows how to turn a task list into batch submission artifacts,
//! how to submit them and how to query the scheduler about the resulting
//! jobs. Backends return the raw scheduler output; interpretation is left to
//! the [`status`](crate::status) classifier so that every backend is judged
//! by the same rules.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use itertools::Itertools as _;
use nonempty::NonEmpty;
use tracing::info;
use tracing::warn;

use crate::Error;
use crate::JobId;
use crate::Result;
use crate::Settings;
use crate::Task;
use crate::command::RemoteShell;
use crate::command::run_command;
use crate::script::render_task_script;
use crate::script::task_script_name;
use crate::script::write_script;
use crate::status::INVALID_JOB_ID_MESSAGE;

pub mod ci;
pub mod launcher;
pub mod local;
pub mod slurm;

pub use ci::CircleCiBackend;
pub use launcher::LauncherBackend;
pub use local::LocalBackend;
pub use slurm::SherlockBackend;

/// Represents a submission backend.
///
/// Every method apart from [`adapt_settings`](Self::adapt_settings) may
/// shell out to the scheduler; none of them interpret scheduler output.
#[async_trait]
pub trait SubmissionBackend: fmt::Debug + Send + Sync {
    /// Gets the name of the backend.
    fn name(&self) -> &'static str;

    /// Adapts the settings to what the backend's scheduler supports.
    ///
    /// This is called exactly once, when the task manager is created.
    fn adapt_settings(&self, settings: &mut Settings) {
        let _ = settings;
    }

    /// Generates the batch submission artifacts for the given tasks in
    /// `artifact_dir`.
    ///
    /// Returns the paths of the artifacts to submit, in submission order.
    async fn generate_artifacts(
        &self,
        tasks: &NonEmpty<Task>,
        settings: &Settings,
        artifact_dir: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Submits a single artifact and returns the raw submission output.
    async fn submit_one(&self, artifact: &Path) -> Result<Option<String>>;

    /// Queries the queue status of the given jobs and returns the raw output.
    async fn query_status(&self, ids: &[JobId]) -> Result<Option<String>>;

    /// Queries the accounting records of the given jobs and returns the raw
    /// output.
    async fn query_accounting(&self, ids: &[JobId]) -> Result<Option<String>>;
}

/// The Slurm command line tools, optionally reached through a remote shell.
#[derive(Debug, Clone, Default)]
pub struct SlurmCli {
    /// The remote shell prefixed to every command.
    prefix: Option<RemoteShell>,
}

impl SlurmCli {
    /// Creates a client for Slurm tools on the local host.
    pub fn local() -> Self {
        Self { prefix: None }
    }

    /// Creates a client for Slurm tools reached through a remote shell.
    pub fn remote(prefix: RemoteShell) -> Self {
        Self {
            prefix: Some(prefix),
        }
    }

    /// Gets the remote shell prefix, if any.
    pub fn prefix(&self) -> Option<&RemoteShell> {
        self.prefix.as_ref()
    }

    /// Prefixes the given arguments with the remote shell, if any.
    fn command_line<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix
            .iter()
            .flat_map(|p| p.args().iter().cloned())
            .chain(args.into_iter().map(Into::into))
            .collect()
    }

    /// Gets the command line submitting an artifact.
    pub fn submit_command(&self, artifact: &Path) -> Vec<String> {
        self.command_line([
            "sbatch".to_string(),
            artifact.to_string_lossy().into_owned(),
        ])
    }

    /// Gets the command line querying the queue status of jobs.
    pub fn status_command(&self, ids: &[JobId]) -> Vec<String> {
        self.command_line([
            "squeue".to_string(),
            "-j".to_string(),
            ids.iter().join(","),
            "-o".to_string(),
            "%i,%t".to_string(),
            "-h".to_string(),
        ])
    }

    /// Gets the command line querying the accounting records of jobs.
    pub fn accounting_command(&self, ids: &[JobId]) -> Vec<String> {
        self.command_line([
            "sacct".to_string(),
            "-n".to_string(),
            "-X".to_string(),
            "-j".to_string(),
            ids.iter().join(","),
            "-o".to_string(),
            "JobID,State,ExitCode".to_string(),
        ])
    }

    /// Submits an artifact with `sbatch`.
    pub async fn submit(&self, artifact: &Path) -> Result<Option<String>> {
        run_command(&self.submit_command(artifact)).await
    }

    /// Queries the queue status of jobs with `squeue`.
    ///
    /// `squeue` exits with an error once the jobs have left the controller's
    /// memory; that error is returned as regular output so the classifier
    /// can treat it as a drained queue.
    pub async fn status(&self, ids: &[JobId]) -> Result<Option<String>> {
        match run_command(&self.status_command(ids)).await {
            Err(Error::ExternalCommand { output, .. })
                if output.contains(INVALID_JOB_ID_MESSAGE) =>
            {
                warn!(output = %output.trim(), "jobs are no longer known to the queue");
                Ok(Some(output.trim().to_string()))
            }
            result => result,
        }
    }

    /// Queries the accounting records of jobs with `sacct`.
    pub async fn accounting(&self, ids: &[JobId]) -> Result<Option<String>> {
        run_command(&self.accounting_command(ids)).await
    }
}

/// Writes one batch script per task into `dir`.
pub async fn write_task_scripts(
    tasks: &NonEmpty<Task>,
    settings: &Settings,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    info!(
        count = tasks.len(),
        dir = %dir.display(),
        "generating batch scripts"
    );

    let mut paths = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        let path = dir.join(task_script_name(index));
        let script = render_task_script(settings, task)?;
        write_script(&path, &script).await?;
        paths.push(path);
    }

    Ok(paths)
}
