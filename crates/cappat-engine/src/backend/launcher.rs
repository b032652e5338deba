//! Implementation of the TACC launcher backend.
//!
//! The whole task list is packed into a single Slurm job that runs the
//! tasks with the `launcher` utility. The scheduler is reached through a
//! login node.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use nonempty::NonEmpty;
use tracing::info;

use super::SlurmCli;
use super::SubmissionBackend;
use crate::JobId;
use crate::Result;
use crate::Settings;
use crate::Task;
use crate::command::RemoteShell;
use crate::error::IoContext as _;
use crate::script::LAUNCHER_SCRIPT_FILE_NAME;
use crate::script::TASK_LIST_FILE_NAME;
use crate::script::render_launcher_script;
use crate::script::render_task_list;
use crate::script::write_script;

/// The partition launcher jobs are submitted to unless one is configured.
const DEFAULT_PARTITION: &str = "normal";

/// The login node the scheduler tools are invoked on.
const LOGIN_NODE: &str = "login2";

/// A backend packing every task into one launcher job.
#[derive(Debug, Clone)]
pub struct LauncherBackend {
    /// The name of the backend.
    name: &'static str,
    /// The maximum number of nodes of a launcher job.
    max_nodes: u32,
    /// The number of CPUs per node.
    max_cpus: u32,
    /// The Slurm command line tools.
    cli: SlurmCli,
}

impl LauncherBackend {
    /// Constructs a launcher backend with the given caps.
    pub fn new(name: &'static str, max_nodes: u32, max_cpus: u32) -> Self {
        Self {
            name,
            max_nodes,
            max_cpus,
            cli: SlurmCli::remote(RemoteShell::new([
                "ssh",
                "-oStrictHostKeyChecking=no",
                LOGIN_NODE,
            ])),
        }
    }

    /// Constructs the backend for Stampede.
    pub fn stampede() -> Self {
        Self::new("stampede", 40, 16)
    }

    /// Constructs the backend for Lonestar 5.
    pub fn lonestar5() -> Self {
        Self::new("lonestar5", 40, 24)
    }

    /// Gets the maximum number of nodes of a launcher job.
    pub fn max_nodes(&self) -> u32 {
        self.max_nodes
    }

    /// Gets the number of CPUs per node.
    pub fn max_cpus(&self) -> u32 {
        self.max_cpus
    }
}

#[async_trait]
impl SubmissionBackend for LauncherBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn adapt_settings(&self, settings: &mut Settings) {
        if settings.partition.is_none() {
            settings.partition = Some(DEFAULT_PARTITION.to_string());
        }
    }

    async fn generate_artifacts(
        &self,
        tasks: &NonEmpty<Task>,
        settings: &Settings,
        artifact_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let task_list = artifact_dir.join(TASK_LIST_FILE_NAME);
        let contents = render_task_list(tasks.iter())?;
        tokio::fs::write(&task_list, contents).await.io_context(|| {
            format!(
                "failed to write task list `{path}`",
                path = task_list.display()
            )
        })?;

        let ntasks = tasks.len();
        let mut settings = settings.clone();
        settings.nodes = u32::try_from(ntasks)
            .unwrap_or(u32::MAX)
            .min(self.max_nodes);
        let ncpus = settings.ncpus.unwrap_or(self.max_cpus);

        info!(
            backend = self.name,
            tasks = ntasks,
            nodes = settings.nodes,
            ncpus,
            "generating launcher job"
        );

        let script_path = artifact_dir.join(LAUNCHER_SCRIPT_FILE_NAME);
        let script = render_launcher_script(&settings, &task_list, ntasks, ncpus)?;
        write_script(&script_path, &script).await?;
        Ok(vec![script_path])
    }

    async fn submit_one(&self, artifact: &Path) -> Result<Option<String>> {
        self.cli.submit(artifact).await
    }

    async fn query_status(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.status(ids).await
    }

    async fn query_accounting(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.accounting(ids).await
    }
}
