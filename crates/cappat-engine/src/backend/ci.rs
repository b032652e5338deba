//! Implementation of the CircleCI test backend.
//!
//! Jobs are submitted to a containerized Slurm controller reachable over SSH
//! on a fixed local port. The container mounts the host's home directory at
//! its root, so home-relative paths are rewritten before they reach it.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use nonempty::NonEmpty;

use super::SlurmCli;
use super::SubmissionBackend;
use super::write_task_scripts;
use crate::JobId;
use crate::Result;
use crate::Settings;
use crate::Task;
use crate::command::RemoteShell;
use crate::command::run_command;

/// Rewrites home-relative paths to the container's root.
///
/// Both the expanded `home` directory and the `~/` shorthand are replaced
/// with `/`.
pub fn rewrite_home(path: &str, home: Option<&Path>) -> String {
    let mut rewritten = path.to_string();
    if let Some(home) = home {
        let prefix = format!("{home}/", home = home.display().to_string().trim_end_matches('/'));
        rewritten = rewritten.replace(&prefix, "/");
    }

    rewritten.replace("~/", "/")
}

/// A backend submitting to the Slurm container used in CI.
#[derive(Debug, Clone)]
pub struct CircleCiBackend {
    /// The Slurm command line tools.
    cli: SlurmCli,
    /// The home directory of the host.
    home: Option<PathBuf>,
}

impl CircleCiBackend {
    /// Constructs a new CI backend.
    pub fn new() -> Self {
        Self {
            cli: SlurmCli::remote(RemoteShell::new([
                "sshpass",
                "-p",
                "testpass",
                "ssh",
                "-p",
                "10022",
                "circleci@localhost",
            ])),
            home: dirs::home_dir(),
        }
    }

    /// Rewrites a path for the container.
    fn rewrite(&self, path: &Path) -> PathBuf {
        PathBuf::from(rewrite_home(
            &path.to_string_lossy(),
            self.home.as_deref(),
        ))
    }

    /// Gets the command line submitting an artifact to the container.
    pub fn submit_command(&self, artifact: &Path) -> Vec<String> {
        self.cli.submit_command(&self.rewrite(artifact))
    }
}

#[async_trait]
impl SubmissionBackend for CircleCiBackend {
    fn name(&self) -> &'static str {
        "circleci"
    }

    fn adapt_settings(&self, settings: &mut Settings) {
        // The container's Slurm has no QOS, memory or module support
        settings.qos = None;
        settings.mincpus = None;
        settings.mem_per_cpu = None;
        settings.modules.clear();
        settings.work_dir = Some(self.rewrite(settings.work_dir()));
    }

    async fn generate_artifacts(
        &self,
        tasks: &NonEmpty<Task>,
        settings: &Settings,
        artifact_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        write_task_scripts(tasks, settings, artifact_dir).await
    }

    async fn submit_one(&self, artifact: &Path) -> Result<Option<String>> {
        run_command(&self.submit_command(artifact)).await
    }

    async fn query_status(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.status(ids).await
    }

    async fn query_accounting(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.accounting(ids).await
    }
}
