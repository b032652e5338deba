//! Implementation of the direct Slurm backend.
//!
//! Each task is submitted as its own Slurm job from a host with direct access
//! to the scheduler's command line tools.

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

/// A backend submitting one Slurm job per task on the Sherlock cluster.
#[derive(Debug, Clone, Default)]
pub struct SherlockBackend {
    /// The Slurm command line tools.
    cli: SlurmCli,
}

impl SherlockBackend {
    /// Constructs a new Sherlock backend.
    pub fn new() -> Self {
        Self {
            cli: SlurmCli::local(),
        }
    }
}

#[async_trait]
impl SubmissionBackend for SherlockBackend {
    fn name(&self) -> &'static str {
        "sherlock"
    }

    fn adapt_settings(&self, settings: &mut Settings) {
        // Sherlock accounts jobs against a QOS named after the partition
        if let Some(partition) = &settings.partition {
            settings.qos = Some(partition.clone());
        }
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
        self.cli.submit(artifact).await
    }

    async fn query_status(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.status(ids).await
    }

    async fn query_accounting(&self, ids: &[JobId]) -> Result<Option<String>> {
        self.cli.accounting(ids).await
    }
}
