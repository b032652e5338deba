//! Implementation of the local test backend.
//!
//! Artifacts are executed synchronously with `bash` at submission time, from
//! the directory their `--chdir` directive names. The status and accounting
//! queries report every job as completed with a zero exit code without
//! consulting any scheduler.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use itertools::Itertools as _;
use nonempty::NonEmpty;

use super::SubmissionBackend;
use super::write_task_scripts;
use crate::JobId;
use crate::Result;
use crate::Settings;
use crate::Task;
use crate::command::run_command;
use crate::command::run_command_in;
use crate::error::IoContext as _;

/// The shell used to run artifacts.
const SHELL: &str = "/bin/bash";

/// Gets the directory named by a script's `#SBATCH --chdir` directive.
fn chdir_directive(script: &str) -> Option<&str> {
    script
        .lines()
        .find_map(|line| line.trim().strip_prefix("#SBATCH --chdir="))
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
}

/// A backend that runs every artifact on the local host.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    /// Constructs a new local backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubmissionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn adapt_settings(&self, settings: &mut Settings) {
        settings.qos = None;
        settings.mincpus = None;
        settings.mem_per_cpu = None;
        settings.modules.clear();
        settings.srun_cmd = None;
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
        let script = tokio::fs::read_to_string(artifact).await.io_context(|| {
            format!(
                "failed to read batch script `{path}`",
                path = artifact.display()
            )
        })?;

        let command_line = [SHELL.to_string(), artifact.to_string_lossy().into_owned()];
        match chdir_directive(&script) {
            Some(dir) => run_command_in(Path::new(dir), &command_line).await,
            None => run_command(&command_line).await,
        }
    }

    async fn query_status(&self, ids: &[JobId]) -> Result<Option<String>> {
        Ok(Some(ids.iter().map(|id| format!("{id},COMPLETED")).join("\n")))
    }

    async fn query_accounting(&self, ids: &[JobId]) -> Result<Option<String>> {
        Ok(Some(
            ids.iter()
                .map(|id| format!("{id}  COMPLETED  0:0"))
                .join("\n"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::status::parse_accounting;
    use crate::status::parse_status;

    #[tokio::test]
    async fn synthesized_queries() {
        let backend = LocalBackend::new();
        let ids = [JobId::new("1001"), JobId::new("1002")];

        let status = backend.query_status(&ids).await.unwrap();
        assert_eq!(status.as_deref(), Some("1001,COMPLETED\n1002,COMPLETED"));
        assert!(!parse_status(status.as_deref()).unwrap().has_active());

        let accounting = backend.query_accounting(&ids).await.unwrap();
        let records = parse_accounting(accounting.as_deref()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.exit_code == 0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn artifacts_run_at_submission() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            max_runtime: Some("00:10:00".parse().unwrap()),
            srun_cmd: Some("srun".to_string()),
            work_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let backend = LocalBackend::new();
        backend.adapt_settings(&mut settings);
        assert_eq!(settings.srun_cmd, None);

        let tasks = NonEmpty::new(Task::new("echo \"Submitted batch job 1001\""));
        let artifacts = backend
            .generate_artifacts(&tasks, &settings, dir.path())
            .await
            .unwrap();
        let output = backend.submit_one(&artifacts[0]).await.unwrap();
        assert_eq!(output.as_deref(), Some("Submitted batch job 1001"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn artifacts_run_from_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("run");
        std::fs::create_dir_all(work_dir.join("log")).unwrap();
        let settings = Settings {
            max_runtime: Some("00:10:00".parse().unwrap()),
            work_dir: Some(work_dir.clone()),
            ..Default::default()
        };

        let tasks = NonEmpty::new(Task::new(
            "echo \"Submitted batch job 1001\" >&2; echo output >> log/sjob-0000.log",
        ));
        let backend = LocalBackend::new();
        let artifacts = backend
            .generate_artifacts(&tasks, &settings, &work_dir.join("log"))
            .await
            .unwrap();
        let output = backend.submit_one(&artifacts[0]).await.unwrap();
        assert_eq!(output.as_deref(), Some("Submitted batch job 1001"));
        assert_eq!(
            std::fs::read_to_string(work_dir.join("log").join("sjob-0000.log")).unwrap(),
            "output\n"
        );
    }

    #[test]
    fn chdir_directives() {
        assert_eq!(
            chdir_directive("#!/bin/bash\n#SBATCH --job-name=x\n#SBATCH --chdir=/scratch/run\n"),
            Some("/scratch/run")
        );
        assert_eq!(chdir_directive("#!/bin/bash\necho hi\n"), None);
    }
}
