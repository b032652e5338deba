//! Implementation of the task manager.
//!
//! The task manager owns the task list and the job table of one run. A run
//! moves through the following phases:
//!
//! ```text
//! Created --map--> Mapped --wait--> Waiting --+--> Succeeded
//!                                             +--> Failed
//! ```
//!
//! The group level can be run once the participant jobs succeeded.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use itertools::Itertools as _;
use nonempty::NonEmpty;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::Error;
use crate::FailedJob;
use crate::JobId;
use crate::JobState;
use crate::Result;
use crate::Settings;
use crate::Task;
use crate::backend::SubmissionBackend;
use crate::command::run_command_in;
use crate::config::LOG_DIR_NAME;
use crate::error::IoContext as _;
use crate::script::GROUP_WRAPPER_FILE_NAME;
use crate::script::JOB_LOG_STEM;
use crate::script::render_group_wrapper;
use crate::script::write_script;
use crate::selector::resolve_identity;
use crate::selector::select;
use crate::status::AccountingRecord;
use crate::status::QueueStatus;
use crate::status::parse_accounting;
use crate::status::parse_job_id;
use crate::status::parse_status;

/// The shell used to run the group level wrapper.
const SHELL: &str = "/bin/bash";

/// The phase of a task manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The task manager was created; nothing was submitted yet.
    Created,
    /// Every artifact was submitted.
    Mapped,
    /// The task manager is polling the scheduler.
    Waiting,
    /// Every job finished with a zero exit code.
    Succeeded,
    /// Submission, polling or aggregation failed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Mapped => write!(f, "mapped"),
            Self::Waiting => write!(f, "waiting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The outcome of checking accounting output after the queue drained.
enum Settlement {
    /// Every tracked job has a terminal accounting record.
    Settled(Vec<AccountingRecord>),
    /// The accounting records are not yet complete.
    Unsettled(String),
}

/// Submits a task list through a backend and monitors the resulting jobs.
#[derive(Debug)]
pub struct TaskManager {
    /// The backend jobs are submitted through.
    backend: Box<dyn SubmissionBackend>,
    /// The frozen settings of the run.
    settings: Settings,
    /// The tasks of the run.
    tasks: NonEmpty<Task>,
    /// The job table, in submission order.
    jobs: IndexMap<JobId, JobState>,
    /// The group level command line; empty when there is no group level.
    group_command: Vec<String>,
    /// The absolute working directory.
    work_dir: PathBuf,
    /// The directory holding artifacts and job logs.
    aux_dir: PathBuf,
    /// The current phase.
    phase: Phase,
    /// The token cancelling the wait loop.
    cancellation: CancellationToken,
}

impl TaskManager {
    /// Builds a task manager for the execution system the settings identify,
    /// falling back to the host name.
    pub fn build(tasks: Vec<Task>, settings: Settings) -> Result<Self> {
        let identity = resolve_identity(settings.execution_system.as_deref())?;
        let kind = select(&identity)?;
        info!(backend = %kind, "selected submission backend");
        Self::new(kind.create(), tasks, settings)
    }

    /// Creates a task manager submitting through the given backend.
    ///
    /// The settings are validated, the task runtime is derived from the
    /// maximum runtime, and the backend adapts the settings. The settings are
    /// not modified afterwards.
    pub fn new(
        backend: Box<dyn SubmissionBackend>,
        tasks: Vec<Task>,
        mut settings: Settings,
    ) -> Result<Self> {
        let tasks = NonEmpty::from_vec(tasks)
            .ok_or_else(|| Error::Configuration("the task list is empty".to_string()))?;

        settings.validate()?;
        let work_dir = std::path::absolute(settings.work_dir()).io_context(|| {
            format!(
                "failed to resolve working directory `{path}`",
                path = settings.work_dir().display()
            )
        })?;
        let aux_dir = work_dir.join(LOG_DIR_NAME);
        std::fs::create_dir_all(&aux_dir).io_context(|| {
            format!(
                "failed to create log directory `{path}`",
                path = aux_dir.display()
            )
        })?;
        settings.work_dir = Some(work_dir.clone());

        let group_command = derive_group_command(&settings)?;
        let settings = settings.freeze(backend.as_ref())?;

        info!(
            backend = backend.name(),
            tasks = tasks.len(),
            max_runtime = ?settings.max_runtime.map(|r| r.to_string()),
            child_runtime = ?settings.child_runtime.map(|r| r.to_string()),
            work_dir = %work_dir.display(),
            "created task manager"
        );

        Ok(Self {
            backend,
            settings,
            tasks,
            jobs: IndexMap::new(),
            group_command,
            work_dir,
            aux_dir,
            phase: Phase::Created,
            cancellation: CancellationToken::new(),
        })
    }

    /// Gets the name of the backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Gets the frozen settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gets the tasks.
    pub fn tasks(&self) -> &NonEmpty<Task> {
        &self.tasks
    }

    /// Gets the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Gets the job table, in submission order.
    pub fn jobs(&self) -> &IndexMap<JobId, JobState> {
        &self.jobs
    }

    /// Gets the identifiers of the submitted jobs, in submission order.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.keys().cloned().collect()
    }

    /// Gets the working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Gets the directory holding artifacts and job logs.
    pub fn aux_dir(&self) -> &Path {
        &self.aux_dir
    }

    /// Gets the group level command line.
    pub fn group_command(&self) -> &[String] {
        &self.group_command
    }

    /// Overrides the group level command line.
    ///
    /// An empty command line disables the group level.
    pub fn set_group_command(&mut self, command: Vec<String>) {
        self.group_command = command;
    }

    /// Gets a token that cancels [`wait_participant`](Self::wait_participant).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Generates the artifacts and submits each of them.
    ///
    /// Returns the job identifiers in submission order.
    pub async fn map_participant(&mut self) -> Result<Vec<JobId>> {
        self.ensure_phase("map participant jobs", Phase::Created)?;
        match self.submit_all().await {
            Ok(()) => {
                self.phase = Phase::Mapped;
                Ok(self.job_ids())
            }
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    /// Submits every artifact, recording each job as submitted.
    async fn submit_all(&mut self) -> Result<()> {
        let artifacts = self
            .backend
            .generate_artifacts(&self.tasks, &self.settings, &self.aux_dir)
            .await?;

        for (index, artifact) in artifacts.iter().enumerate() {
            info!(
                artifact = %artifact.display(),
                index,
                "submitting batch script"
            );

            let output = self.backend.submit_one(artifact).await?;
            let id = parse_job_id(output.as_deref().unwrap_or_default())?;
            if self.jobs.insert(id.clone(), JobState::Submitted).is_some() {
                warn!(job = %id, "scheduler returned a job ID that was already tracked");
            }

            debug!(job = %id, artifact = %artifact.display(), "job submitted");
        }

        info!(jobs = %self.jobs.keys().join(","), "submitted participant jobs");
        Ok(())
    }

    /// Polls the scheduler until no job is active, then aggregates the exit
    /// codes of every job.
    ///
    /// Returns the job identifiers when every exit code is zero; otherwise
    /// returns [`Error::AggregateJobFailure`] naming every job that did not
    /// complete successfully.
    pub async fn wait_participant(&mut self) -> Result<Vec<JobId>> {
        self.ensure_phase("wait on participant jobs", Phase::Mapped)?;
        self.phase = Phase::Waiting;

        let records = match self.poll().await {
            Ok(records) => records,
            Err(e) => {
                if matches!(e, Error::Cancelled) {
                    warn!(
                        jobs = %self.jobs.keys().join(","),
                        "stopped waiting; submitted jobs remain with the scheduler"
                    );
                }

                self.phase = Phase::Failed;
                return Err(e);
            }
        };

        self.aggregate(records)
    }

    /// Runs the poll loop until accounting records exist for every job.
    async fn poll(&mut self) -> Result<Vec<AccountingRecord>> {
        let ids = self.job_ids();
        let interval = self.settings.poll_interval();
        let mut settle_rounds = 0;

        loop {
            if self.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let output = self.backend.query_status(&ids).await?;
            let status = parse_status(output.as_deref())?;
            let active = status.has_active();
            if let QueueStatus::Jobs(jobs) = status {
                self.update_states(jobs);
            }

            if active {
                settle_rounds = 0;
                debug!(
                    states = %self.jobs.iter().map(|(id, s)| format!("{id}:{s}")).join(","),
                    "jobs are still active"
                );
            } else {
                info!("no active jobs remain in the queue; querying accounting");
                let output = self.backend.query_accounting(&ids).await?;
                match self.settle(output.as_deref())? {
                    Settlement::Settled(records) => return Ok(records),
                    Settlement::Unsettled(reason) => {
                        if settle_rounds >= self.settings.settle_polls {
                            error!(reason = %reason, "accounting never caught up with the queue");
                            return Err(Error::AccountingUnavailable(reason));
                        }

                        settle_rounds += 1;
                        warn!(
                            reason = %reason,
                            round = settle_rounds,
                            "accounting is not settled yet; resuming polling"
                        );
                    }
                }
            }

            self.pause(interval).await?;
        }
    }

    /// Sleeps for the poll interval unless cancelled first.
    async fn pause(&self, interval: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }

    /// Updates the job table from a status query.
    fn update_states(&mut self, jobs: Vec<(JobId, JobState)>) {
        for (id, state) in jobs {
            match self.jobs.get_mut(&id) {
                Some(current) => *current = state,
                None => debug!(job = %id, "ignoring status of untracked job"),
            }
        }
    }

    /// Checks that accounting covers every tracked job with a terminal state.
    fn settle(&self, output: Option<&str>) -> Result<Settlement> {
        let records = match parse_accounting(output) {
            Ok(records) => records,
            Err(Error::AccountingUnavailable(reason)) => {
                return Ok(Settlement::Unsettled(reason));
            }
            Err(e) => return Err(e),
        };

        let missing = self
            .jobs
            .keys()
            .filter(|id| !records.iter().any(|r| &r.id == *id))
            .join(", ");
        if !missing.is_empty() {
            return Ok(Settlement::Unsettled(format!(
                "no accounting records for job(s) {missing}"
            )));
        }

        let active = records
            .iter()
            .filter(|r| r.state.is_active())
            .map(|r| &r.id)
            .join(", ");
        if !active.is_empty() {
            return Ok(Settlement::Unsettled(format!(
                "job(s) {active} are still active according to accounting"
            )));
        }

        Ok(Settlement::Settled(records))
    }

    /// Records the final states and sums the exit codes of every job.
    fn aggregate(&mut self, records: Vec<AccountingRecord>) -> Result<Vec<JobId>> {
        let mut exit_code_sum = 0u64;
        for record in records {
            exit_code_sum += u64::from(record.exit_code);
            if let Some(state) = self.jobs.get_mut(&record.id) {
                *state = record.state;
            }
        }

        if exit_code_sum != 0 {
            let failed = self
                .jobs
                .iter()
                .filter(|(_, state)| !state.is_success())
                .map(|(id, state)| FailedJob {
                    id: id.clone(),
                    state: state.clone(),
                    logs: self.aux_dir.join(format!("{JOB_LOG_STEM}-{id}")),
                })
                .collect::<Vec<_>>();

            error!(
                exit_code_sum,
                failed = %failed.iter().map(|f| &f.id).join(","),
                "participant jobs failed"
            );
            self.phase = Phase::Failed;
            return Err(Error::AggregateJobFailure {
                exit_code_sum,
                failed,
            });
        }

        for (id, state) in self.jobs.iter().filter(|(_, s)| !s.is_success()) {
            warn!(job = %id, state = %state, "job exited with code zero but did not complete");
        }

        self.phase = Phase::Succeeded;
        info!(jobs = self.jobs.len(), "participant jobs finished");
        Ok(self.job_ids())
    }

    /// Runs the group level command once.
    ///
    /// Returns `true` if there is no group level command or if the command
    /// produced any output.
    pub async fn run_group_level(&self) -> Result<bool> {
        if self.group_command.is_empty() {
            warn!("no group level command is set");
            return Ok(true);
        }

        if self.phase != Phase::Succeeded {
            warn!(phase = %self.phase, "running the group level before participant jobs succeeded");
        }

        let command_line = shlex::try_join(self.group_command.iter().map(String::as_str))
            .map_err(|e| Error::Configuration(format!("the group command cannot be quoted: {e}")))?;

        let path = self.work_dir.join(GROUP_WRAPPER_FILE_NAME);
        let script = render_group_wrapper(&self.settings.modules, &command_line)?;
        write_script(&path, &script).await?;

        info!(command = %command_line, "running group level");
        match run_command_in(
            &self.work_dir,
            &[SHELL.to_string(), path.to_string_lossy().into_owned()],
        )
        .await?
        {
            Some(output) => {
                info!(output = %output, "group level finished");
                Ok(true)
            }
            None => {
                warn!("group level produced no output");
                Ok(false)
            }
        }
    }

    /// Ensures the task manager is in the expected phase.
    fn ensure_phase(&self, operation: &'static str, expected: Phase) -> Result<()> {
        if self.phase != expected {
            return Err(Error::InvalidPhase {
                operation,
                phase: self.phase,
            });
        }

        Ok(())
    }
}

/// Derives the group level command: `<executable> <bids_dir> <output_dir>
/// group [<group_args>...]`.
///
/// A relative output directory is resolved against the working directory,
/// where participant tasks write their derivatives.
fn derive_group_command(settings: &Settings) -> Result<Vec<String>> {
    let mut command = vec![
        settings.executable()?.to_string(),
        settings.bids_dir()?.to_string_lossy().into_owned(),
        settings
            .work_dir()
            .join(&settings.output_dir)
            .to_string_lossy()
            .into_owned(),
        "group".to_string(),
    ];

    if let Some(args) = settings.group_args.as_deref().filter(|a| !a.trim().is_empty()) {
        let args = shlex::split(args).ok_or_else(|| {
            Error::Configuration(format!("setting `group_args` is not valid shell syntax: {args}"))
        })?;
        command.extend(args);
    }

    Ok(command)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::ParseError;
    use crate::script::task_script_name;

    /// Canned scheduler responses.
    ///
    /// The last response of each queue is repeated once the others are used
    /// up; an empty queue answers with no output.
    #[derive(Debug, Default)]
    struct Script {
        submissions: Mutex<VecDeque<String>>,
        statuses: Mutex<VecDeque<Option<String>>>,
        accounting: Mutex<VecDeque<Option<String>>>,
        status_queries: AtomicUsize,
        accounting_queries: AtomicUsize,
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    #[derive(Debug, Clone, Default)]
    struct ScriptedBackend(Arc<Script>);

    impl ScriptedBackend {
        fn new(submissions: &[&str], statuses: &[Option<&str>], accounting: &[Option<&str>]) -> Self {
            let script = Script {
                submissions: Mutex::new(submissions.iter().map(|s| s.to_string()).collect()),
                statuses: Mutex::new(statuses.iter().map(|s| s.map(str::to_string)).collect()),
                accounting: Mutex::new(accounting.iter().map(|s| s.map(str::to_string)).collect()),
                ..Default::default()
            };
            Self(Arc::new(script))
        }

        fn status_queries(&self) -> usize {
            self.0.status_queries.load(Ordering::SeqCst)
        }

        fn accounting_queries(&self) -> usize {
            self.0.accounting_queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SubmissionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate_artifacts(
            &self,
            tasks: &NonEmpty<Task>,
            _: &Settings,
            artifact_dir: &Path,
        ) -> Result<Vec<PathBuf>> {
            Ok((0..tasks.len())
                .map(|i| artifact_dir.join(task_script_name(i)))
                .collect())
        }

        async fn submit_one(&self, _: &Path) -> Result<Option<String>> {
            Ok(self.0.submissions.lock().unwrap().pop_front())
        }

        async fn query_status(&self, _: &[JobId]) -> Result<Option<String>> {
            self.0.status_queries.fetch_add(1, Ordering::SeqCst);
            Ok(next(&self.0.statuses).flatten())
        }

        async fn query_accounting(&self, _: &[JobId]) -> Result<Option<String>> {
            self.0.accounting_queries.fetch_add(1, Ordering::SeqCst);
            Ok(next(&self.0.accounting).flatten())
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            executable: Some("mriqc".to_string()),
            bids_dir: Some(PathBuf::from("/data/ds000030")),
            max_runtime: Some("00:05:00".parse().unwrap()),
            work_dir: Some(dir.path().to_path_buf()),
            poll_interval: 0,
            ..Default::default()
        }
    }

    fn tasks(count: usize) -> Vec<Task> {
        (0..count)
            .map(|i| Task::new(format!("mriqc /data out participant --participant_label {i}")))
            .collect()
    }

    fn manager(backend: &ScriptedBackend, count: usize, settings: Settings) -> TaskManager {
        TaskManager::new(Box::new(backend.clone()), tasks(count), settings).unwrap()
    }

    #[test]
    fn construction() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            group_args: Some("--verbose-reports --n_procs 4".to_string()),
            modules: vec!["module load".to_string(), "singularity".to_string()],
            ..settings(&dir)
        };

        let manager = manager(&ScriptedBackend::default(), 2, settings);
        assert_eq!(manager.phase(), Phase::Created);
        assert_eq!(manager.backend_name(), "scripted");
        assert_eq!(
            manager.settings().child_runtime.unwrap().to_string(),
            "00:04:15"
        );
        assert_eq!(manager.settings().modules, ["module load singularity"]);
        assert_eq!(
            manager.group_command(),
            [
                "mriqc",
                "/data/ds000030",
                &*dir.path().join("out").to_string_lossy(),
                "group",
                "--verbose-reports",
                "--n_procs",
                "4"
            ]
        );
        assert!(manager.aux_dir().is_dir());
        assert!(manager.aux_dir().ends_with("log"));
        assert!(manager.jobs().is_empty());
    }

    #[test]
    fn empty_task_list() {
        let dir = tempfile::tempdir().unwrap();
        let error = TaskManager::new(
            Box::new(ScriptedBackend::default()),
            Vec::new(),
            settings(&dir),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[test]
    fn missing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let error = TaskManager::new(
            Box::new(ScriptedBackend::default()),
            tasks(1),
            Settings {
                max_runtime: None,
                ..settings(&dir)
            },
        )
        .unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn aggregate_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(
            &["Submitted batch job 49533", "Submitted batch job 49534"],
            &[Some("49533,R\n49534,R"), None],
            &[Some("49533 COMPLETED 0:0\n49534 FAILED 113:0")],
        );

        let mut manager = manager(&backend, 2, settings(&dir));
        let ids = manager.map_participant().await.unwrap();
        assert_eq!(ids, [JobId::new("49533"), JobId::new("49534")]);
        assert_eq!(manager.phase(), Phase::Mapped);
        assert!(manager.jobs().values().all(|s| *s == JobState::Submitted));

        match manager.wait_participant().await.unwrap_err() {
            Error::AggregateJobFailure {
                exit_code_sum,
                failed,
            } => {
                assert_eq!(exit_code_sum, 113);
                assert_eq!(
                    failed,
                    [FailedJob {
                        id: JobId::new("49534"),
                        state: JobState::Failed,
                        logs: manager.aux_dir().join("bidsapp-49534"),
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(manager.phase(), Phase::Failed);
        assert_eq!(backend.status_queries(), 2);
        assert_eq!(backend.accounting_queries(), 1);
        assert_eq!(manager.jobs()[&JobId::new("49533")], JobState::Completed);
    }

    #[tokio::test]
    async fn drained_queue_ends_polling() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(
            &["Submitted batch job 1", "Submitted batch job 2"],
            &[Some("slurm_load_jobs error: Invalid job id specified")],
            &[Some("1 COMPLETED 0:0\n2 COMPLETED 0:0")],
        );

        let mut manager = manager(&backend, 2, settings(&dir));
        manager.map_participant().await.unwrap();
        let ids = manager.wait_participant().await.unwrap();
        assert_eq!(ids, [JobId::new("1"), JobId::new("2")]);
        assert_eq!(manager.phase(), Phase::Succeeded);
        assert_eq!(backend.status_queries(), 1);
        assert_eq!(backend.accounting_queries(), 1);
        assert!(manager.jobs().values().all(JobState::is_success));
    }

    #[tokio::test]
    async fn premature_empty_status_settles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(
            &["Submitted batch job 7"],
            &[None, Some("7,PD"), Some("7,R"), None],
            &[None, Some("7 COMPLETED 0:0")],
        );

        let mut manager = manager(&backend, 1, settings(&dir));
        manager.map_participant().await.unwrap();
        manager.wait_participant().await.unwrap();
        assert_eq!(backend.status_queries(), 4);
        assert_eq!(backend.accounting_queries(), 2);
        assert_eq!(manager.phase(), Phase::Succeeded);
    }

    #[tokio::test]
    async fn active_jobs_restore_settle_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(
            &["Submitted batch job 7"],
            &[None, Some("7,R"), None, Some("7,R"), None],
            &[None, None, Some("7 COMPLETED 0:0")],
        );

        let settings = Settings {
            settle_polls: 1,
            ..settings(&dir)
        };
        let mut manager = manager(&backend, 1, settings);
        manager.map_participant().await.unwrap();
        manager.wait_participant().await.unwrap();
        assert_eq!(backend.status_queries(), 5);
        assert_eq!(backend.accounting_queries(), 3);
        assert_eq!(manager.phase(), Phase::Succeeded);
    }

    #[tokio::test]
    async fn missing_accounting_records_settle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(
            &["Submitted batch job 8", "Submitted batch job 9"],
            &[None],
            &[Some("8 COMPLETED 0:0"), Some("8 COMPLETED 0:0\n9 COMPLETED 0:0")],
        );

        let mut manager = manager(&backend, 2, settings(&dir));
        manager.map_participant().await.unwrap();
        manager.wait_participant().await.unwrap();
        assert_eq!(backend.accounting_queries(), 2);
    }

    #[tokio::test]
    async fn accounting_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(&["Submitted batch job 7"], &[None], &[None]);

        let settings = Settings {
            settle_polls: 2,
            ..settings(&dir)
        };
        let mut manager = manager(&backend, 1, settings);
        manager.map_participant().await.unwrap();
        let error = manager.wait_participant().await.unwrap_err();
        assert!(matches!(error, Error::AccountingUnavailable(_)));
        assert_eq!(backend.accounting_queries(), 3);
        assert_eq!(manager.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn malformed_status_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(&["Submitted batch job 7"], &[Some("7 R")], &[]);

        let mut manager = manager(&backend, 1, settings(&dir));
        manager.map_participant().await.unwrap();
        let error = manager.wait_participant().await.unwrap_err();
        assert!(matches!(error, Error::Parse(ParseError::StatusLine { .. })));
    }

    #[tokio::test]
    async fn unparsable_acknowledgement() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(&["sbatch: error: invalid partition"], &[], &[]);

        let mut manager = manager(&backend, 1, settings(&dir));
        let error = manager.map_participant().await.unwrap_err();
        assert!(matches!(error, Error::Parse(ParseError::JobId { .. })));
        assert_eq!(manager.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn operations_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(&["Submitted batch job 7"], &[None], &[]);

        let mut manager = manager(&backend, 1, settings(&dir));
        let error = manager.wait_participant().await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "cannot wait on participant jobs while the task manager is created"
        );

        manager.map_participant().await.unwrap();
        let error = manager.map_participant().await.unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidPhase {
                phase: Phase::Mapped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn waiting_is_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(&["Submitted batch job 7"], &[Some("7,R")], &[]);

        let settings = Settings {
            poll_interval: 3600,
            ..settings(&dir)
        };
        let mut manager = manager(&backend, 1, settings);
        manager.map_participant().await.unwrap();

        let token = manager.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let error = manager.wait_participant().await.unwrap_err();
        assert!(matches!(error, Error::Cancelled));
        assert_eq!(manager.phase(), Phase::Failed);
        assert_eq!(backend.status_queries(), 1);
        assert_eq!(manager.jobs()[&JobId::new("7")], JobState::Running);
    }

    #[tokio::test]
    async fn no_group_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(&ScriptedBackend::default(), 1, settings(&dir));
        manager.set_group_command(Vec::new());
        assert!(manager.run_group_level().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn group_level_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(&ScriptedBackend::default(), 1, settings(&dir));

        manager.set_group_command(vec!["echo".to_string(), "it's done".to_string()]);
        assert!(manager.run_group_level().await.unwrap());
        assert!(dir.path().join("group-wrapper.sh").is_file());

        manager.set_group_command(vec!["true".to_string()]);
        assert!(!manager.run_group_level().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn group_level_runs_from_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("run");
        let settings = Settings {
            work_dir: Some(work_dir.clone()),
            ..settings(&dir)
        };

        let mut manager = manager(&ScriptedBackend::default(), 1, settings);
        assert_eq!(
            manager.group_command()[2],
            work_dir.join("out").to_string_lossy()
        );

        manager.set_group_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            "pwd > where.txt; echo done".to_string(),
        ]);
        assert!(manager.run_group_level().await.unwrap());

        let location = std::fs::read_to_string(work_dir.join("where.txt")).unwrap();
        assert_eq!(
            std::fs::canonicalize(location.trim()).unwrap(),
            std::fs::canonicalize(&work_dir).unwrap()
        );
    }
}
