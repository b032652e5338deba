//! Error types for job submission and monitoring.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use itertools::Itertools as _;

use crate::JobId;
use crate::JobState;
use crate::Phase;

/// Represents a failure to interpret the output of a scheduler tool.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The submission acknowledgement did not contain a job identifier.
    #[error("job ID could not be extracted from the submission output:\n{output}")]
    JobId {
        /// The output of the submission command.
        output: String,
    },

    /// A line of the status query output was not a `<job id>,<state>` pair.
    #[error("malformed status line `{line}`")]
    StatusLine {
        /// The offending line.
        line: String,
    },

    /// A line of the accounting query output was not a
    /// `<job id> <state> <exit code>:<signal>` record.
    #[error("malformed accounting line `{line}`")]
    AccountingLine {
        /// The offending line.
        line: String,
    },

    /// A runtime string was not in `[D-]HH:MM:SS`, `MM:SS` or seconds format.
    #[error("invalid runtime `{value}`: expected `[D-]HH:MM:SS`, `MM:SS` or seconds")]
    Runtime {
        /// The offending value.
        value: String,
    },
}

/// A job reported as unsuccessful once every job reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    /// The scheduler-assigned identifier of the job.
    pub id: JobId,
    /// The last recorded state of the job.
    pub state: JobState,
    /// The path stem of the job's log files (`<stem>.out` and `<stem>.err`).
    pub logs: PathBuf,
}

impl fmt::Display for FailedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{id} ({state}, logfiles: {logs}.{{err,out}})",
            id = self.id,
            state = self.state,
            logs = self.logs.display()
        )
    }
}

/// Represents an error from the task manager or one of its backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mandatory setting is missing or invalid, or the task list is empty.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The execution system identity did not match any known backend.
    #[error("could not identify `{0}` as a valid execution system")]
    BackendNotFound(String),

    /// The execution system identity could not be determined.
    #[error("could not identify the execution system")]
    BackendUndetermined,

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed ({status}):\n{output}")]
    ExternalCommand {
        /// The command line that was executed.
        command: String,
        /// The exit status of the command.
        status: ExitStatus,
        /// The combined stdout and stderr of the command.
        output: String,
    },

    /// The output of a scheduler tool could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Accounting records were missing for jobs that left the queue.
    #[error("accounting is unavailable: {0}")]
    AccountingUnavailable(String),

    /// One or more jobs finished with a non-zero exit code.
    #[error(
        "one or more tasks finished with a non-zero exit code (sum {exit_code_sum}):\n\t{}",
        .failed.iter().join("\n\t")
    )]
    AggregateJobFailure {
        /// The sum of every job's exit code.
        exit_code_sum: u64,
        /// The jobs that did not complete successfully.
        failed: Vec<FailedJob>,
    },

    /// A task manager operation was invoked out of order.
    #[error("cannot {operation} while the task manager is {phase}")]
    InvalidPhase {
        /// The operation that was attempted.
        operation: &'static str,
        /// The phase the task manager was in.
        phase: Phase,
    },

    /// Waiting on jobs was cancelled.
    #[error("waiting on jobs was cancelled")]
    Cancelled,

    /// A script could not be rendered.
    #[error("failed to render script")]
    Render(#[from] fmt::Error),

    /// An I/O error occurred.
    #[error("{context}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// The result type for task manager operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches a description to I/O errors.
pub(crate) trait IoContext<T> {
    /// Converts the I/O error into an [`Error::Io`] described by `context`.
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::Io {
            context: context(),
            source,
        })
    }
}
