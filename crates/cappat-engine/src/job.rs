//! Tasks, job identifiers, and scheduler job states.

use std::fmt;

/// A single unit of work: one participant-group invocation as a shell
/// command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task(String);

impl Task {
    /// Creates a task from a command line.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self(command_line.into())
    }

    /// Gets the command line of the task.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Task {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Task {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Creates a job identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gets the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The state of a scheduled job.
///
/// States are parsed from both the compact codes printed by `squeue` (`PD`,
/// `R`, ...) and the long names printed by `sacct` (`PENDING`, `RUNNING`,
/// ...). Unrecognized codes are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    /// The job was accepted by the scheduler but has not been polled yet.
    Submitted,
    /// The job is queued.
    Pending,
    /// The job is running.
    Running,
    /// The job's nodes are being configured.
    Configuring,
    /// The job is finishing up.
    Completing,
    /// The job is suspended.
    Suspended,
    /// The job was requeued.
    Requeued,
    /// The job completed successfully.
    Completed,
    /// The job exited with a non-zero code.
    Failed,
    /// The job was cancelled.
    Cancelled,
    /// The job hit its time limit.
    Timeout,
    /// The job was terminated by a node failure.
    NodeFail,
    /// The job was preempted.
    Preempted,
    /// The job was held after a special exit.
    SpecialExit,
    /// The job ran out of memory.
    OutOfMemory,
    /// Any other state code.
    Other(String),
}

impl JobState {
    /// Parses a scheduler state code.
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "SUBMITTED" => Self::Submitted,
            "PD" | "PENDING" => Self::Pending,
            "R" | "RUNNING" => Self::Running,
            "CF" | "CONFIGURING" => Self::Configuring,
            "CG" | "COMPLETING" => Self::Completing,
            "S" | "SUSPENDED" => Self::Suspended,
            "RQ" | "REQUEUED" => Self::Requeued,
            "CD" | "COMPLETED" => Self::Completed,
            "F" | "FAILED" => Self::Failed,
            "CA" | "CANCELLED" => Self::Cancelled,
            "TO" | "TIMEOUT" => Self::Timeout,
            "NF" | "NODE_FAIL" => Self::NodeFail,
            "PR" | "PREEMPTED" => Self::Preempted,
            "SE" | "SPECIAL_EXIT" => Self::SpecialExit,
            "OOM" | "OUT_OF_MEMORY" => Self::OutOfMemory,
            other => Self::Other(other.to_string()),
        }
    }

    /// Determines if the job is still queued or running.
    ///
    /// Every state outside of this set is terminal for polling purposes.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Running
                | Self::Configuring
                | Self::Completing
                | Self::Suspended
                | Self::Requeued
        )
    }

    /// Determines if the state is one of the scheduler's failure states.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Cancelled
                | Self::Timeout
                | Self::NodeFail
                | Self::Preempted
                | Self::SpecialExit
                | Self::OutOfMemory
        )
    }

    /// Determines if the job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl From<&str> for JobState {
    fn from(code: &str) -> Self {
        Self::parse(code)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Configuring => "CONFIGURING",
            Self::Completing => "COMPLETING",
            Self::Suspended => "SUSPENDED",
            Self::Requeued => "REQUEUED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::NodeFail => "NODE_FAIL",
            Self::Preempted => "PREEMPTED",
            Self::SpecialExit => "SPECIAL_EXIT",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Other(code) => code,
        };

        f.write_str(name)
    }
}
