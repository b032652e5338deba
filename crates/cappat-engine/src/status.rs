//! Classification of scheduler output into job identifiers, states and exit
//! codes.

use std::sync::LazyLock;

use regex::Regex;

use crate::Error;
use crate::JobId;
use crate::JobState;
use crate::ParseError;
use crate::Result;

/// The message `squeue` prints once a job has left the controller's memory.
pub const INVALID_JOB_ID_MESSAGE: &str = "Invalid job id specified";

/// Regex matching the acknowledgement printed by `sbatch`.
static SUBMITTED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Submitted batch job (?P<id>\d+)").expect("invalid regex")
});

/// Regex matching a `sacct -o JobID,State,ExitCode` record.
///
/// States may be truncated with a trailing `+` or carry a `by <uid>` suffix.
static ACCOUNTING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<id>\d+)\s+(?P<state>[A-Z_]+)\+?(?:\s+by\s+\d+)?\s+(?P<exit>\d+):(?P<signal>\d+)\s*$",
    )
    .expect("invalid regex")
});

/// The classification of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    /// None of the queried jobs are known to the queue anymore.
    Drained,
    /// The states of the queried jobs still known to the queue.
    Jobs(Vec<(JobId, JobState)>),
}

impl QueueStatus {
    /// Determines if any of the reported jobs is still queued or running.
    pub fn has_active(&self) -> bool {
        match self {
            Self::Drained => false,
            Self::Jobs(jobs) => jobs.iter().any(|(_, state)| state.is_active()),
        }
    }
}

/// An accounting record of a job that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingRecord {
    /// The job identifier.
    pub id: JobId,
    /// The final state of the job.
    pub state: JobState,
    /// The exit code of the job's batch script.
    pub exit_code: u32,
    /// The signal that terminated the job, or zero.
    pub signal: u32,
}

/// Extracts the job identifier from a submission acknowledgement
/// (`Submitted batch job <digits>`).
pub fn parse_job_id(output: &str) -> Result<JobId, ParseError> {
    SUBMITTED_REGEX
        .captures(output)
        .and_then(|c| c.name("id"))
        .map(|m| JobId::new(m.as_str()))
        .ok_or_else(|| ParseError::JobId {
            output: output.to_string(),
        })
}

/// Parses the output of `squeue -o %i,%t -h`.
///
/// Empty output and the "invalid job id" message both mean the jobs are no
/// longer queued. Otherwise every non-blank line must be a `<job id>,<state>`
/// pair.
pub fn parse_status(output: Option<&str>) -> Result<QueueStatus, ParseError> {
    let Some(output) = output.filter(|o| !o.trim().is_empty()) else {
        return Ok(QueueStatus::Drained);
    };

    if output.contains(INVALID_JOB_ID_MESSAGE) {
        return Ok(QueueStatus::Drained);
    }

    let mut jobs = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let malformed = || ParseError::StatusLine {
            line: line.to_string(),
        };

        let (id, state) = line.split_once(',').ok_or_else(malformed)?;
        let (id, state) = (id.trim(), state.trim());
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() || c == '_') {
            return Err(malformed());
        }

        if state.is_empty() || !state.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed());
        }

        jobs.push((JobId::new(id), JobState::parse(state)));
    }

    Ok(QueueStatus::Jobs(jobs))
}

/// Parses the output of `sacct -n -X -o JobID,State,ExitCode`.
///
/// Empty output is reported as [`Error::AccountingUnavailable`]: a job that
/// left the queue must have an accounting record.
pub fn parse_accounting(output: Option<&str>) -> Result<Vec<AccountingRecord>> {
    let Some(output) = output.filter(|o| !o.trim().is_empty()) else {
        return Err(Error::AccountingUnavailable(
            "the accounting query produced no output".to_string(),
        ));
    };

    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let malformed = || ParseError::AccountingLine {
                line: line.to_string(),
            };

            let captures = ACCOUNTING_REGEX.captures(line).ok_or_else(malformed)?;
            Ok(AccountingRecord {
                id: JobId::new(&captures["id"]),
                state: JobState::parse(&captures["state"]),
                exit_code: captures["exit"].parse().map_err(|_| malformed())?,
                signal: captures["signal"].parse().map_err(|_| malformed())?,
            })
        })
        .collect()
}
