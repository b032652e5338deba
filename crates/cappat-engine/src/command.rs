//! Execution of external commands.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use itertools::Itertools as _;
use tokio::process::Command;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::Error;
use crate::Result;
use crate::error::IoContext as _;

/// A remote shell invocation that scheduler commands are prefixed with when
/// the scheduler is only reachable through a login node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShell(Vec<String>);

impl RemoteShell {
    /// Creates a remote shell prefix from its arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Gets the arguments of the prefix.
    pub fn args(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for RemoteShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

/// Runs a command line and returns its combined stdout and stderr.
///
/// Blank lines are removed from the output; `None` is returned if nothing
/// remains.
///
/// A non-zero exit is reported as [`Error::ExternalCommand`] carrying the
/// captured output.
pub async fn run_command<S: AsRef<str>>(command_line: &[S]) -> Result<Option<String>> {
    execute(command_line, None).await
}

/// Runs a command line from the given directory.
///
/// See [`run_command`] for how the output is reported.
pub async fn run_command_in<S: AsRef<str>>(
    dir: &Path,
    command_line: &[S],
) -> Result<Option<String>> {
    execute(command_line, Some(dir)).await
}

/// Spawns the command line, optionally from a working directory, and
/// collects its output.
async fn execute<S: AsRef<str>>(command_line: &[S], dir: Option<&Path>) -> Result<Option<String>> {
    let Some((program, args)) = command_line.split_first() else {
        return Err(Error::Configuration(
            "cannot run an empty command line".to_string(),
        ));
    };

    let command_display = command_line.iter().map(AsRef::as_ref).join(" ");
    info!(
        command = %command_display,
        dir = ?dir.map(Path::display),
        "executing command line"
    );

    let mut command = Command::new(program.as_ref());
    command
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .io_context(|| format!("failed to spawn `{program}`", program = program.as_ref()))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        error!(
            command = %command_display,
            status = %output.status,
            output = %combined,
            "command failed"
        );
        return Err(Error::ExternalCommand {
            command: command_display,
            status: output.status,
            output: combined,
        });
    }

    let result = combined
        .lines()
        .filter(|line| !line.trim().is_empty())
        .join("\n");

    if result.is_empty() {
        debug!(command = %command_display, "command output was empty");
        return Ok(None);
    }

    debug!(command = %command_display, output = %result, "command output");
    Ok(Some(result))
}
