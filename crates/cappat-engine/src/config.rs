//! Implementation of task manager settings.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::Runtime;
use crate::SubmissionBackend;
use crate::error::IoContext as _;
use crate::script::format_modules;

/// The name of the directory, relative to the working directory, that holds
/// generated batch scripts and job logs.
pub const LOG_DIR_NAME: &str = "log";

/// The default fraction of the maximum runtime offered to each task.
pub const DEFAULT_RUNTIME_FRACTION: f64 = 0.85;

/// Gets the default output directory for BIDS app derivatives.
fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

/// Gets the default node count of a job.
fn default_nodes() -> u32 {
    1
}

/// Gets the default job name.
fn default_job_name() -> String {
    "bidsapp".to_string()
}

/// Gets the default runtime fraction.
fn default_runtime_fraction() -> f64 {
    DEFAULT_RUNTIME_FRACTION
}

/// Gets the default poll interval, in seconds.
fn default_poll_interval() -> u64 {
    5
}

/// Gets the default number of settle rounds.
fn default_settle_polls() -> u32 {
    12
}

/// Creates the error for a missing mandatory setting.
fn missing(key: &str) -> Error {
    Error::Configuration(format!("setting `{key}` is required"))
}

/// Represents the settings of a participant map and group reduce run.
///
/// Settings are loaded from a YAML or TOML file; see
/// [`Settings::from_path`]. Once handed to a task manager they are adapted to
/// the selected backend and frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Settings {
    /// The BIDS app executable; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// The BIDS dataset directory; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids_dir: Option<PathBuf>,
    /// The directory the BIDS app writes derivatives to.
    ///
    /// Defaults to `out`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// The maximum wall-clock runtime of the whole run; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<Runtime>,
    /// The runtime limit offered to each task.
    ///
    /// This is derived from `max_runtime` and `runtime_fraction` when the
    /// task manager is created and cannot be set directly.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub child_runtime: Option<Runtime>,
    /// The number of nodes requested per job.
    ///
    /// Defaults to `1`.
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    /// The number of CPUs per node for launcher jobs.
    ///
    /// Defaults to the backend's CPU cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncpus: Option<u32>,
    /// The minimum number of CPUs per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mincpus: Option<u32>,
    /// The memory per CPU, in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_per_cpu: Option<u64>,
    /// The scheduler partition (queue).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// The scheduler quality of service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<String>,
    /// The name given to submitted jobs.
    ///
    /// Defaults to `bidsapp`.
    #[serde(default = "default_job_name")]
    pub job_name: String,
    /// Environment module directives, e.g. `module use /path module load a b`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    /// A command prefix that launches each task (e.g. `srun`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srun_cmd: Option<String>,
    /// Extra arguments appended to the group level command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_args: Option<String>,
    /// The identity of the execution system.
    ///
    /// Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_system: Option<String>,
    /// The working directory of the run.
    ///
    /// Defaults to the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// The fraction of `max_runtime` offered to each task.
    ///
    /// Defaults to `0.85`.
    #[serde(default = "default_runtime_fraction")]
    pub runtime_fraction: f64,
    /// The number of seconds between status polls.
    ///
    /// Defaults to `5`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// The number of extra poll rounds to wait for accounting records after
    /// the jobs left the queue.
    ///
    /// Defaults to `12`.
    #[serde(default = "default_settle_polls")]
    pub settle_polls: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executable: None,
            bids_dir: None,
            output_dir: default_output_dir(),
            max_runtime: None,
            child_runtime: None,
            nodes: default_nodes(),
            ncpus: None,
            mincpus: None,
            mem_per_cpu: None,
            partition: None,
            qos: None,
            job_name: default_job_name(),
            modules: Vec::new(),
            srun_cmd: None,
            group_args: None,
            execution_system: None,
            work_dir: None,
            runtime_fraction: default_runtime_fraction(),
            poll_interval: default_poll_interval(),
            settle_polls: default_settle_polls(),
        }
    }
}

impl Settings {
    /// Reads settings from a YAML or TOML file.
    ///
    /// Files with a `.toml` extension are parsed as TOML; everything else is
    /// parsed as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).io_context(|| {
            format!(
                "failed to read settings file `{path}`",
                path = path.display()
            )
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            toml::from_str(&text).map_err(|e| e.to_string())
        } else {
            serde_yaml_ng::from_str(&text).map_err(|e| e.to_string())
        };

        parsed.map_err(|e| {
            Error::Configuration(format!(
                "failed to parse settings file `{path}`: {e}",
                path = path.display()
            ))
        })
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<()> {
        self.executable()?;
        self.bids_dir()?;
        self.max_runtime()?;

        if !(self.runtime_fraction > 0.0 && self.runtime_fraction <= 1.0) {
            return Err(Error::Configuration(format!(
                "setting `runtime_fraction` must be in (0, 1], got {fraction}",
                fraction = self.runtime_fraction
            )));
        }

        if self.nodes == 0 {
            return Err(Error::Configuration(
                "setting `nodes` cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Freezes the settings for a run on the given backend.
    ///
    /// The task runtime is derived from the maximum runtime, the module
    /// directives are normalized and the backend adapts the result.
    pub fn freeze(mut self, backend: &dyn SubmissionBackend) -> Result<Self> {
        self.validate()?;
        let max_runtime = self.max_runtime()?;
        self.child_runtime = Some(max_runtime.fraction(self.runtime_fraction));
        self.modules = format_modules(&self.modules);
        backend.adapt_settings(&mut self);
        Ok(self)
    }

    /// Gets the BIDS app executable.
    pub fn executable(&self) -> Result<&str> {
        self.executable
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| missing("executable"))
    }

    /// Gets the BIDS dataset directory.
    pub fn bids_dir(&self) -> Result<&Path> {
        self.bids_dir
            .as_deref()
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or_else(|| missing("bids_dir"))
    }

    /// Gets the maximum runtime.
    pub fn max_runtime(&self) -> Result<Runtime> {
        self.max_runtime.ok_or_else(|| missing("max_runtime"))
    }

    /// Gets the runtime limit for individual tasks.
    ///
    /// Falls back to the maximum runtime before the task runtime is derived.
    pub fn task_runtime(&self) -> Option<Runtime> {
        self.child_runtime.or(self.max_runtime)
    }

    /// Gets the working directory, or `.` if none is set.
    pub fn work_dir(&self) -> &Path {
        self.work_dir.as_deref().unwrap_or(Path::new("."))
    }

    /// Gets the directory holding batch scripts and job logs.
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir().join(LOG_DIR_NAME)
    }

    /// Gets the interval between status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn complete() -> Settings {
        Settings {
            executable: Some("mriqc".to_string()),
            bids_dir: Some(PathBuf::from("/data/ds000030")),
            max_runtime: Some("00:05:00".parse().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn mandatory_settings() {
        assert!(complete().validate().is_ok());

        for (key, settings) in [
            (
                "executable",
                Settings {
                    executable: None,
                    ..complete()
                },
            ),
            (
                "bids_dir",
                Settings {
                    bids_dir: None,
                    ..complete()
                },
            ),
            (
                "max_runtime",
                Settings {
                    max_runtime: None,
                    ..complete()
                },
            ),
        ] {
            let error = settings.validate().unwrap_err();
            assert!(matches!(error, Error::Configuration(_)));
            assert_eq!(
                error.to_string(),
                format!("invalid configuration: setting `{key}` is required")
            );
        }
    }

    #[test]
    fn runtime_fraction_bounds() {
        let settings = Settings {
            runtime_fraction: 1.5,
            ..complete()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            runtime_fraction: 0.0,
            ..complete()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn yaml_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(
            &path,
            r#"
executable: mriqc
bids_dir: /data/ds000030
max_runtime: "02:00:00"
partition: normal
mem_per_cpu: 4000
modules:
  - module load singularity
"#,
        )
        .unwrap();

        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.executable().unwrap(), "mriqc");
        assert_eq!(settings.max_runtime().unwrap().as_secs(), 7200);
        assert_eq!(settings.partition.as_deref(), Some("normal"));
        assert_eq!(settings.mem_per_cpu, Some(4000));
        assert_eq!(settings.job_name, "bidsapp");
        assert_eq!(settings.output_dir, PathBuf::from("out"));
        assert_eq!(settings.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn toml_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
executable = "fmriprep"
bids_dir = "/data/ds000030"
max_runtime = "1-00:00:00"
execution_system = "test.local"
"#,
        )
        .unwrap();

        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.executable().unwrap(), "fmriprep");
        assert_eq!(settings.max_runtime().unwrap().to_string(), "24:00:00");
        assert_eq!(settings.execution_system.as_deref(), Some("test.local"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, "executable: mriqc\nwalltime: 01:00:00\n").unwrap();

        let error = Settings::from_path(&path).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[test]
    fn frozen_settings() {
        let settings = Settings {
            modules: vec!["module use /share/modules load singularity".to_string()],
            partition: Some("russpold".to_string()),
            ..complete()
        };

        let frozen = settings
            .clone()
            .freeze(&crate::backend::SherlockBackend::new())
            .unwrap();
        assert_eq!(frozen.child_runtime.unwrap().to_string(), "00:04:15");
        assert_eq!(
            frozen.modules,
            ["module use /share/modules", "module load singularity"]
        );
        assert_eq!(frozen.qos.as_deref(), Some("russpold"));

        let frozen = settings
            .freeze(&crate::backend::LocalBackend::new())
            .unwrap();
        assert!(frozen.modules.is_empty());
    }

    #[test]
    fn child_runtime_cannot_be_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        std::fs::write(&path, "child_runtime: \"00:01:00\"\n").unwrap();

        assert!(Settings::from_path(&path).is_err());
    }
}
