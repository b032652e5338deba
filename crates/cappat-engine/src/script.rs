//! Rendering of batch submission scripts.
//!
//! Scripts are rendered in-process; every function here returns the script
//! text and [`write_script`] puts it on disk.

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::Settings;
use crate::Task;
use crate::error::IoContext as _;

/// The name of the launcher task list file.
pub const TASK_LIST_FILE_NAME: &str = "tasks_list.sh";

/// The name of the launcher batch script.
pub const LAUNCHER_SCRIPT_FILE_NAME: &str = "launcher.sbatch";

/// The name of the group level wrapper script.
pub const GROUP_WRAPPER_FILE_NAME: &str = "group-wrapper.sh";

/// The stem of job log files; the scheduler substitutes `%j` with the job id.
pub const JOB_LOG_STEM: &str = "bidsapp";

/// Gets the file name of the batch script of the task at the given index.
pub fn task_script_name(index: usize) -> String {
    format!("slurm-{index:06}.sbatch")
}

/// Normalizes module directives into at most two shell lines.
///
/// The directives are treated as one stream of words: the word after `use`
/// is a module path and every word after `load` is a module to load, up to
/// the next `module`.
pub fn format_modules(directives: &[String]) -> Vec<String> {
    let words = directives
        .iter()
        .flat_map(|d| d.split_whitespace())
        .collect::<Vec<_>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut paths = Vec::new();
    let mut loads = Vec::new();
    let mut loading = false;
    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        match *word {
            "module" => loading = false,
            "use" => {
                loading = false;
                if let Some(path) = iter.next() {
                    paths.push(*path);
                }
            }
            "load" => loading = true,
            module if loading => loads.push(module),
            _ => {}
        }
    }

    let mut lines = Vec::new();
    if !paths.is_empty() {
        lines.push(format!("module use {}", paths.join(" ")));
    }

    if loads.is_empty() {
        warn!("no modules to load were found in the module directives");
    } else {
        lines.push(format!("module load {}", loads.join(" ")));
    }

    lines
}

/// Writes the `#SBATCH` directives shared by every batch script.
fn write_common_header(script: &mut String, settings: &Settings) -> Result<()> {
    let log_stem = settings.log_dir().join(JOB_LOG_STEM);
    writeln!(script, "#!/bin/bash")?;
    writeln!(script, "#SBATCH --job-name={name}", name = settings.job_name)?;
    if let Some(runtime) = settings.task_runtime() {
        writeln!(script, "#SBATCH --time={runtime}")?;
    }

    if let Some(partition) = &settings.partition {
        writeln!(script, "#SBATCH --partition={partition}")?;
    }

    if let Some(qos) = &settings.qos {
        writeln!(script, "#SBATCH --qos={qos}")?;
    }

    writeln!(
        script,
        "#SBATCH --output={stem}-%j.out",
        stem = log_stem.display()
    )?;
    writeln!(
        script,
        "#SBATCH --error={stem}-%j.err",
        stem = log_stem.display()
    )?;
    writeln!(
        script,
        "#SBATCH --chdir={dir}",
        dir = settings.work_dir().display()
    )?;
    Ok(())
}

/// Renders the batch script of a single task.
pub fn render_task_script(settings: &Settings, task: &Task) -> Result<String> {
    let mut script = String::new();
    write_common_header(&mut script, settings)?;
    writeln!(&mut script, "#SBATCH --nodes={nodes}", nodes = settings.nodes)?;
    if let Some(mincpus) = settings.mincpus {
        writeln!(&mut script, "#SBATCH --mincpus={mincpus}")?;
    }

    if let Some(mem) = settings.mem_per_cpu {
        writeln!(&mut script, "#SBATCH --mem-per-cpu={mem}")?;
    }

    writeln!(&mut script)?;
    for line in &settings.modules {
        writeln!(&mut script, "{line}")?;
    }

    match settings.srun_cmd.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(srun) => writeln!(&mut script, "{srun} {task}")?,
        None => writeln!(&mut script, "{task}")?,
    }

    Ok(script)
}

/// Renders the launcher task list: one task per line.
pub fn render_task_list<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Result<String> {
    let mut list = String::new();
    for task in tasks {
        writeln!(&mut list, "{task}")?;
    }

    Ok(list)
}

/// Renders the launcher batch script that runs every task of `task_list`
/// within one allocation of `nodes` nodes with `ncpus` CPUs each.
pub fn render_launcher_script(
    settings: &Settings,
    task_list: &Path,
    ntasks: usize,
    ncpus: u32,
) -> Result<String> {
    let mut script = String::new();
    write_common_header(&mut script, settings)?;
    writeln!(&mut script, "#SBATCH --nodes={nodes}", nodes = settings.nodes)?;
    writeln!(&mut script, "#SBATCH --ntasks={ntasks}")?;
    writeln!(&mut script)?;
    for line in &settings.modules {
        writeln!(&mut script, "{line}")?;
    }

    writeln!(&mut script, "module load launcher")?;
    writeln!(&mut script, "export LAUNCHER_PLUGIN_DIR=$LAUNCHER_DIR/plugins")?;
    writeln!(&mut script, "export LAUNCHER_RMI=SLURM")?;
    writeln!(
        &mut script,
        "export LAUNCHER_JOB_FILE={path}",
        path = task_list.display()
    )?;
    writeln!(
        &mut script,
        "export LAUNCHER_WORKDIR={dir}",
        dir = settings.work_dir().display()
    )?;
    writeln!(&mut script, "export LAUNCHER_PPN=1")?;
    writeln!(&mut script, "export OMP_NUM_THREADS={ncpus}")?;
    writeln!(&mut script)?;
    writeln!(&mut script, "$LAUNCHER_DIR/paramrun")?;
    Ok(script)
}

/// Renders the group level wrapper script.
pub fn render_group_wrapper(modules: &[String], command_line: &str) -> Result<String> {
    let mut script = String::new();
    writeln!(&mut script, "#!/bin/bash")?;
    for line in modules {
        writeln!(&mut script, "{line}")?;
    }

    writeln!(&mut script, "{command_line}")?;
    Ok(script)
}

/// Writes a script to disk and makes it executable.
pub async fn write_script(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .io_context(|| format!("failed to write script `{path}`", path = path.display()))?;

    #[cfg(unix)]
    tokio::fs::set_permissions(
        path,
        <std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o755),
    )
    .await
    .io_context(|| {
        format!(
            "failed to set permissions of script `{path}`",
            path = path.display()
        )
    })?;

    debug!(path = %path.display(), "wrote script");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn settings() -> Settings {
        Settings {
            executable: Some("mriqc".to_string()),
            bids_dir: Some(PathBuf::from("/data/ds000030")),
            max_runtime: Some("00:05:00".parse().unwrap()),
            child_runtime: Some("00:04:15".parse().unwrap()),
            work_dir: Some(PathBuf::from("/scratch/run")),
            partition: Some("normal".to_string()),
            mem_per_cpu: Some(8000),
            modules: vec!["module load singularity".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn script_names_are_zero_padded() {
        assert_eq!(task_script_name(0), "slurm-000000.sbatch");
        assert_eq!(task_script_name(42), "slurm-000042.sbatch");
    }

    #[test]
    fn module_directives() {
        let lines = format_modules(&[
            "module use /share/modules".to_string(),
            "module load singularity".to_string(),
            "load fsl".to_string(),
        ]);
        assert_eq!(
            lines,
            ["module use /share/modules", "module load singularity fsl"]
        );

        assert_eq!(format_modules(&lines), lines);
        assert!(format_modules(&[]).is_empty());
        assert_eq!(
            format_modules(&["module use /share/modules".to_string()]),
            ["module use /share/modules"]
        );
    }

    #[test]
    fn task_script() {
        let mut settings = settings();
        settings.srun_cmd = Some("srun".to_string());
        let script = render_task_script(&settings, &Task::new("mriqc /data out participant"))
            .unwrap();
        assert_eq!(
            script,
            "#!/bin/bash
#SBATCH --job-name=bidsapp
#SBATCH --time=00:04:15
#SBATCH --partition=normal
#SBATCH --output=/scratch/run/log/bidsapp-%j.out
#SBATCH --error=/scratch/run/log/bidsapp-%j.err
#SBATCH --chdir=/scratch/run
#SBATCH --nodes=1
#SBATCH --mem-per-cpu=8000

module load singularity
srun mriqc /data out participant
"
        );
    }

    #[test]
    fn launcher_script() {
        let mut settings = settings();
        settings.nodes = 2;
        let script =
            render_launcher_script(&settings, Path::new("/scratch/run/log/tasks_list.sh"), 2, 16)
                .unwrap();
        assert!(script.contains("#SBATCH --nodes=2\n#SBATCH --ntasks=2\n"));
        assert!(script.contains("export LAUNCHER_JOB_FILE=/scratch/run/log/tasks_list.sh\n"));
        assert!(script.contains("export OMP_NUM_THREADS=16\n"));
        assert!(script.ends_with("$LAUNCHER_DIR/paramrun\n"));
    }

    #[test]
    fn task_list() {
        let tasks = [Task::new("echo one"), Task::new("echo two")];
        assert_eq!(render_task_list(&tasks).unwrap(), "echo one\necho two\n");
    }

    #[test]
    fn group_wrapper() {
        let script = render_group_wrapper(
            &["module load singularity".to_string()],
            "mriqc /data out group",
        )
        .unwrap();
        assert_eq!(
            script,
            "#!/bin/bash\nmodule load singularity\nmriqc /data out group\n"
        );
    }

    #[tokio::test]
    async fn scripts_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        write_script(&path, "#!/bin/bash\necho hi\n").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "#!/bin/bash\necho hi\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
