//! Discovery of BIDS participants and construction of the task list.

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use cappat_engine::Task;
use itertools::Itertools as _;
use rand::seq::SliceRandom as _;
use walkdir::WalkDir;

/// The prefix of subject directories in a BIDS dataset.
pub const SUBJECT_PREFIX: &str = "sub-";

/// Discovers the subject labels of a BIDS dataset.
///
/// Subjects are the `sub-<label>` directories directly under the dataset
/// root. Labels are returned sorted and without the prefix.
pub fn discover_subjects(bids_dir: &Path) -> Result<Vec<String>> {
    let mut subjects = Vec::new();
    for entry in WalkDir::new(bids_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| {
            format!(
                "failed to read BIDS directory `{path}`",
                path = bids_dir.display()
            )
        })?;

        if !entry.file_type().is_dir() {
            continue;
        }

        if let Some(label) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_prefix(SUBJECT_PREFIX))
            .filter(|label| !label.is_empty())
        {
            subjects.push(label.to_string());
        }
    }

    subjects.sort();
    Ok(subjects)
}

/// Selects the subjects to process.
///
/// With no requested labels every available subject is selected. Requested
/// labels may carry the `sub-` prefix; duplicates are removed and every label
/// must name an available subject.
pub fn select_subjects(available: &[String], requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(available.to_vec());
    }

    let selected = requested
        .iter()
        .flat_map(|r| r.split_whitespace())
        .map(|label| label.strip_prefix(SUBJECT_PREFIX).unwrap_or(label))
        .unique()
        .sorted()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let missing = selected
        .iter()
        .filter(|label| !available.contains(*label))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "participant label(s) not found in the BIDS directory: {}",
            missing.iter().join(" ")
        );
    }

    Ok(selected)
}

/// Shuffles the subjects so that groups mix subjects from across the dataset.
pub fn shuffle_subjects(subjects: &mut [String]) {
    subjects.shuffle(&mut rand::rng());
}

/// Describes how participant tasks are rendered.
#[derive(Debug, Clone)]
pub struct TaskTemplate<'a> {
    /// The BIDS app executable.
    pub app: &'a str,
    /// The BIDS dataset directory.
    pub bids_dir: &'a Path,
    /// The output directory.
    pub output_dir: &'a Path,
    /// Extra arguments appended to every task.
    pub extra_args: Option<&'a str>,
}

impl TaskTemplate<'_> {
    /// Groups the subjects and renders one task per group.
    ///
    /// Each task works in `work/sjob-NNNN` and appends its output to
    /// `log/sjob-NNNN.log`.
    pub fn tasks(&self, subjects: &[String], group_size: NonZeroUsize) -> Vec<Task> {
        subjects
            .chunks(group_size.get())
            .enumerate()
            .map(|(index, group)| {
                let mut command = format!(
                    "{app} {bids_dir} {output_dir} participant --participant_label {labels} -w \
                     work/sjob-{index:04}",
                    app = self.app,
                    bids_dir = self.bids_dir.display(),
                    output_dir = self.output_dir.display(),
                    labels = group.iter().sorted().join(" "),
                );

                if let Some(args) = self.extra_args.map(str::trim).filter(|a| !a.is_empty()) {
                    command.push(' ');
                    command.push_str(args);
                }

                command.push_str(&format!(" >> log/sjob-{index:04}.log"));
                Task::new(command)
            })
            .collect()
    }
}
