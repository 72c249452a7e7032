use super::document::{DirectiveKey, JobDocument};
use super::traits::{BatchScheduler, JobHandle};
use crate::domain::{ChainError, ChainResult};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const SBATCH_PROGRAM: &str = "sbatch";
const SUBMITTED_PREFIX: &str = "Submitted batch job";

/// Slurm collaborator: renders `#SBATCH` scripts and submits them with
/// `sbatch` from the script's own directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmScheduler {
    submit_program: PathBuf,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self {
            submit_program: PathBuf::from(SBATCH_PROGRAM),
        }
    }
}

impl SlurmScheduler {
    pub fn with_submit_program(submit_program: impl Into<PathBuf>) -> Self {
        Self {
            submit_program: submit_program.into(),
        }
    }
}

fn directive_flag(key: DirectiveKey) -> &'static str {
    match key {
        DirectiveKey::Licenses => "-L",
        DirectiveKey::Queue => "-q",
        DirectiveKey::MinTime => "--time-min",
        DirectiveKey::Nodes => "-N",
        DirectiveKey::Tasks => "-n",
        DirectiveKey::WallTime => "-t",
        DirectiveKey::JobName => "-J",
        DirectiveKey::Output => "-o",
        DirectiveKey::Constraint => "-C",
    }
}

impl BatchScheduler for SlurmScheduler {
    fn render(&self, document: &JobDocument) -> String {
        let mut script = String::from("#!/bin/bash\n");
        for directive in document.directives() {
            script.push_str(&format!(
                "#SBATCH {} {}\n",
                directive_flag(directive.key),
                directive.value
            ));
        }
        script.push('\n');
        for line in document.prologue() {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str(document.run_command());
        script.push('\n');
        script
    }

    fn submit(&self, script_path: &Path) -> ChainResult<JobHandle> {
        let directory = script_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = script_path.file_name().ok_or_else(|| {
            ChainError::submission(
                "SUBMIT.SCRIPT_PATH",
                format!("'{}' does not name a script file", script_path.display()),
            )
        })?;

        let output = Command::new(&self.submit_program)
            .arg(file_name)
            .current_dir(directory)
            .output()
            .map_err(|source| {
                ChainError::submission(
                    "SUBMIT.SPAWN",
                    format!(
                        "failed to run '{}' for '{}': {}",
                        self.submit_program.display(),
                        script_path.display(),
                        source
                    ),
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(ChainError::submission(
                "SUBMIT.REJECTED",
                format!(
                    "'{}' rejected '{}' ({}): {}",
                    self.submit_program.display(),
                    script_path.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        parse_job_handle(&stdout).ok_or_else(|| {
            ChainError::submission(
                "SUBMIT.NO_HANDLE",
                format!(
                    "could not find a job id in scheduler output '{}'",
                    stdout.trim()
                ),
            )
        })
    }
}

pub fn parse_job_handle(output: &str) -> Option<JobHandle> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix(SUBMITTED_PREFIX)
            .map(str::trim)
            .and_then(|rest| rest.split_whitespace().next())
            .map(|id| JobHandle(id.to_string()))
    })
}
