use super::CliError;
use super::commands::SubmitArgs;
use super::helpers::{build_estimator, build_stage_invocation, current_working_dir, print_outcome};
use anyhow::Context;
use chainsub_core::domain::{Stage, StageOptions};
use chainsub_core::modules::{ChainController, ChainLink, ChainReport, ParameterSpace, SlurmScheduler};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Submit flags carried inside option strings rather than on the command line.
#[derive(Parser)]
#[command(no_binary_name = true)]
struct StageArgs {
    #[command(flatten)]
    submit: SubmitArgs,
}

fn parse_stage_args<I, S>(tokens: I) -> Result<SubmitArgs, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
    StageArgs::try_parse_from(&tokens)
        .map(|parsed| parsed.submit)
        .map_err(|error| CliError::Usage(format!("invalid stage options '{}': {}", tokens.join(" "), error)))
}

fn runner_path() -> Result<PathBuf, CliError> {
    let runner = std::env::current_exe().context("failed to locate the chainsub executable")?;
    Ok(runner)
}

pub(super) fn run_single_stage(directory: &Path, args: SubmitArgs) -> Result<ChainReport, CliError> {
    let invocation = build_stage_invocation(directory, &args)?;
    let scheduler = SlurmScheduler::default();
    let controller = ChainController::new(build_estimator(&args)?, &scheduler, runner_path()?);
    Ok(controller.run_stage(&invocation)?)
}

/// Runs chain stage `stage_index` in `directory` with the options the chain carries.
pub(super) fn run_chain_stage(
    directory: &Path,
    stage_index: usize,
    mut options: StageOptions,
) -> Result<ChainReport, CliError> {
    // Later stages run from their own directories.
    options.absolutize_flag("--calibration", &current_working_dir()?);
    tracing::debug!(stage_index, directory = %directory.display(), options = %options, "chain entry");
    let args = parse_stage_args(options.arguments_for_stage(stage_index))?;
    let invocation = build_stage_invocation(directory, &args)?;
    let scheduler = SlurmScheduler::default();
    let controller = ChainController::new(build_estimator(&args)?, &scheduler, runner_path()?);
    let link = ChainLink {
        stage_index,
        carried_options: options,
    };
    Ok(controller.run_chained(&invocation, &link)?)
}

/// Submits `stage` in every directory of `space` below `base`.
pub(super) fn submit_over_space(
    base: &Path,
    stage: Stage,
    space: &ParameterSpace,
    options: &str,
    tally: &mut BulkTally,
) {
    for working in space {
        let directory = working.stage_directory(base, stage);
        let result = parse_stage_args(options.split_whitespace())
            .and_then(|args| run_single_stage(&directory, args));
        tally.record(&directory, result);
    }
}

/// Outcome counts of a bulk command that keeps going past failures.
#[derive(Debug, Default)]
pub(super) struct BulkTally {
    succeeded: usize,
    failed: usize,
}

impl BulkTally {
    pub(super) fn record(&mut self, directory: &Path, result: Result<ChainReport, CliError>) {
        match result {
            Ok(report) => {
                print_outcome(&report.outcome);
                self.succeeded += 1;
            }
            Err(error) => {
                let error = error.as_chain_error();
                tracing::warn!(
                    directory = %directory.display(),
                    code = error.code(),
                    "{}",
                    error.message()
                );
                self.failed += 1;
            }
        }
    }

    /// Exit code: 0 when every submission went through, 1 otherwise.
    pub(super) fn finish(&self, command: &str) -> i32 {
        println!(
            "{}: {} succeeded, {} failed",
            command, self.succeeded, self.failed
        );
        if self.failed == 0 { 0 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::{BulkTally, parse_stage_args};
    use crate::cli::CliError;
    use chainsub_core::domain::{ChainError, StageOptions};
    use std::path::Path;

    #[test]
    fn stage_options_parse_into_submit_flags() {
        let options = StageOptions::parse("-t 2 --program-location /opt/bin;;-n 4;;");
        let args = parse_stage_args(options.arguments_for_stage(2)).expect("options should parse");
        assert_eq!(args.time, 2.0);
        assert_eq!(args.nodes, Some(4));
        assert_eq!(args.program_location.as_deref(), Some(Path::new("/opt/bin")));
        assert_eq!(args.outname, "out.slurm");

        let defaults = parse_stage_args(Vec::<String>::new()).expect("empty options should parse");
        assert_eq!(defaults.node_type, "haswell");
        assert_eq!(defaults.nodes, None);
    }

    #[test]
    fn unknown_stage_option_is_a_usage_error() {
        let error = parse_stage_args(["--bogus"]).expect_err("unknown flag");
        assert!(matches!(error, CliError::Usage(message) if message.contains("--bogus")));
    }

    #[test]
    fn tally_reports_failures() {
        let mut tally = BulkTally::default();
        assert_eq!(tally.finish("test"), 0);
        tally.record(
            Path::new("K_0/even/basis"),
            Err(CliError::from(ChainError::precondition("PRE.MISSING", "gone"))),
        );
        assert_eq!(tally.finish("test"), 1);
    }
}
