use super::commands::SubmitArgs;
use chainsub_core::common::{Calibration, ClusterProfile, JOB_CONFIG_FILE_NAME, load_calibration};
use chainsub_core::domain::{ChainError, ChainResult};
use chainsub_core::modules::{
    ChainOutcome, FilesystemRequirement, QueueClass, ResourceEstimator, ResourceOverrides,
    StageInvocation, SubmissionOptions, normalize_path,
};
use std::path::{Path, PathBuf};

pub(super) const PROGRAM_LOCATION_ENV: &str = "CHAINSUB_PROGRAM_LOCATION";

pub(super) fn current_working_dir() -> ChainResult<PathBuf> {
    std::env::current_dir().map_err(|source| {
        ChainError::io_system(
            "IO.CLI_CURRENT_DIR",
            format!("failed to read current working directory: {}", source),
        )
    })
}

pub(super) fn absolute_from_current(path: &Path) -> ChainResult<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_path(path));
    }
    Ok(normalize_path(&current_working_dir()?.join(path)))
}

pub(super) fn load_calibration_or_default(path: Option<&Path>) -> ChainResult<Calibration> {
    match path {
        Some(path) => {
            let path = absolute_from_current(path)?;
            let calibration = load_calibration(&path)?;
            tracing::debug!(path = %path.display(), "loaded calibration");
            Ok(calibration)
        }
        None => Ok(Calibration::default()),
    }
}

/// The `--program-location` flag, else `$CHAINSUB_PROGRAM_LOCATION`.
pub(super) fn resolve_program_location(flag: Option<&Path>) -> ChainResult<PathBuf> {
    if let Some(location) = flag {
        return absolute_from_current(location);
    }
    match std::env::var_os(PROGRAM_LOCATION_ENV) {
        Some(location) if !location.is_empty() => absolute_from_current(Path::new(&location)),
        _ => Err(ChainError::config(
            "CONFIG.PROGRAM_LOCATION",
            format!(
                "program location is not set; pass --program-location or set {}",
                PROGRAM_LOCATION_ENV
            ),
        )),
    }
}

pub(super) fn build_submission_options(args: &SubmitArgs) -> ChainResult<SubmissionOptions> {
    let queue = args
        .qos
        .as_deref()
        .map(str::parse::<QueueClass>)
        .transpose()?;
    let filesystem: FilesystemRequirement = args.filesystem.parse()?;
    Ok(SubmissionOptions {
        queue,
        time_hours: args.time,
        job_name: args.jobname.clone(),
        job_name_anchor: args.job_name_anchor.clone(),
        output_name: args.outname.clone(),
        program_output: args.program_output.clone(),
        time_file: args.time_file.clone(),
        program_location: resolve_program_location(args.program_location.as_deref())?,
        program_name: args.program_name.clone(),
        fast_broadcast: args.sbcast,
        filesystem,
    })
}

/// Resolves parsed submit flags against the stage directory `directory`.
pub(super) fn build_stage_invocation(directory: &Path, args: &SubmitArgs) -> ChainResult<StageInvocation> {
    let config = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(JOB_CONFIG_FILE_NAME));
    Ok(StageInvocation {
        config_path: normalize_path(&directory.join(config)),
        profile: ClusterProfile::preset(&args.node_type, args.hyperthreading)?,
        overrides: ResourceOverrides {
            nodes: args.nodes,
            processes: args.nprocs,
            node_multiplier: args.node_multiplier,
            process_multiplier: args.procs_multiplier,
        },
        submission: build_submission_options(args)?,
        resubmit: args.resubmit,
        convergence_threshold: args.convergence_threshold,
        generate_only: args.gen_only,
    })
}

pub(super) fn build_estimator(args: &SubmitArgs) -> ChainResult<ResourceEstimator> {
    let calibration = load_calibration_or_default(args.calibration.as_deref())?;
    Ok(ResourceEstimator::new(calibration).with_states_per_process(args.states_per_process))
}

pub(super) fn print_outcome(outcome: &ChainOutcome) {
    match outcome {
        ChainOutcome::Submitted {
            script_path,
            handle,
        } => println!("Submitted job {} ({})", handle, script_path.display()),
        ChainOutcome::Generated { script_path } => {
            println!("Generated {}", script_path.display())
        }
        ChainOutcome::Skipped {
            stage,
            result_artifact,
        } => println!(
            "Skipped {}: result present at {}",
            stage,
            result_artifact.display()
        ),
    }
}
