use super::CliError;
use super::dispatch::{BulkTally, run_chain_stage, run_single_stage, submit_over_space};
use super::helpers::*;
use anyhow::Context;
use chainsub_core::common::{JOB_CONFIG_FILE_NAME, JobConfiguration, parse_value_list};
use chainsub_core::domain::{ChainError, Stage, StageOptions, Symmetry};
use chainsub_core::modules::{
    ParameterSpace, SymmetryFilter, assign_states, continuation_target, coupled_block_count,
    stage_directory, sweep_directories,
};
use std::path::PathBuf;
use std::process::Command;

#[derive(clap::Args, Debug, Clone)]
pub(super) struct SubmitArgs {
    /// Path to the job configuration file
    #[arg(short = 'c', long)]
    pub(super) config: Option<PathBuf>,

    /// Queue class (debug, regular, premium, shared, overrun, ...)
    #[arg(short = 'q', long)]
    pub(super) qos: Option<String>,

    /// Requested wall time in hours
    #[arg(short = 't', long, default_value_t = 0.5)]
    pub(super) time: f64,

    /// Number of nodes; skips estimation
    #[arg(short = 'n', long)]
    pub(super) nodes: Option<u32>,

    /// Number of processes; skips estimation
    #[arg(long, visible_alias = "np")]
    pub(super) nprocs: Option<u32>,

    /// Job name; derived from the configuration path by default
    #[arg(long)]
    pub(super) jobname: Option<String>,

    /// Scheduler output file; the script is named after its stem
    #[arg(long, default_value = "out.slurm")]
    pub(super) outname: String,

    /// File receiving the program's standard output
    #[arg(long, default_value = "prg.out")]
    pub(super) program_output: String,

    /// File receiving the timing report
    #[arg(long, default_value = "time.out")]
    pub(super) time_file: String,

    /// Write the job document without submitting it
    #[arg(long)]
    pub(super) gen_only: bool,

    /// Schedule one process per hardware thread
    #[arg(long)]
    pub(super) hyperthreading: bool,

    /// Multiplier for the node count
    #[arg(long)]
    pub(super) node_multiplier: Option<f64>,

    /// Multiplier for the process count
    #[arg(long)]
    pub(super) procs_multiplier: Option<f64>,

    /// Folder holding the program; falls back to $CHAINSUB_PROGRAM_LOCATION
    #[arg(long)]
    pub(super) program_location: Option<PathBuf>,

    /// Program executable name
    #[arg(long, default_value = "spectrumsdt")]
    pub(super) program_name: String,

    /// Broadcast the program to node-local storage before running it
    #[arg(long)]
    pub(super) sbcast: bool,

    /// Filesystem requirement (none or scratch)
    #[arg(long, default_value = "none")]
    pub(super) filesystem: String,

    /// Hardware preset (haswell, amd, knl)
    #[arg(long, default_value = "haswell")]
    pub(super) node_type: String,

    /// Submit even if the stage result is already present
    #[arg(long)]
    pub(super) resubmit: bool,

    /// Value the last result entry must exceed for a convergence stage to count as done
    #[arg(long)]
    pub(super) convergence_threshold: Option<f64>,

    /// Output states handled by one process in the properties stage
    #[arg(long)]
    pub(super) states_per_process: Option<u32>,

    /// JSON file overriding the built-in calibration constants
    #[arg(long)]
    pub(super) calibration: Option<PathBuf>,

    /// Path component the derived job name starts after
    #[arg(long, default_value = "ozone")]
    pub(super) job_name_anchor: String,
}

#[derive(clap::Args)]
pub(super) struct ChainArgs {
    /// Chain stage to run (1 basis, 2 overlaps, 3 diagonalization, 4 properties)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    next_stage: u8,

    /// "<common>;<stage 1>;<stage 2>;<stage 3>;<stage 4>" submit options
    #[arg(long, default_value = ";;;;", allow_hyphen_values = true)]
    stage_options: String,

    /// Directory of the previous stage; defaults to the current directory
    #[arg(long)]
    directory: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct ContinueArgs {
    /// Job document written next to the finished job's script
    #[arg(value_name = "JOB_DOCUMENT")]
    document: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct LaunchArgs {
    /// 0: even symmetry only, 1: both symmetries
    #[arg(short = 'l', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    level: u8,

    /// Options carried along every chain
    #[arg(long, default_value = ";;;;", allow_hyphen_values = true)]
    stage_options: String,
}

#[derive(clap::Args)]
pub(super) struct SubmitKsArgs {
    /// Stage to submit
    stage: String,

    /// Submit options applied in every folder
    #[arg(short = 'o', long, default_value = "", allow_hyphen_values = true)]
    options: String,

    /// Symmetry filter: even, odd or all
    #[arg(short = 's', long, default_value = "all")]
    sym: String,

    /// Use per-K folders even for stages that support Coriolis coupling
    #[arg(long)]
    no_coriolis: bool,

    /// Only the symmetry allowed for each parity
    #[arg(long)]
    allowed_only: bool,

    /// Restrict the coupled regime to one parity
    #[arg(short = 'p', long)]
    parity: Option<u32>,

    /// Smallest J that uses the coupled regime
    #[arg(long, default_value_t = 0)]
    coupling_threshold: u32,

    /// Configuration holding J
    #[arg(short = 'c', long, default_value = JOB_CONFIG_FILE_NAME)]
    config: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct SubmitJsArgs {
    /// Stage to submit
    stage: String,

    /// J values, e.g. "2:6" or "0,4,8"
    #[arg(long)]
    js: String,

    /// Nodes requested per K block
    #[arg(long)]
    nodes_per_block: u32,

    /// Submit options applied in every folder
    #[arg(short = 'o', long, default_value = "", allow_hyphen_values = true)]
    options: String,
}

#[derive(clap::Args)]
pub(super) struct SweepArgs {
    /// J values, e.g. "0:10"
    #[arg(long)]
    js: String,

    /// K values; K > J is skipped
    #[arg(long)]
    ks: String,

    /// Symmetry codes (0 even, 1 odd)
    #[arg(long, default_value = "0,1")]
    syms: String,

    /// Stage folder to enter
    #[arg(long, default_value = "properties")]
    stage: String,

    /// Shell command to run in each folder
    #[arg(long, allow_hyphen_values = true)]
    command: String,
}

#[derive(clap::Args)]
pub(super) struct AssignStatesArgs {
    /// Configuration holding J, K and the {num_states} placeholder
    #[arg(short = 'c', long, default_value = JOB_CONFIG_FILE_NAME)]
    config: PathBuf,

    /// JSON file overriding the built-in state-count fit
    #[arg(long)]
    calibration: Option<PathBuf>,
}

pub(super) fn run_submit_command(args: SubmitArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let report = run_single_stage(&working_dir, args)?;
    print_outcome(&report.outcome);
    Ok(0)
}

pub(super) fn run_chain_command(args: ChainArgs) -> Result<i32, CliError> {
    let base = match args.directory {
        Some(directory) => absolute_from_current(&directory)?,
        None => current_working_dir()?,
    };
    let stage_index = usize::from(args.next_stage);
    let stage_dir = stage_directory(&base, stage_index)?;
    let report = run_chain_stage(&stage_dir, stage_index, StageOptions::parse(&args.stage_options))?;
    print_outcome(&report.outcome);
    Ok(0)
}

pub(super) fn run_continue_command(args: ContinueArgs) -> Result<i32, CliError> {
    let document = absolute_from_current(&args.document)?;
    let Some((next_dir, continuation)) = continuation_target(&document)? else {
        tracing::info!(document = %document.display(), "job document has no continuation");
        return Ok(0);
    };
    let report = run_chain_stage(&next_dir, continuation.next_stage, continuation.carried_options)?;
    print_outcome(&report.outcome);
    Ok(0)
}

pub(super) fn run_launch_command(args: LaunchArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let symmetries: &[Symmetry] = if args.level == 0 {
        &[Symmetry::Even]
    } else {
        &Symmetry::BOTH
    };
    let options = StageOptions::parse(&args.stage_options);

    let mut tally = BulkTally::default();
    for symmetry in symmetries {
        let base = working_dir.join(symmetry.folder_name()).join(Stage::Basis.as_str());
        let result = run_chain_stage(&base, 1, options.clone());
        tally.record(&base, result);
    }
    Ok(tally.finish("launch"))
}

pub(super) fn run_submit_ks_command(args: SubmitKsArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let stage: Stage = args.stage.parse()?;
    let config_path = working_dir.join(&args.config);
    let j = JobConfiguration::load(&config_path)?.total_angular_momentum()?;
    let space = ParameterSpace::new(
        j,
        stage.supports_coupling() && !args.no_coriolis,
        args.coupling_threshold,
        args.sym.parse::<SymmetryFilter>()?,
        args.parity,
        args.allowed_only,
    )?;

    let mut tally = BulkTally::default();
    submit_over_space(&working_dir, stage, &space, &args.options, &mut tally);
    Ok(tally.finish("submit-ks"))
}

pub(super) fn run_submit_js_command(args: SubmitJsArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let stage: Stage = args.stage.parse()?;
    if !stage.supports_coupling() {
        return Err(ChainError::config(
            "CONFIG.STAGE",
            format!("stage {} does not use coupled K blocks; use submit-ks", stage),
        )
        .into());
    }
    let js = parse_value_list(&args.js).map_err(ChainError::from)?;
    if args.nodes_per_block == 0 {
        return Err(CliError::Usage(
            "--nodes-per-block must be a positive integer".to_string(),
        ));
    }

    let mut tally = BulkTally::default();
    for j in js {
        let base = working_dir.join(format!("J_{}", j));
        for parity in 0..=j.min(1) {
            let blocks = coupled_block_count(j, parity);
            let nodes = blocks.checked_mul(args.nodes_per_block).ok_or_else(|| {
                ChainError::config(
                    "CONFIG.NODES_RANGE",
                    format!(
                        "{} block(s) x {} node(s) per block exceed the node range",
                        blocks, args.nodes_per_block
                    ),
                )
            })?;
            let options = format!("{} -n {}", args.options, nodes);
            let space = ParameterSpace::new(
                j,
                true,
                0,
                SymmetryFilter::Both,
                Some(parity),
                true,
            )?;
            submit_over_space(&base, stage, &space, &options, &mut tally);
        }
    }
    Ok(tally.finish("submit-js"))
}

pub(super) fn run_sweep_command(args: SweepArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let js = parse_value_list(&args.js).map_err(ChainError::from)?;
    let ks = parse_value_list(&args.ks).map_err(ChainError::from)?;
    let symmetries: Vec<Symmetry> = parse_value_list(&args.syms)
        .map_err(ChainError::from)?
        .into_iter()
        .map(Symmetry::from_code)
        .collect();

    let mut failed = 0_usize;
    let directories = sweep_directories(&js, &ks, &symmetries, &args.stage);
    for relative in &directories {
        let directory = working_dir.join(relative);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&directory)
            .status()
            .with_context(|| format!("failed to run command in '{}'", directory.display()));
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(directory = %directory.display(), %status, "command failed");
                failed += 1;
            }
            Err(error) => {
                tracing::warn!(directory = %directory.display(), "{error:#}");
                failed += 1;
            }
        }
    }
    println!("sweep: {} folder(s), {} failed", directories.len(), failed);
    if failed == 0 { Ok(0) } else { Ok(1) }
}

pub(super) fn run_assign_states_command(args: AssignStatesArgs) -> Result<i32, CliError> {
    let working_dir = current_working_dir()?;
    let calibration = load_calibration_or_default(args.calibration.as_deref())?;
    let config_path = working_dir.join(&args.config);
    let assignment = assign_states(&config_path, &calibration.states_polynomial)?;
    if assignment.written {
        println!("num_states = {}", assignment.states);
    } else {
        println!(
            "num_states already set in {} (fit: {})",
            config_path.display(),
            assignment.states
        );
    }
    Ok(0)
}
