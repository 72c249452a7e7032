mod commands;
mod dispatch;
mod helpers;

use chainsub_core::domain::ChainError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const PROGRAM_NAME: &str = "chainsub";

pub fn run_from_env() -> i32 {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let chain_error = error.as_chain_error();
            eprintln!("{}", chain_error.diagnostic_line());
            if let Some(summary_line) = chain_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            chain_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once(PROGRAM_NAME.to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "chainsub",
    version,
    about = "Stage chaining and resource estimation for batch pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Estimate resources for the stage in the current directory and submit it
    Submit(commands::SubmitArgs),
    /// Run chain stage N below the current directory and chain the rest
    Chain(commands::ChainArgs),
    /// Continue a chain from a finished job's document
    Continue(commands::ContinueArgs),
    /// Start chains in the symmetry folders below the current directory
    Launch(commands::LaunchArgs),
    /// Submit one stage for every K (or parity) of the current J
    #[command(name = "submit-ks")]
    SubmitKs(commands::SubmitKsArgs),
    /// Submit one stage for a range of J with per-parity node counts
    #[command(name = "submit-js")]
    SubmitJs(commands::SubmitJsArgs),
    /// Run a shell command in every J/K/symmetry stage folder
    Sweep(commands::SweepArgs),
    /// Predict the number of states and fill the configuration placeholder
    #[command(name = "assign-states")]
    AssignStates(commands::AssignStatesArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Submit(args) => commands::run_submit_command(args),
        CliCommand::Chain(args) => commands::run_chain_command(args),
        CliCommand::Continue(args) => commands::run_continue_command(args),
        CliCommand::Launch(args) => commands::run_launch_command(args),
        CliCommand::SubmitKs(args) => commands::run_submit_ks_command(args),
        CliCommand::SubmitJs(args) => commands::run_submit_js_command(args),
        CliCommand::Sweep(args) => commands::run_sweep_command(args),
        CliCommand::AssignStates(args) => commands::run_assign_states_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Chain(ChainError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ChainError> for CliError {
    fn from(error: ChainError) -> Self {
        Self::Chain(error)
    }
}

impl CliError {
    fn as_chain_error(&self) -> ChainError {
        match self {
            Self::Usage(message) => ChainError::config("CONFIG.CLI_USAGE", message.clone()),
            Self::Chain(error) => error.clone(),
            Self::Internal(error) => ChainError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
