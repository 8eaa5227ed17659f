use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{CommandFactory, FromArgMatches, Parser};
use client_core::PerformanceClient;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod render;

use dispatch::CliError;

/// Remote control for the robotic saxophone and suona performance service.
#[derive(Parser, Debug)]
#[command(name = dispatch::PROGRAM, version)]
struct Cli {
    /// Service API base, e.g. http://localhost:8088/api
    #[arg(long)]
    base_url: Option<String>,
    /// Settings file; defaults to ./perfctl.toml when present
    #[arg(long)]
    config: Option<PathBuf>,
    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
    command: Option<String>,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// `-v` raises this workspace to debug; other targets stay at warn.
const VERBOSE_FILTER: &str = "warn,perfctl=debug,client_core=debug";

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Usage errors are reported before any settings or network work.
    let invocation = dispatch::parse(cli.command.as_deref(), &cli.args)?;

    let settings = config::load_settings(cli.config.as_deref())
        .map_err(CliError::Config)?
        .with_base_url_override(cli.base_url);
    info!(
        api_base = %settings.api_base,
        timeout_secs = ?settings.request_timeout_secs,
        "perfctl: settings resolved"
    );

    let client = PerformanceClient::new(settings.client_config())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    dispatch::execute(invocation, &client, &mut out).await?;
    out.flush()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let parsed = Cli::command()
        .after_help(dispatch::command_help())
        .try_get_matches()
        .and_then(|matches| Cli::from_arg_matches(&matches));
    let cli = match parsed {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);
    let result = run(cli).await;
    if let Err(err) = &result {
        let _ = dispatch::report(err, &mut io::stderr());
    }
    ExitCode::from(dispatch::exit_status(&result))
}
