//! Command-line runtime for the Codeloom orchestrator.
//!
//! The runtime parses arguments, loads configuration, installs telemetry and
//! drives a pipeline of extension plugins to completion. Configuration
//! loading and the IO streams are injectable so tests can exercise the whole
//! flow without touching the real process environment.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use codeloom_config::Config;

mod cli;
mod commands;
mod config;
mod errors;
mod telemetry;

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, command_arguments, split_config_arguments};
use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of `codeloom_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--extension-cache",
    "--timeout-secs",
];

/// The writers the CLI reports through.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&arguments);

    let cli = match Cli::try_parse_from(command_arguments(&arguments, &split)) {
        Ok(cli) => cli,
        Err(error) if is_informational(&error) => {
            let _ = write!(io.stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => return report_failure(&AppError::CliUsage(error), io),
    };

    match loader
        .load(&split.config_arguments)
        .and_then(|config| execute(&cli.command, &config, io))
    {
        Ok(exit_code) => exit_code,
        Err(error) => report_failure(&error, io),
    }
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn report_failure<W, E>(error: &AppError, io: &mut IoStreams<'_, W, E>) -> ExitCode
where
    W: Write,
    E: Write,
{
    match error {
        AppError::CliUsage(usage) => {
            let _ = write!(io.stderr, "{usage}");
        }
        other => {
            let _ = writeln!(io.stderr, "codeloom: {other}");
        }
    }
    ExitCode::FAILURE
}

fn execute<W, E>(
    command: &CliCommand,
    config: &Config,
    io: &mut IoStreams<'_, W, E>,
) -> Result<ExitCode, AppError>
where
    W: Write,
    E: Write,
{
    telemetry::initialise(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    runtime.block_on(async {
        match command {
            CliCommand::Run(args) => commands::run_pipeline(args, config, io).await,
            CliCommand::Plugins(args) => commands::list_plugins(args, config, io).await,
        }
    })
}
