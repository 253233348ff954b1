use std::io::{self, IsTerminal};

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, LogLevel, OutputFormat};
use crate::telemetry;

/// Runs a CLI command, initialising telemetry from the real terminal state.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// use canflash::OutputFormat;
///
/// let args = canflash::Args::try_parse_from([
///     "canflash",
///     "flash",
///     "firmware.bin",
///     "--id",
///     "0x700",
///     "--baud",
///     "1000000",
///     "--sim",
/// ])?;
/// let log_level = args.log_level();
/// let mut out = Vec::new();
/// canflash::run(args.into_command(), &mut out, log_level, OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the update session
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_telemetry(
        command,
        out,
        io::stderr().is_terminal(),
        log_level,
        output_format,
    )
    .await
}

/// Runs a CLI command with explicit telemetry settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the update session
/// fails, or output writing fails.
#[instrument(
    skip(out, interactive_terminal),
    level = "info",
    fields(command = command_name(&command), ?log_level)
)]
pub async fn run_with_telemetry<W>(
    command: Command,
    out: &mut W,
    interactive_terminal: bool,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(interactive_terminal, log_level.map(LogLevel::as_level_filter))?;

    match command {
        Command::Flash(args) => crate::cli::flash::run(&args, out, output_format).await,
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Flash(_args) => "flash",
    }
}
