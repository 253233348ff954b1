use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::UpdateOptions;

/// Command-line options for the CAN firmware flasher.
#[derive(Debug, Parser)]
#[command(name = "canflash", about = "Flash firmware to CAN-attached devices.")]
pub struct Args {
    /// Telemetry log level override. Falls back to `RUST_LOG` when omitted.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Command result format. Defaults to pretty on terminals, JSON otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use canflash::{Args, Command, FlashArgs};
    ///
    /// let args = Args::new(Command::Flash(FlashArgs::new("firmware.bin")));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            command,
        }
    }

    /// Returns the telemetry log-level override, when given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the output-format override, when given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Consumes the parsed arguments, yielding the selected command.
    #[must_use]
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Flash a firmware image over the CAN update protocol.
    Flash(FlashArgs),
}

/// Arguments for `flash`.
#[derive(Debug, clap::Args)]
pub struct FlashArgs {
    /// Path to the firmware image to upload.
    firmware: PathBuf,
    /// Base CAN identifier for update messages, hex (`0x700`) or decimal.
    #[arg(long = "id")]
    message_id: Option<String>,
    /// CAN bit rate in bits per second.
    #[arg(long)]
    baud: Option<u32>,
    /// SocketCAN interface name.
    #[arg(long)]
    bus: Option<String>,
    /// Number of unacknowledged blocks kept in flight.
    #[arg(long)]
    window: Option<u32>,
    /// Pause between data frames (e.g. `262us`, `1ms`).
    #[arg(long, value_parser = parse_duration)]
    frame_interval: Option<Duration>,
    /// Confirmed blocks between progress reports.
    #[arg(long)]
    report_every: Option<u32>,
    /// Flash against the in-process simulated receiver instead of hardware.
    #[arg(long)]
    sim: bool,
    /// Have the simulated receiver drop every Nth data frame.
    #[arg(long, requires = "sim")]
    sim_drop_every: Option<NonZeroU64>,
}

impl FlashArgs {
    /// Creates flash arguments for the given firmware path with no overrides.
    ///
    /// ```
    /// use std::path::Path;
    ///
    /// use canflash::FlashArgs;
    ///
    /// let args = FlashArgs::new("firmware.bin");
    /// assert_eq!(Path::new("firmware.bin"), args.firmware());
    /// ```
    #[must_use]
    pub fn new(firmware: impl Into<PathBuf>) -> Self {
        Self {
            firmware: firmware.into(),
            message_id: None,
            baud: None,
            bus: None,
            window: None,
            frame_interval: None,
            report_every: None,
            sim: false,
            sim_drop_every: None,
        }
    }

    /// Returns the firmware image path.
    #[must_use]
    pub fn firmware(&self) -> &Path {
        &self.firmware
    }

    /// Returns whether the simulated receiver was requested.
    #[must_use]
    pub fn sim(&self) -> bool {
        self.sim
    }

    /// Returns the simulated frame-drop period, when given.
    #[must_use]
    pub fn sim_drop_every(&self) -> Option<NonZeroU64> {
        self.sim_drop_every
    }

    /// Converts the flag values into raw update options for resolution.
    #[must_use]
    pub fn to_options(&self) -> UpdateOptions {
        UpdateOptions::builder()
            .maybe_message_id(self.message_id.clone())
            .maybe_baud(self.baud)
            .maybe_bus(self.bus.clone())
            .maybe_window(self.window)
            .maybe_frame_interval(self.frame_interval)
            .maybe_report_granularity(self.report_every)
            .build()
    }
}

/// Telemetry verbosity selectable from the CLI.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Converts the CLI level into a tracing level filter.
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Command result rendering selectable from the CLI.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Pretty,
    /// One pretty-printed JSON document.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn flash_parses_protocol_flags() {
        let args = Args::try_parse_from([
            "canflash",
            "flash",
            "firmware.bin",
            "--id",
            "0x700",
            "--baud",
            "1000000",
            "--bus",
            "vcan0",
            "--window",
            "4",
        ])
        .expect("valid flash arguments should parse");

        let Command::Flash(flash) = args.into_command();
        assert_eq!(Path::new("firmware.bin"), flash.firmware());
        let config = flash
            .to_options()
            .resolve()
            .expect("parsed options should resolve");
        assert_eq!(0x700, config.ids().data_base());
        assert_eq!(1_000_000, config.bitrate());
        assert_eq!("vcan0", config.bus());
        assert_eq!(4, config.window());
    }

    #[test]
    fn flash_requires_a_firmware_path() {
        let result = Args::try_parse_from(["canflash", "flash"]);

        let error = result.expect_err("missing firmware path should fail parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn sim_drop_every_requires_sim_mode() {
        let result = Args::try_parse_from([
            "canflash",
            "flash",
            "firmware.bin",
            "--sim-drop-every",
            "10",
        ]);

        let error = result.expect_err("--sim-drop-every should require --sim");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn sim_drop_every_rejects_a_zero_period() {
        let result = Args::try_parse_from([
            "canflash",
            "flash",
            "firmware.bin",
            "--sim",
            "--sim-drop-every",
            "0",
        ]);

        let error = result.expect_err("a zero drop period should fail parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn frame_interval_accepts_humantime_values() {
        let args = Args::try_parse_from([
            "canflash",
            "flash",
            "firmware.bin",
            "--id",
            "0x700",
            "--baud",
            "500000",
            "--frame-interval",
            "1ms",
        ])
        .expect("valid flash arguments should parse");

        let Command::Flash(flash) = args.into_command();
        let config = flash
            .to_options()
            .resolve()
            .expect("parsed options should resolve");
        assert_eq!(Duration::from_millis(1), config.frame_interval());
    }

    #[test]
    fn log_level_flag_parses_before_the_subcommand() {
        let args = Args::try_parse_from([
            "canflash",
            "--log-level",
            "debug",
            "flash",
            "firmware.bin",
        ])
        .expect("valid arguments should parse");

        assert_matches!(args.log_level(), Some(LogLevel::Debug));
    }
}
