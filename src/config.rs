use std::time::Duration;

use bon::Builder;
use thiserror::Error;

use crate::codec::{FrameCodecError, MessageIds};

/// Default SocketCAN interface name.
pub const DEFAULT_BUS: &str = "can0";
/// Default number of unacknowledged blocks kept in flight.
pub const DEFAULT_WINDOW: u32 = 2;
/// Default pause between consecutive data frames (1/3817 s).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_nanos(261_986);
/// Default number of confirmed blocks between progress callbacks.
pub const DEFAULT_REPORT_GRANULARITY: u32 = 1024;

const DIGEST_SEND_SPACING: Duration = Duration::from_millis(20);
const DIGEST_RECV_TIMEOUT: Duration = Duration::from_millis(100);
const LENGTH_SEND_INTERVAL: Duration = Duration::from_millis(10);
const LENGTH_RECV_TIMEOUT: Duration = Duration::from_millis(50);
const DRAIN_TIMEOUT: Duration = Duration::from_micros(10);

/// Errors returned when resolving update options into a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option `update_message_id`")]
    MissingMessageId,
    #[error("missing required option `update_baud`")]
    MissingBaud,
    #[error("invalid `update_message_id` value `{value}`")]
    InvalidMessageId { value: String },
    #[error("window size must be at least one block")]
    ZeroWindow,
    #[error("report granularity must be at least one block")]
    ZeroReportGranularity,
    #[error(transparent)]
    BaseId(#[from] FrameCodecError),
}

/// Raw update options as collected from project configuration or CLI flags.
///
/// `update_message_id` and `update_baud` have no defaults; resolution fails
/// when either is absent so a device is never flashed on guessed identifiers.
#[derive(Debug, Clone, Default, Builder)]
pub struct UpdateOptions {
    /// Base identifier as a hex (`0x700`) or decimal string.
    #[builder(into)]
    message_id: Option<String>,
    /// CAN bit rate in bits per second.
    baud: Option<u32>,
    #[builder(into)]
    bus: Option<String>,
    window: Option<u32>,
    frame_interval: Option<Duration>,
    report_granularity: Option<u32>,
}

impl UpdateOptions {
    /// Resolves raw options into a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a required option is missing or a value is
    /// malformed or out of range.
    ///
    /// ```
    /// use canflash::UpdateOptions;
    ///
    /// let config = UpdateOptions::builder()
    ///     .message_id("0x700")
    ///     .baud(1_000_000)
    ///     .build()
    ///     .resolve()?;
    /// assert_eq!(0x700, config.ids().data_base());
    /// assert_eq!(1_000_000, config.bitrate());
    /// assert_eq!("can0", config.bus());
    /// # Ok::<(), canflash::ConfigError>(())
    /// ```
    pub fn resolve(self) -> Result<UpdateConfig, ConfigError> {
        let Self {
            message_id,
            baud,
            bus,
            window,
            frame_interval,
            report_granularity,
        } = self;

        let message_id = message_id.ok_or(ConfigError::MissingMessageId)?;
        let bitrate = baud.ok_or(ConfigError::MissingBaud)?;
        let ids = MessageIds::new(parse_message_id(&message_id)?)?;

        let window = window.unwrap_or(DEFAULT_WINDOW);
        if window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        let report_granularity = report_granularity.unwrap_or(DEFAULT_REPORT_GRANULARITY);
        if report_granularity == 0 {
            return Err(ConfigError::ZeroReportGranularity);
        }

        Ok(UpdateConfig {
            bus: bus.unwrap_or_else(|| DEFAULT_BUS.to_string()),
            ids,
            bitrate,
            window,
            frame_interval: frame_interval.unwrap_or(DEFAULT_FRAME_INTERVAL),
            report_granularity,
            digest_send_spacing: DIGEST_SEND_SPACING,
            digest_recv_timeout: DIGEST_RECV_TIMEOUT,
            length_send_interval: LENGTH_SEND_INTERVAL,
            length_recv_timeout: LENGTH_RECV_TIMEOUT,
            drain_timeout: DRAIN_TIMEOUT,
        })
    }
}

/// Resolved settings for one firmware update session.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    bus: String,
    ids: MessageIds,
    bitrate: u32,
    window: u32,
    frame_interval: Duration,
    report_granularity: u32,
    digest_send_spacing: Duration,
    digest_recv_timeout: Duration,
    length_send_interval: Duration,
    length_recv_timeout: Duration,
    drain_timeout: Duration,
}

impl UpdateConfig {
    /// Returns the SocketCAN interface name.
    #[must_use]
    pub fn bus(&self) -> &str {
        &self.bus
    }

    /// Returns the three derived update message identifiers.
    #[must_use]
    pub fn ids(&self) -> MessageIds {
        self.ids
    }

    /// Returns the CAN bit rate in bits per second.
    #[must_use]
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Returns the number of unacknowledged blocks kept in flight.
    #[must_use]
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Returns the pause between consecutive data frames.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Returns the number of confirmed blocks between progress callbacks.
    #[must_use]
    pub fn report_granularity(&self) -> u32 {
        self.report_granularity
    }

    /// Returns the pause between consecutive digest-chunk frames.
    #[must_use]
    pub fn digest_send_spacing(&self) -> Duration {
        self.digest_send_spacing
    }

    /// Returns the receive timeout after one digest round.
    #[must_use]
    pub fn digest_recv_timeout(&self) -> Duration {
        self.digest_recv_timeout
    }

    /// Returns the pause after sending the length frame.
    #[must_use]
    pub fn length_send_interval(&self) -> Duration {
        self.length_send_interval
    }

    /// Returns the receive timeout after one length round.
    #[must_use]
    pub fn length_recv_timeout(&self) -> Duration {
        self.length_recv_timeout
    }

    /// Returns the near-zero timeout used to drain backlogged frames.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

fn parse_message_id(value: &str) -> Result<u32, ConfigError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_error| ConfigError::InvalidMessageId {
        value: value.to_string(),
    })
}
