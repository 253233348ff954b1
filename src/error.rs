use derive_more::From;
use thiserror::Error;

use crate::bus::LinkError;
use crate::codec::FrameCodecError;
use crate::config::ConfigError;
use crate::image::FirmwareImageError;
use crate::uploader::UploadError;

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(FirmwareImageError, Box<FirmwareImageError>)]
    Image(Box<FirmwareImageError>),
    #[error(transparent)]
    #[from(ConfigError, Box<ConfigError>)]
    Config(Box<ConfigError>),
    #[error(transparent)]
    #[from(LinkError, Box<LinkError>)]
    Link(Box<LinkError>),
    #[error(transparent)]
    #[from(UploadError, Box<UploadError>)]
    Upload(Box<UploadError>),
}
