mod app;
mod bus;
mod cli;
mod codec;
mod config;
mod error;
mod handshake;
mod image;
mod telemetry;
mod transfer;
mod uploader;

pub use app::{run, run_with_telemetry};
pub use bus::{
    CanInterface, LinkError, LinkSupervisor, SimReceiver, SimReceiverConfig, SimReceiverHandle,
};
#[cfg(target_os = "linux")]
pub use bus::SocketCanBus;
pub use cli::{Args, Command, FlashArgs, LogLevel, OutputFormat};
pub use codec::{
    BLOCK_DATA_LEN, CanFrame, FrameCodec, FrameCodecError, InfoMessage, MessageIds,
    ProgressReport, UpdateMessage,
};
pub use config::{ConfigError, UpdateConfig, UpdateOptions};
pub use error::ProtocolError;
pub use handshake::{HandshakePhase, HandshakeState};
pub use image::{Digest, FirmwareImage, FirmwareImageError};
pub use transfer::{
    BlockTransferEngine, ProgressReporter, TransferStats, apply_progress, bytes_confirmed,
};
pub use uploader::{FirmwareUploader, FlashReceipt, UploadError};
