use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CanFrame;

/// Errors returned by CAN channel operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("CAN channel I/O failed")]
    Io(#[from] std::io::Error),
    #[error("opening CAN channel `{interface}` failed: {detail}")]
    Open { interface: String, detail: String },
    #[error("CAN {operation} failed: {detail}")]
    Channel {
        operation: &'static str,
        detail: String,
    },
    #[error("`ip link` {action} for `{interface}` failed: {detail}")]
    LinkCommand {
        interface: String,
        action: String,
        detail: String,
    },
    #[error("frame 0x{id:X} was rejected by the CAN device")]
    InvalidFrame { id: u32 },
}

/// One CAN channel the uploader can send and receive frames on.
///
/// Implemented by the SocketCAN backend for real hardware and by the
/// simulated receiver for tests and dry runs.
#[async_trait]
pub trait CanInterface: Send {
    /// Transmits one frame.
    async fn send(&mut self, frame: &CanFrame) -> Result<(), LinkError>;

    /// Receives the next frame, returning `None` when `timeout` elapses
    /// without traffic.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, LinkError>;

    /// Cycles the physical link down and back up, then reopens the channel.
    async fn reset(&mut self) -> Result<(), LinkError>;
}
