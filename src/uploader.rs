use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::bus::LinkSupervisor;
use crate::codec::FrameCodecError;
use crate::config::UpdateConfig;
use crate::error::ProtocolError;
use crate::handshake::HandshakePhase;
use crate::image::{Digest, FirmwareImage};
use crate::transfer::{BlockTransferEngine, bytes_confirmed};

/// Errors that terminate a flash session.
///
/// The protocol itself never gives up; only cancellation or a frame that
/// cannot be encoded ends a session early.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("firmware upload was cancelled before completion")]
    Cancelled,
    #[error(transparent)]
    Frame(#[from] FrameCodecError),
}

/// Summary of one completed flash session.
#[derive(Debug, Clone)]
pub struct FlashReceipt {
    digest: Digest,
    bytes_confirmed: u64,
    blocks_written: u32,
    frames_sent: u64,
    retransmissions: u64,
    link_recoveries: u64,
    receiver_fw_version: Option<u32>,
}

impl FlashReceipt {
    /// Returns the MD5 digest of the flashed image.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Returns how many firmware bytes the receiver confirmed.
    #[must_use]
    pub fn bytes_confirmed(&self) -> u64 {
        self.bytes_confirmed
    }

    /// Returns how many blocks the image was split into.
    #[must_use]
    pub fn blocks_written(&self) -> u32 {
        self.blocks_written
    }

    /// Returns how many data frames were transmitted.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Returns how many data frames repeated an already-sent index.
    #[must_use]
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Returns how many link recoveries were performed.
    #[must_use]
    pub fn link_recoveries(&self) -> u64 {
        self.link_recoveries
    }

    /// Returns the firmware version the receiver last reported, if any.
    #[must_use]
    pub fn receiver_fw_version(&self) -> Option<u32> {
        self.receiver_fw_version
    }
}

/// Drives a full firmware update session over one CAN link.
pub struct FirmwareUploader<'a> {
    config: &'a UpdateConfig,
    supervisor: LinkSupervisor,
}

impl<'a> FirmwareUploader<'a> {
    /// Creates an uploader that owns the supervised link for the session.
    #[must_use]
    pub fn new(config: &'a UpdateConfig, supervisor: LinkSupervisor) -> Self {
        Self { config, supervisor }
    }

    /// Runs handshake then block transfer, consuming the link.
    ///
    /// `on_progress` receives `(bytes_confirmed, image_length)` updates
    /// during the block transfer.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is cancelled.
    #[instrument(
        skip_all,
        level = "info",
        fields(length = image.image_length(), digest = %image.digest())
    )]
    pub async fn flash<F>(
        mut self,
        image: &FirmwareImage,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<FlashReceipt, ProtocolError>
    where
        F: FnMut(u64, u64),
    {
        HandshakePhase::new(self.config, &mut self.supervisor, cancel)
            .run(image)
            .await?;

        let stats = BlockTransferEngine::new(self.config, &mut self.supervisor, cancel)
            .run(image, on_progress)
            .await?;

        let blocks = image.block_count();
        let receipt = FlashReceipt {
            digest: image.digest(),
            bytes_confirmed: bytes_confirmed(
                i64::from(blocks) - 1,
                u64::from(image.image_length()),
            ),
            blocks_written: blocks,
            frames_sent: stats.frames_sent(),
            retransmissions: stats.retransmissions(),
            link_recoveries: self.supervisor.recoveries(),
            receiver_fw_version: stats.receiver_fw_version(),
        };
        info!(
            bytes = receipt.bytes_confirmed,
            frames = receipt.frames_sent,
            retransmissions = receipt.retransmissions,
            recoveries = receipt.link_recoveries,
            "flash session complete"
        );
        Ok(receipt)
    }
}
