use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bus::LinkSupervisor;
use crate::codec::{FrameCodec, InfoMessage, ProgressReport, UpdateMessage};
use crate::config::UpdateConfig;
use crate::image::FirmwareImage;
use crate::uploader::UploadError;

/// Sender-side handshake states.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HandshakeState {
    SendingDigest,
    DigestConfirmed,
    SendingLength,
    LengthConfirmed,
}

/// Announces an image to the receiver: digest first, then length.
///
/// Both phases retry without bound. A silent or rebooting receiver keeps
/// the handshake spinning until it answers or the session is cancelled;
/// link failures are recovered by the supervisor and otherwise logged and
/// retried on the next round.
pub struct HandshakePhase<'a> {
    config: &'a UpdateConfig,
    supervisor: &'a mut LinkSupervisor,
    cancel: &'a CancellationToken,
}

impl<'a> HandshakePhase<'a> {
    /// Creates a handshake phase over an open link.
    #[must_use]
    pub fn new(
        config: &'a UpdateConfig,
        supervisor: &'a mut LinkSupervisor,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            supervisor,
            cancel,
        }
    }

    /// Runs the handshake to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is cancelled or a frame cannot be
    /// encoded.
    #[instrument(skip_all, level = "info", fields(digest = %image.digest()))]
    pub async fn run(mut self, image: &FirmwareImage) -> Result<(), UploadError> {
        let mut state = HandshakeState::SendingDigest;
        debug!(?state, "starting handshake");

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            self.send_digest_round(image).await?;
            if self
                .await_confirmation(self.config.digest_recv_timeout(), |report| {
                    report.received_digest
                })
                .await
            {
                state = HandshakeState::DigestConfirmed;
                info!(?state, "receiver holds the digest");
                break;
            }
        }

        state = HandshakeState::SendingLength;
        debug!(?state, "announcing image length");
        let length_frame = FrameCodec::encode_info(
            self.config.ids(),
            InfoMessage::Length {
                image_length: image.image_length(),
            },
        )?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            if let Err(error) = self.supervisor.send(&length_frame).await {
                warn!(%error, "length frame send failed; retrying");
            }
            sleep(self.config.length_send_interval()).await;
            if self
                .await_confirmation(self.config.length_recv_timeout(), |report| {
                    report.received_length
                })
                .await
            {
                state = HandshakeState::LengthConfirmed;
                info!(?state, length = image.image_length(), "receiver accepted the length");
                return Ok(());
            }
        }
    }

    async fn send_digest_round(&mut self, image: &FirmwareImage) -> Result<(), UploadError> {
        for (index, chunk) in image.digest().chunks().into_iter().enumerate() {
            let frame = FrameCodec::encode_info(
                self.config.ids(),
                InfoMessage::DigestChunk {
                    index: index as u8,
                    chunk,
                },
            )?;
            if let Err(error) = self.supervisor.send(&frame).await {
                warn!(%error, "digest frame send failed; finishing the round anyway");
            }
            sleep(self.config.digest_send_spacing()).await;
        }
        Ok(())
    }

    /// Receives once with `timeout`, then drains immediately available
    /// frames. Every decoded progress report is evaluated, not just the
    /// first, so a stale queued report cannot mask a confirmation.
    async fn await_confirmation<F>(&mut self, timeout: Duration, confirmed: F) -> bool
    where
        F: Fn(&ProgressReport) -> bool,
    {
        let mut next_timeout = timeout;
        let mut observed = false;
        loop {
            match self.supervisor.recv(next_timeout).await {
                Err(error) => {
                    warn!(%error, "receive failed during handshake");
                    break;
                }
                Ok(None) => break,
                Ok(Some(frame)) => {
                    if let Ok(UpdateMessage::Progress(report)) =
                        FrameCodec::decode(self.config.ids(), &frame)
                    {
                        observed |= confirmed(&report);
                    }
                    next_timeout = self.config.drain_timeout();
                }
            }
        }
        observed
    }
}
