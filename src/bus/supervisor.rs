use std::time::Duration;

use tracing::warn;

use crate::bus::channel::{CanInterface, LinkError};
use crate::codec::CanFrame;

/// Wraps a CAN channel with one-shot link recovery.
///
/// A failed send or receive triggers a link reset (down, up, reopen) followed
/// by exactly one retry of the failed operation. A second failure propagates
/// so the calling phase can decide whether to keep retrying.
pub struct LinkSupervisor {
    channel: Box<dyn CanInterface>,
    recoveries: u64,
}

impl LinkSupervisor {
    /// Creates a supervisor over an open CAN channel.
    #[must_use]
    pub fn new(channel: Box<dyn CanInterface>) -> Self {
        Self {
            channel,
            recoveries: 0,
        }
    }

    /// Returns how many link recoveries have been performed.
    #[must_use]
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// Transmits one frame, recovering the link once on failure.
    ///
    /// # Errors
    ///
    /// Returns an error when the retried send fails, or when the link reset
    /// itself fails.
    pub async fn send(&mut self, frame: &CanFrame) -> Result<(), LinkError> {
        match self.channel.send(frame).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.recover("send", &error).await?;
                self.channel.send(frame).await
            }
        }
    }

    /// Receives the next frame, recovering the link once on failure.
    ///
    /// A timeout is not a failure; it returns `Ok(None)` without touching the
    /// link.
    ///
    /// # Errors
    ///
    /// Returns an error when the retried receive fails, or when the link
    /// reset itself fails.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, LinkError> {
        match self.channel.recv(timeout).await {
            Ok(frame) => Ok(frame),
            Err(error) => {
                self.recover("receive", &error).await?;
                self.channel.recv(timeout).await
            }
        }
    }

    async fn recover(&mut self, operation: &str, error: &LinkError) -> Result<(), LinkError> {
        warn!(%error, operation, "CAN operation failed; recovering the link");
        self.channel.reset().await?;
        self.recoveries += 1;
        Ok(())
    }
}
