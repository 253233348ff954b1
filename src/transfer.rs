use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

use crate::bus::LinkSupervisor;
use crate::codec::{BLOCK_DATA_LEN, FrameCodec, ProgressReport, UpdateMessage};
use crate::config::UpdateConfig;
use crate::image::FirmwareImage;
use crate::uploader::UploadError;

/// Folds one progress report into the confirmation cursor.
///
/// The cursor is the highest block index known durably written, starting at
/// `-1`. A `written` report confirms its own index; a next-expected report
/// confirms everything before it. The cursor never moves backwards, so
/// stale or reordered reports are harmless.
///
/// ```
/// use canflash::{ProgressReport, apply_progress};
///
/// let written = ProgressReport {
///     received_digest: true,
///     received_length: true,
///     written: true,
///     block_index: 7,
///     fw_version: 0,
/// };
/// assert_eq!(7, apply_progress(-1, &written));
///
/// let expected = ProgressReport { written: false, block_index: 5, ..written };
/// assert_eq!(7, apply_progress(7, &expected));
/// assert_eq!(4, apply_progress(-1, &expected));
/// ```
#[must_use]
pub fn apply_progress(cursor: i64, report: &ProgressReport) -> i64 {
    let index = i64::from(report.block_index);
    if report.written {
        cursor.max(index)
    } else {
        cursor.max(index - 1)
    }
}

/// Byte totals confirmed by a given cursor position, capped to the image
/// length so the zero-padded tail block never over-reports.
#[must_use]
pub fn bytes_confirmed(cursor: i64, image_length: u64) -> u64 {
    if cursor < 0 {
        return 0;
    }
    let blocks = cursor as u64 + 1;
    (blocks * BLOCK_DATA_LEN as u64).min(image_length)
}

/// Rate-limits progress callbacks to one per granularity step.
#[derive(Debug)]
pub struct ProgressReporter {
    image_length: u64,
    granularity: i64,
    last_reported: i64,
}

impl ProgressReporter {
    /// Creates a reporter for an image of `image_length` bytes, reporting
    /// every `granularity` confirmed blocks.
    #[must_use]
    pub fn new(image_length: u64, granularity: u32) -> Self {
        Self {
            image_length,
            granularity: i64::from(granularity),
            last_reported: -1,
        }
    }

    /// Returns the confirmed byte count when the cursor has advanced at
    /// least one granularity step since the last report.
    pub fn observe(&mut self, cursor: i64) -> Option<u64> {
        if cursor - self.last_reported < self.granularity {
            return None;
        }
        self.last_reported = cursor;
        Some(bytes_confirmed(cursor, self.image_length))
    }

    /// Returns the final confirmed byte count unless the cursor position was
    /// already reported, so totals always reach the image length.
    pub fn finish(&mut self, cursor: i64) -> Option<u64> {
        if cursor <= self.last_reported {
            return None;
        }
        self.last_reported = cursor;
        Some(bytes_confirmed(cursor, self.image_length))
    }
}

/// Counters collected over one block transfer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferStats {
    frames_sent: u64,
    retransmissions: u64,
    progress_frames: u64,
    receiver_fw_version: Option<u32>,
}

impl TransferStats {
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

    /// Returns how many progress frames were decoded.
    #[must_use]
    pub fn progress_frames(&self) -> u64 {
        self.progress_frames
    }

    /// Returns the firmware version the receiver last reported, if any.
    #[must_use]
    pub fn receiver_fw_version(&self) -> Option<u32> {
        self.receiver_fw_version
    }
}

/// Streams firmware blocks with a fixed send window and cumulative acks.
///
/// Go-Back-N from the sender's side: every round sends the window of blocks
/// just past the cursor, polls for progress after each frame, and loops
/// until the cursor reaches the last block. Lost frames are simply re-sent
/// on a later round; there is no per-block timer and no give-up path short
/// of cancellation.
pub struct BlockTransferEngine<'a> {
    config: &'a UpdateConfig,
    supervisor: &'a mut LinkSupervisor,
    cancel: &'a CancellationToken,
}

impl<'a> BlockTransferEngine<'a> {
    /// Creates a transfer engine over an open link.
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

    /// Streams the image until the receiver confirms the final block.
    ///
    /// `on_progress` is called with `(bytes_confirmed, image_length)` at
    /// start, every granularity step, and once at completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is cancelled or a frame cannot be
    /// encoded.
    #[instrument(
        skip_all,
        level = "info",
        fields(blocks = image.block_count(), window = self.config.window())
    )]
    pub async fn run<F>(
        mut self,
        image: &FirmwareImage,
        mut on_progress: F,
    ) -> Result<TransferStats, UploadError>
    where
        F: FnMut(u64, u64),
    {
        let image_length = u64::from(image.image_length());
        let block_count = i64::from(image.block_count());
        let target = block_count - 1;
        let mut cursor: i64 = -1;
        let mut highest_sent: i64 = -1;
        let mut stats = TransferStats::default();
        let mut reporter = ProgressReporter::new(image_length, self.config.report_granularity());

        on_progress(0, image_length);

        while cursor < target {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            for slot in 0..i64::from(self.config.window()) {
                let candidate = cursor + 1 + slot;
                if candidate < block_count {
                    let index = candidate as u32;
                    let Some(block) = image.block(index) else {
                        break;
                    };
                    let frame = FrameCodec::encode_data(self.config.ids(), index, &block)?;
                    match self.supervisor.send(&frame).await {
                        Ok(()) => {
                            stats.frames_sent += 1;
                            if candidate <= highest_sent {
                                stats.retransmissions += 1;
                            } else {
                                highest_sent = candidate;
                            }
                        }
                        Err(error) => {
                            warn!(%error, index, "block send failed; re-sending next round");
                        }
                    }
                    sleep(self.config.frame_interval()).await;
                }
                cursor = self.poll_progress(cursor, &mut stats).await;
            }

            if let Some(bytes) = reporter.observe(cursor) {
                trace!(bytes, image_length, "transfer progress");
                on_progress(bytes, image_length);
            }
        }

        if let Some(bytes) = reporter.finish(cursor) {
            on_progress(bytes, image_length);
        }
        Ok(stats)
    }

    /// Receives with the pacing interval as timeout, then drains the
    /// backlog with a near-zero timeout, folding every progress report
    /// into the cursor.
    async fn poll_progress(&mut self, cursor: i64, stats: &mut TransferStats) -> i64 {
        let mut cursor = cursor;
        let mut next_timeout = self.config.frame_interval();
        loop {
            match self.supervisor.recv(next_timeout).await {
                Err(error) => {
                    warn!(%error, "receive failed during transfer");
                    break;
                }
                Ok(None) => break,
                Ok(Some(frame)) => {
                    match FrameCodec::decode(self.config.ids(), &frame) {
                        Ok(UpdateMessage::Progress(report)) => {
                            stats.progress_frames += 1;
                            stats.receiver_fw_version = Some(report.fw_version);
                            cursor = apply_progress(cursor, &report);
                        }
                        Ok(_own_traffic) => {}
                        Err(error) => {
                            trace!(%error, "discarding undecodable frame");
                        }
                    }
                    next_timeout = self.config.drain_timeout();
                }
            }
        }
        cursor
    }
}
