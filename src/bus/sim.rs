use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tracing::trace;

use crate::bus::channel::{CanInterface, LinkError};
use crate::codec::{
    BLOCK_DATA_LEN, CanFrame, FrameCodec, InfoMessage, MessageIds, ProgressReport, UpdateMessage,
};

/// Configuration for the in-process simulated receiver.
#[derive(Debug, Builder)]
pub struct SimReceiverConfig {
    ids: MessageIds,
    /// Firmware version the receiver reports as currently running.
    #[builder(default)]
    fw_version: u32,
    /// Silently drops every Nth data frame to exercise retransmission.
    drop_every: Option<NonZeroU64>,
    /// Fails this many sends with a link fault before accepting traffic.
    #[builder(default)]
    faulty_sends: u32,
}

#[derive(Debug, Default)]
struct SimState {
    digest_chunks: [Option<u32>; 4],
    digest_ok: bool,
    length_ok: bool,
    expected_len: u32,
    next_block: u32,
    flash: Vec<u8>,
    complete: bool,
    resets: u64,
    data_frames_seen: u64,
    outbound: VecDeque<CanFrame>,
}

/// Observation handle into a running [`SimReceiver`].
#[derive(Debug, Clone)]
pub struct SimReceiverHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimReceiverHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether all four digest chunks have arrived.
    #[must_use]
    pub fn digest_confirmed(&self) -> bool {
        self.state().digest_ok
    }

    /// Returns whether the image length was accepted.
    #[must_use]
    pub fn length_confirmed(&self) -> bool {
        self.state().length_ok
    }

    /// Returns the firmware bytes written so far.
    #[must_use]
    pub fn written_image(&self) -> Vec<u8> {
        self.state().flash.clone()
    }

    /// Returns whether the full image has been written.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.state().complete
    }

    /// Returns how many link resets the receiver observed.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.state().resets
    }

    /// Returns how many data frames arrived, dropped ones included.
    #[must_use]
    pub fn data_frames_seen(&self) -> u64 {
        self.state().data_frames_seen
    }
}

/// An in-process CAN channel that behaves like the remote update receiver.
///
/// Accepts digest, length, and data frames in protocol order and answers
/// with progress frames on the progress identifier. Fault-injection knobs
/// on the config drive link-recovery and retransmission paths in tests and
/// dry runs.
pub struct SimReceiver {
    ids: MessageIds,
    fw_version: u32,
    drop_every: Option<NonZeroU64>,
    faults_left: u32,
    state: Arc<Mutex<SimState>>,
}

impl SimReceiver {
    /// Creates a receiver and its observation handle.
    #[must_use]
    pub fn new(config: SimReceiverConfig) -> (Self, SimReceiverHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let handle = SimReceiverHandle {
            state: Arc::clone(&state),
        };
        let receiver = Self {
            ids: config.ids,
            fw_version: config.fw_version,
            drop_every: config.drop_every,
            faults_left: config.faulty_sends,
            state,
        };
        (receiver, handle)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_progress(&self, state: &mut SimState, written: bool, block_index: u32) {
        let report = ProgressReport {
            received_digest: state.digest_ok,
            received_length: state.length_ok,
            written,
            block_index,
            fw_version: self.fw_version,
        };
        if let Ok(frame) = FrameCodec::encode_progress(self.ids, report) {
            state.outbound.push_back(frame);
        }
    }

    fn accept_info(&self, state: &mut SimState, message: InfoMessage) {
        match message {
            InfoMessage::DigestChunk { index, chunk } => {
                state.digest_chunks[usize::from(index)] = Some(chunk);
                state.digest_ok = state.digest_chunks.iter().all(Option::is_some);
                self.queue_progress(state, false, state.next_block);
            }
            InfoMessage::Length { image_length } => {
                if state.digest_ok && !state.length_ok {
                    state.length_ok = true;
                    state.expected_len = image_length;
                    state.next_block = 0;
                    state.flash.clear();
                    state.complete = image_length == 0;
                }
                self.queue_progress(state, false, state.next_block);
            }
        }
    }

    fn accept_block(&self, state: &mut SimState, block_index: u32, data: [u8; BLOCK_DATA_LEN]) {
        if !state.length_ok || block_index != state.next_block {
            // Out-of-order frame: remind the sender of the next expected block.
            self.queue_progress(state, false, state.next_block);
            return;
        }

        let offset = block_index as usize * BLOCK_DATA_LEN;
        let usable = (state.expected_len as usize)
            .saturating_sub(offset)
            .min(BLOCK_DATA_LEN);
        state.flash.extend_from_slice(&data[..usable]);
        state.next_block += 1;
        if state.flash.len() == state.expected_len as usize {
            state.complete = true;
        }
        self.queue_progress(state, true, block_index);
    }
}

#[async_trait]
impl CanInterface for SimReceiver {
    async fn send(&mut self, frame: &CanFrame) -> Result<(), LinkError> {
        if self.faults_left > 0 {
            self.faults_left -= 1;
            return Err(LinkError::Channel {
                operation: "send",
                detail: "injected link fault".to_string(),
            });
        }

        let message = match FrameCodec::decode(self.ids, frame) {
            Ok(message) => message,
            Err(error) => {
                trace!(%error, "simulated receiver ignoring undecodable frame");
                return Ok(());
            }
        };

        let mut state = self.state();
        match message {
            UpdateMessage::Info(info) => self.accept_info(&mut state, info),
            UpdateMessage::Data { block_index, data } => {
                state.data_frames_seen += 1;
                if let Some(n) = self.drop_every
                    && state.data_frames_seen % n.get() == 0
                {
                    return Ok(());
                }
                self.accept_block(&mut state, block_index, data);
            }
            // The uploader never transmits progress frames.
            UpdateMessage::Progress(_report) => {}
        }
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<CanFrame>, LinkError> {
        if let Some(frame) = self.state().outbound.pop_front() {
            return Ok(Some(frame));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn reset(&mut self) -> Result<(), LinkError> {
        self.state().resets += 1;
        Ok(())
    }
}
