use thiserror::Error;

/// Number of firmware bytes carried by one data frame.
pub const BLOCK_DATA_LEN: usize = 7;
/// Fixed DLC shared by all three update message kinds.
pub const FRAME_DLC: usize = 8;

const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
const STANDARD_ID_MAX: u32 = 0x7FF;
/// Extended-identifier bits that carry the high part of a block index.
const EXT_INDEX_MASK: u32 = 0x1FFF_F800;
const EXT_INDEX_SHIFT: u32 = 3;
/// 18 masked identifier bits plus the 8-bit payload check byte.
const MAX_BLOCK_INDEX: u32 = (1 << 26) - 1;
/// The progress message carries the block index as a 24-bit field.
const MAX_PROGRESS_BLOCK_INDEX: u32 = (1 << 24) - 1;

const MESSAGE_TYPE_LENGTH: u8 = 0;
const MESSAGE_TYPE_DIGEST: u8 = 1;

/// Errors returned by frame encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The base identifier must leave the extended-identifier region free for
    /// block-index packing.
    #[error("base identifier 0x{base_id:X} does not fit the 11-bit standard range")]
    BaseIdOutOfRange { base_id: u32 },
    /// The frame identifier exceeds the 29-bit arbitration field.
    #[error("frame identifier 0x{id:X} exceeds the 29-bit extended range")]
    IdentifierOutOfRange { id: u32 },
    /// The payload is longer than a classic CAN frame allows.
    #[error("frame payload is too large: {actual} bytes exceeds max 8")]
    PayloadTooLarge { actual: usize },
    /// The block index cannot be packed into the identifier plus check byte.
    #[error("block index {block_index} exceeds the packable maximum {max}")]
    BlockIndexOutOfRange { block_index: u32, max: u32 },
    /// The frame identifier matches none of the three update message ids.
    #[error("frame identifier 0x{id:X} is not an update protocol identifier")]
    UnexpectedIdentifier { id: u32 },
    /// The frame payload length does not match the fixed update-message DLC.
    #[error("frame 0x{id:X} has DLC {actual}, expected {expected}")]
    WrongDlc {
        id: u32,
        expected: usize,
        actual: usize,
    },
    /// The info message carries an unknown `message_type` discriminant.
    #[error("unknown info message type {value}")]
    UnknownMessageType { value: u8 },
    /// The digest chunk index is outside `0..=3`.
    #[error("digest chunk index {value} is outside 0..=3")]
    DigestChunkIndexOutOfRange { value: u8 },
}

/// One classic CAN frame: a 29-bit identifier and up to 8 payload bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CanFrame {
    id: u32,
    data: [u8; FRAME_DLC],
    dlc: u8,
}

impl CanFrame {
    /// Creates a frame from an identifier and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the identifier exceeds 29 bits or the payload
    /// exceeds 8 bytes.
    ///
    /// ```
    /// use canflash::CanFrame;
    ///
    /// let frame = CanFrame::new(0x701, &[0x01, 0x02])?;
    /// assert_eq!(0x701, frame.id());
    /// assert_eq!(&[0x01, 0x02], frame.data());
    /// # Ok::<(), canflash::FrameCodecError>(())
    /// ```
    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameCodecError> {
        if id > CAN_EFF_MASK {
            return Err(FrameCodecError::IdentifierOutOfRange { id });
        }
        if data.len() > FRAME_DLC {
            return Err(FrameCodecError::PayloadTooLarge { actual: data.len() });
        }

        let mut padded = [0u8; FRAME_DLC];
        padded[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            data: padded,
            dlc: data.len() as u8,
        })
    }

    /// Returns the 29-bit arbitration identifier.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the payload bytes up to the frame's DLC.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc)]
    }
}

/// The three update message identifiers derived from one base identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MessageIds {
    base: u32,
}

impl MessageIds {
    /// Derives the data/info/progress identifiers from a base identifier.
    ///
    /// The base must fit the 11-bit standard range so the extended-identifier
    /// bits above it stay free for block-index packing.
    ///
    /// ```
    /// use canflash::MessageIds;
    ///
    /// let ids = MessageIds::new(0x700)?;
    /// assert_eq!(0x700, ids.data_base());
    /// assert_eq!(0x701, ids.info());
    /// assert_eq!(0x702, ids.progress());
    /// # Ok::<(), canflash::FrameCodecError>(())
    /// ```
    pub fn new(base_id: u32) -> Result<Self, FrameCodecError> {
        if base_id > STANDARD_ID_MAX - 2 {
            return Err(FrameCodecError::BaseIdOutOfRange { base_id });
        }
        Ok(Self { base: base_id })
    }

    /// Returns the data-message identifier before block-index packing.
    #[must_use]
    pub fn data_base(self) -> u32 {
        self.base
    }

    /// Returns the info-message identifier.
    #[must_use]
    pub fn info(self) -> u32 {
        self.base + 1
    }

    /// Returns the progress-message identifier.
    #[must_use]
    pub fn progress(self) -> u32 {
        self.base + 2
    }
}

/// Handshake metadata carried by an info message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InfoMessage {
    /// Total firmware image length in bytes (`message_type` 0).
    Length { image_length: u32 },
    /// One 4-byte little-endian slice of the 16-byte digest (`message_type` 1).
    DigestChunk { index: u8, chunk: u32 },
}

/// Receiver state reported on the progress identifier.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProgressReport {
    /// The receiver holds all four digest chunks.
    pub received_digest: bool,
    /// The receiver accepted the image length and started the update.
    pub received_length: bool,
    /// `block_index` was just durably stored; otherwise it is the next block
    /// the receiver still expects.
    pub written: bool,
    /// Block index qualified by `written`.
    pub block_index: u32,
    /// Firmware version currently running on the receiver.
    pub fw_version: u32,
}

/// A decoded update protocol message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UpdateMessage {
    /// One firmware block, zero-padded to 7 bytes.
    Data { block_index: u32, data: [u8; BLOCK_DATA_LEN] },
    /// Digest or length handshake metadata.
    Info(InfoMessage),
    /// Receiver progress, sent only by the remote side.
    Progress(ProgressReport),
}

/// Encodes and decodes the three update message kinds to and from CAN frames.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes one firmware block as a data frame.
    ///
    /// The identifier carries bits 8..26 of the block index in the extended
    /// region; payload byte 0 carries the low 8 bits as the check byte and
    /// bytes 1..8 carry the block data little-endian.
    ///
    /// # Errors
    ///
    /// Returns an error when the block index exceeds the packable maximum.
    ///
    /// ```
    /// use canflash::{FrameCodec, MessageIds};
    ///
    /// let ids = MessageIds::new(0x700)?;
    /// let frame = FrameCodec::encode_data(ids, 0x0102, &[0xAA; 7])?;
    /// assert_eq!(0x700 | (0x0100 << 3), frame.id());
    /// assert_eq!(0x02, frame.data()[0]);
    /// # Ok::<(), canflash::FrameCodecError>(())
    /// ```
    pub fn encode_data(
        ids: MessageIds,
        block_index: u32,
        block: &[u8; BLOCK_DATA_LEN],
    ) -> Result<CanFrame, FrameCodecError> {
        if block_index > MAX_BLOCK_INDEX {
            return Err(FrameCodecError::BlockIndexOutOfRange {
                block_index,
                max: MAX_BLOCK_INDEX,
            });
        }

        let id = ids.data_base() | ((block_index << EXT_INDEX_SHIFT) & EXT_INDEX_MASK);
        let mut payload = [0u8; FRAME_DLC];
        payload[0] = (block_index & 0xFF) as u8;
        payload[1..].copy_from_slice(block);
        CanFrame::new(id, &payload)
    }

    /// Encodes a digest-chunk or length info frame.
    ///
    /// # Errors
    ///
    /// Returns an error when a digest chunk index is outside `0..=3`.
    ///
    /// ```
    /// use canflash::{FrameCodec, InfoMessage, MessageIds};
    ///
    /// let ids = MessageIds::new(0x700)?;
    /// let frame = FrameCodec::encode_info(ids, InfoMessage::Length { image_length: 10 })?;
    /// assert_eq!(0x701, frame.id());
    /// assert_eq!(&[0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], frame.data());
    /// # Ok::<(), canflash::FrameCodecError>(())
    /// ```
    pub fn encode_info(ids: MessageIds, message: InfoMessage) -> Result<CanFrame, FrameCodecError> {
        let mut payload = [0u8; FRAME_DLC];
        match message {
            InfoMessage::Length { image_length } => {
                payload[0] = MESSAGE_TYPE_LENGTH;
                payload[1..5].copy_from_slice(&image_length.to_le_bytes());
            }
            InfoMessage::DigestChunk { index, chunk } => {
                if index > 3 {
                    return Err(FrameCodecError::DigestChunkIndexOutOfRange { value: index });
                }
                payload[0] = MESSAGE_TYPE_DIGEST;
                payload[1] = index;
                payload[2..6].copy_from_slice(&chunk.to_le_bytes());
            }
        }
        CanFrame::new(ids.info(), &payload)
    }

    /// Encodes a receiver progress frame.
    ///
    /// Only the remote side transmits these; the encoder exists for the
    /// simulated receiver and for round-trip tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the block index exceeds the 24-bit wire field.
    pub fn encode_progress(
        ids: MessageIds,
        report: ProgressReport,
    ) -> Result<CanFrame, FrameCodecError> {
        if report.block_index > MAX_PROGRESS_BLOCK_INDEX {
            return Err(FrameCodecError::BlockIndexOutOfRange {
                block_index: report.block_index,
                max: MAX_PROGRESS_BLOCK_INDEX,
            });
        }

        let index_bytes = report.block_index.to_le_bytes();
        let mut payload = [0u8; FRAME_DLC];
        payload[0..3].copy_from_slice(&index_bytes[0..3]);
        payload[3] = u8::from(report.received_length)
            | (u8::from(report.received_digest) << 1)
            | (u8::from(report.written) << 2);
        payload[4..8].copy_from_slice(&report.fw_version.to_le_bytes());
        CanFrame::new(ids.progress(), &payload)
    }

    /// Decodes a received frame into an update message.
    ///
    /// # Errors
    ///
    /// Returns an error when the identifier matches none of the update ids,
    /// the DLC is wrong, or a discriminant field is out of range. Callers
    /// discard undecodable frames and keep their loop running.
    ///
    /// ```
    /// use canflash::{FrameCodec, MessageIds, UpdateMessage};
    ///
    /// let ids = MessageIds::new(0x700)?;
    /// let frame = FrameCodec::encode_data(ids, 9, &[1, 2, 3, 4, 5, 6, 7])?;
    /// let message = FrameCodec::decode(ids, &frame)?;
    /// assert_eq!(
    ///     UpdateMessage::Data { block_index: 9, data: [1, 2, 3, 4, 5, 6, 7] },
    ///     message
    /// );
    /// # Ok::<(), canflash::FrameCodecError>(())
    /// ```
    pub fn decode(ids: MessageIds, frame: &CanFrame) -> Result<UpdateMessage, FrameCodecError> {
        let id = frame.id();
        if id == ids.info() {
            let payload = fixed_payload(frame)?;
            return decode_info(&payload).map(UpdateMessage::Info);
        }
        if id == ids.progress() {
            let payload = fixed_payload(frame)?;
            return Ok(UpdateMessage::Progress(decode_progress(&payload)));
        }
        if id & !EXT_INDEX_MASK == ids.data_base() {
            let payload = fixed_payload(frame)?;
            let high = (id & EXT_INDEX_MASK) >> EXT_INDEX_SHIFT;
            let block_index = high + u32::from(payload[0]);
            let mut data = [0u8; BLOCK_DATA_LEN];
            data.copy_from_slice(&payload[1..]);
            return Ok(UpdateMessage::Data { block_index, data });
        }

        Err(FrameCodecError::UnexpectedIdentifier { id })
    }
}

fn fixed_payload(frame: &CanFrame) -> Result<[u8; FRAME_DLC], FrameCodecError> {
    let data = frame.data();
    let payload: [u8; FRAME_DLC] =
        data.try_into()
            .map_err(|_short| FrameCodecError::WrongDlc {
                id: frame.id(),
                expected: FRAME_DLC,
                actual: data.len(),
            })?;
    Ok(payload)
}

fn decode_info(payload: &[u8; FRAME_DLC]) -> Result<InfoMessage, FrameCodecError> {
    match payload[0] {
        MESSAGE_TYPE_LENGTH => Ok(InfoMessage::Length {
            image_length: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
        }),
        MESSAGE_TYPE_DIGEST => {
            let index = payload[1];
            if index > 3 {
                return Err(FrameCodecError::DigestChunkIndexOutOfRange { value: index });
            }
            Ok(InfoMessage::DigestChunk {
                index,
                chunk: u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]),
            })
        }
        value => Err(FrameCodecError::UnknownMessageType { value }),
    }
}

fn decode_progress(payload: &[u8; FRAME_DLC]) -> ProgressReport {
    let block_index = u32::from_le_bytes([payload[0], payload[1], payload[2], 0x00]);
    let flags = payload[3];
    ProgressReport {
        received_length: flags & 0x01 != 0,
        received_digest: flags & 0x02 != 0,
        written: flags & 0x04 != 0,
        block_index,
        fw_version: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn ids() -> MessageIds {
        MessageIds::new(0x700).expect("0x700 fits the standard range")
    }

    #[test]
    fn message_ids_reject_bases_above_the_standard_range() {
        let result = MessageIds::new(0x7FE);
        assert_matches!(
            result,
            Err(FrameCodecError::BaseIdOutOfRange { base_id: 0x7FE })
        );
    }

    #[rstest]
    #[case(0, 0x700, 0x00)]
    #[case(0xFF, 0x700, 0xFF)]
    #[case(0x100, 0x700 | (0x100 << 3), 0x00)]
    #[case((1 << 26) - 1, 0x700 | 0x1FFF_F800, 0xFF)]
    fn encode_data_packs_index_into_identifier_and_check_byte(
        #[case] block_index: u32,
        #[case] expected_id: u32,
        #[case] expected_check: u8,
    ) {
        let frame = FrameCodec::encode_data(ids(), block_index, &[0u8; 7])
            .expect("index within packable range should encode");
        assert_eq!(expected_id, frame.id());
        assert_eq!(expected_check, frame.data()[0]);
    }

    #[test]
    fn encode_data_rejects_index_beyond_packable_range() {
        let result = FrameCodec::encode_data(ids(), 1 << 26, &[0u8; 7]);
        assert_matches!(
            result,
            Err(FrameCodecError::BlockIndexOutOfRange { block_index, max })
                if block_index == 1 << 26 && max == (1 << 26) - 1
        );
    }

    #[rstest]
    #[case(0)]
    #[case(0x1234)]
    #[case(0x0003_FFFF)]
    #[case((1 << 26) - 1)]
    fn data_round_trip_recovers_index_and_payload(#[case] block_index: u32) {
        let block = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70];
        let frame = FrameCodec::encode_data(ids(), block_index, &block)
            .expect("index within packable range should encode");
        let message = FrameCodec::decode(ids(), &frame).expect("data frame should decode");
        assert_eq!(UpdateMessage::Data { block_index, data: block }, message);
    }

    #[test]
    fn masked_identifier_carries_index_bits_above_the_check_byte() {
        for block_index in [0x100u32, 0xABCD, 0x0002_0000] {
            let frame = FrameCodec::encode_data(ids(), block_index, &[0u8; 7])
                .expect("index within packable range should encode");
            let high = (frame.id() & 0x1FFF_F800) >> 3;
            assert_eq!(block_index & !0xFF, high);
            assert_eq!((block_index & 0xFF) as u8, frame.data()[0]);
        }
    }

    #[test]
    fn encode_length_info_matches_wire_layout() {
        let frame = FrameCodec::encode_info(
            ids(),
            InfoMessage::Length {
                image_length: 0x0001_0203,
            },
        )
        .expect("length info should encode");
        assert_eq!(0x701, frame.id());
        assert_eq!(
            &[0x00, 0x03, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00],
            frame.data()
        );
    }

    #[test]
    fn encode_digest_chunk_matches_wire_layout() {
        let frame = FrameCodec::encode_info(
            ids(),
            InfoMessage::DigestChunk {
                index: 2,
                chunk: 0xAABB_CCDD,
            },
        )
        .expect("digest chunk should encode");
        assert_eq!(
            &[0x01, 0x02, 0xDD, 0xCC, 0xBB, 0xAA, 0x00, 0x00],
            frame.data()
        );
    }

    #[test]
    fn encode_info_rejects_digest_chunk_index_above_three() {
        let result = FrameCodec::encode_info(ids(), InfoMessage::DigestChunk { index: 4, chunk: 0 });
        assert_matches!(
            result,
            Err(FrameCodecError::DigestChunkIndexOutOfRange { value: 4 })
        );
    }

    #[rstest]
    #[case(InfoMessage::Length { image_length: 0 })]
    #[case(InfoMessage::Length { image_length: u32::MAX })]
    #[case(InfoMessage::DigestChunk { index: 0, chunk: 0 })]
    #[case(InfoMessage::DigestChunk { index: 3, chunk: 0xDEAD_BEEF })]
    fn info_round_trip_recovers_message(#[case] message: InfoMessage) {
        let frame = FrameCodec::encode_info(ids(), message).expect("valid info should encode");
        let decoded = FrameCodec::decode(ids(), &frame).expect("info frame should decode");
        assert_eq!(UpdateMessage::Info(message), decoded);
    }

    #[rstest]
    #[case(ProgressReport {
        received_digest: false,
        received_length: false,
        written: false,
        block_index: 0,
        fw_version: 0,
    })]
    #[case(ProgressReport {
        received_digest: true,
        received_length: true,
        written: true,
        block_index: 0x00FF_FFFF,
        fw_version: 0x6543_2100,
    })]
    #[case(ProgressReport {
        received_digest: true,
        received_length: false,
        written: false,
        block_index: 42,
        fw_version: 7,
    })]
    fn progress_round_trip_recovers_report(#[case] report: ProgressReport) {
        let frame =
            FrameCodec::encode_progress(ids(), report).expect("valid progress should encode");
        let decoded = FrameCodec::decode(ids(), &frame).expect("progress frame should decode");
        assert_eq!(UpdateMessage::Progress(report), decoded);
    }

    #[test]
    fn decode_rejects_unknown_identifier() {
        let frame = CanFrame::new(0x123, &[0u8; 8]).expect("frame should construct");
        let result = FrameCodec::decode(ids(), &frame);
        assert_matches!(result, Err(FrameCodecError::UnexpectedIdentifier { id: 0x123 }));
    }

    #[test]
    fn decode_rejects_short_info_frame() {
        let frame = CanFrame::new(0x701, &[0x00, 0x01]).expect("frame should construct");
        let result = FrameCodec::decode(ids(), &frame);
        assert_matches!(
            result,
            Err(FrameCodecError::WrongDlc {
                id: 0x701,
                expected: 8,
                actual: 2,
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_info_message_type() {
        let frame =
            CanFrame::new(0x701, &[0x07, 0, 0, 0, 0, 0, 0, 0]).expect("frame should construct");
        let result = FrameCodec::decode(ids(), &frame);
        assert_matches!(result, Err(FrameCodecError::UnknownMessageType { value: 7 }));
    }

    #[test]
    fn can_frame_rejects_oversized_payload() {
        let result = CanFrame::new(0x700, &[0u8; 9]);
        assert_matches!(result, Err(FrameCodecError::PayloadTooLarge { actual: 9 }));
    }

    #[test]
    fn can_frame_rejects_identifier_above_29_bits() {
        let result = CanFrame::new(0x2000_0000, &[]);
        assert_matches!(
            result,
            Err(FrameCodecError::IdentifierOutOfRange { id: 0x2000_0000 })
        );
    }
}
