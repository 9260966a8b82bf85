//! Frame codec for the BluFi wire format.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: `(subtype << 2) | type`
//! - 1 byte: frame control flags
//! - 1 byte: sequence number
//! - 1 byte: payload length (plaintext length)
//! - N bytes: payload (possibly encrypted)
//! - 2 bytes: CRC16, little-endian, only when the checksum flag is set
//!
//! # Fragmentation
//!
//! A message too large for one frame is split across frames carrying the
//! fragment flag. Each fragment's payload begins with the total message
//! length as a little-endian u16; the final frame of the message carries no
//! flag and no prefix.
//!
//! The codec performs no cryptography: payloads are encrypted or decrypted
//! by the session around it.

use crate::checksum::{self, CHECKSUM_SIZE};
use crate::error::{ProtocolError, Result};

/// Frame header size: type/subtype + control + sequence + length.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload the 1-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Size of the total-length prefix carried by fragment frames.
pub const FRAGMENT_PREFIX_SIZE: usize = 2;

/// Top-level frame type (2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Control frames: commands and acks without bulk data.
    Control,
    /// Data frames: negotiation, credentials, reports.
    Data,
    /// Type values 2 and 3, unused by the protocol.
    Reserved(u8),
}

impl FrameType {
    /// Decodes the two low bits of the first header byte.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FrameType::Control,
            1 => FrameType::Data,
            other => FrameType::Reserved(other),
        }
    }

    /// Returns the two-bit wire value.
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            FrameType::Control => 0,
            FrameType::Data => 1,
            FrameType::Reserved(bits) => bits & 0x03,
        }
    }
}

/// Control frame subtypes.
pub mod control {
    /// Acknowledgement of a peer frame.
    pub const ACK: u8 = 0x00;
    /// Security mode announcement.
    pub const SET_SECURITY_MODE: u8 = 0x01;
    /// Wi-Fi operating mode.
    pub const SET_OPMODE: u8 = 0x02;
    /// Connect the station interface to the configured AP.
    pub const CONNECT_WIFI: u8 = 0x03;
    /// Disconnect the station interface from its AP.
    pub const DISCONNECT_WIFI: u8 = 0x04;
    /// Request a Wi-Fi status report.
    pub const GET_WIFI_STATUS: u8 = 0x05;
    /// Deauthenticate stations connected to the soft AP.
    pub const DEAUTHENTICATE_STA: u8 = 0x06;
    /// Request the firmware protocol version.
    pub const GET_VERSION: u8 = 0x07;
    /// Ask the device to drop the BLE link.
    pub const DISCONNECT_BLE: u8 = 0x08;
    /// Request a Wi-Fi scan list.
    pub const GET_WIFI_LIST: u8 = 0x09;
}

/// Data frame subtypes.
pub mod data {
    /// Security negotiation data.
    pub const NEGOTIATION: u8 = 0x00;
    /// Station BSSID.
    pub const STA_BSSID: u8 = 0x01;
    /// Station SSID.
    pub const STA_SSID: u8 = 0x02;
    /// Station passphrase.
    pub const STA_PASSWORD: u8 = 0x03;
    /// Wi-Fi connection state report.
    pub const WIFI_STATUS_REPORT: u8 = 0x0f;
    /// Firmware version reply.
    pub const VERSION: u8 = 0x10;
    /// Wi-Fi scan list.
    pub const WIFI_LIST: u8 = 0x11;
    /// Device error report.
    pub const ERROR: u8 = 0x12;
    /// Application-defined payload.
    pub const CUSTOM_DATA: u8 = 0x13;
}

/// Frame control flags (second header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameControl(u8);

impl FrameControl {
    /// Payload is encrypted.
    pub const ENCRYPTED: u8 = 0b0000_0001;
    /// Frame carries a CRC16 trailer.
    pub const CHECKSUM: u8 = 0b0000_0010;
    /// Set on frames sent by the device.
    pub const DIRECTION: u8 = 0b0000_0100;
    /// Receiver must acknowledge the frame.
    pub const REQUIRE_ACK: u8 = 0b0000_1000;
    /// More fragments of the same message follow.
    pub const FRAGMENT: u8 = 0b0001_0000;

    /// Create a new empty flags set.
    #[inline]
    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    #[inline]
    fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    fn with(mut self, flag: u8, enabled: bool) -> Self {
        if enabled {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
        self
    }

    /// Check if the encrypted flag is set.
    #[inline]
    pub fn is_encrypted(self) -> bool {
        self.has(Self::ENCRYPTED)
    }

    /// Check if the checksum flag is set.
    #[inline]
    pub fn has_checksum(self) -> bool {
        self.has(Self::CHECKSUM)
    }

    /// Check if the frame travels from device to controller.
    #[inline]
    pub fn is_from_device(self) -> bool {
        self.has(Self::DIRECTION)
    }

    /// Check if the sender requires an acknowledgement.
    #[inline]
    pub fn requires_ack(self) -> bool {
        self.has(Self::REQUIRE_ACK)
    }

    /// Check if more fragments follow this frame.
    #[inline]
    pub fn is_fragment(self) -> bool {
        self.has(Self::FRAGMENT)
    }

    /// Return a new flags with encrypted set or cleared.
    #[inline]
    pub fn with_encrypted(self, enabled: bool) -> Self {
        self.with(Self::ENCRYPTED, enabled)
    }

    /// Return a new flags with checksum set or cleared.
    #[inline]
    pub fn with_checksum(self, enabled: bool) -> Self {
        self.with(Self::CHECKSUM, enabled)
    }

    /// Return a new flags with direction set or cleared.
    #[inline]
    pub fn with_direction(self, from_device: bool) -> Self {
        self.with(Self::DIRECTION, from_device)
    }

    /// Return a new flags with ack-required set or cleared.
    #[inline]
    pub fn with_require_ack(self, enabled: bool) -> Self {
        self.with(Self::REQUIRE_ACK, enabled)
    }

    /// Return a new flags with fragment set or cleared.
    #[inline]
    pub fn with_fragment(self, enabled: bool) -> Self {
        self.with(Self::FRAGMENT, enabled)
    }
}

/// A single BluFi frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Six-bit subtype.
    pub subtype: u8,
    /// Frame control flags.
    pub control: FrameControl,
    /// Sequence number.
    pub sequence: u8,
    /// Payload bytes, ciphertext when the encrypted flag is set.
    pub payload: Vec<u8>,
    /// CRC16 trailer, either received or precomputed over the plaintext.
    pub checksum: Option<u16>,
}

impl Frame {
    /// Create a new frame with empty flags and no checksum.
    pub fn new(frame_type: FrameType, subtype: u8, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            subtype,
            control: FrameControl::new(),
            sequence,
            payload,
            checksum: None,
        }
    }

    /// Create a new frame with explicit flags.
    pub fn with_control(
        frame_type: FrameType,
        subtype: u8,
        control: FrameControl,
        sequence: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            frame_type,
            subtype,
            control,
            sequence,
            payload,
            checksum: None,
        }
    }

    /// Returns the first header byte.
    #[inline]
    pub fn type_byte(&self) -> u8 {
        ((self.subtype & 0x3F) << 2) | self.frame_type.bits()
    }

    /// Computes the CRC16 of the header and the current payload.
    ///
    /// The length byte is the current payload length, so this must run
    /// while the payload is still plaintext.
    pub fn compute_checksum(&self) -> u16 {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&[
            self.type_byte(),
            self.control.as_byte(),
            self.sequence,
            self.payload.len() as u8,
        ]);
        bytes.extend_from_slice(&self.payload);
        checksum::compute(&bytes)
    }

    /// Checks the carried checksum against the current (plaintext) payload.
    ///
    /// Frames without a checksum trailer always verify.
    pub fn verify_checksum(&self) -> Result<()> {
        match self.checksum {
            Some(got) => {
                let expected = self.compute_checksum();
                if expected == got {
                    Ok(())
                } else {
                    Err(ProtocolError::ChecksumMismatch { expected, got })
                }
            }
            None => Ok(()),
        }
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a frame into bytes.
    ///
    /// When the checksum flag is set the trailer is `frame.checksum` if
    /// present, otherwise it is computed over the frame as given.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let trailer = if frame.control.has_checksum() {
            CHECKSUM_SIZE
        } else {
            0
        };
        let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + trailer);

        output.push(frame.type_byte());
        output.push(frame.control.as_byte());
        output.push(frame.sequence);
        output.push(payload.len() as u8);
        output.extend_from_slice(payload);

        if frame.control.has_checksum() {
            let crc = frame.checksum.unwrap_or_else(|| frame.compute_checksum());
            output.extend_from_slice(&checksum::to_wire(crc));
        }

        Ok(output)
    }

    /// Decode a frame from bytes.
    ///
    /// The checksum, if any, is returned unverified: it covers the plaintext
    /// and can only be checked once the payload has been decrypted.
    pub fn decode(&self, data: &[u8]) -> Result<Frame> {
        if data.len() <= FRAME_HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "insufficient data for frame: need more than {} bytes, have {}",
                FRAME_HEADER_SIZE,
                data.len()
            )));
        }

        let frame_type = FrameType::from_bits(data[0]);
        let subtype = data[0] >> 2;
        let control = FrameControl::from_byte(data[1]);
        let sequence = data[2];
        let length = data[3] as usize;

        let trailer = if control.has_checksum() {
            CHECKSUM_SIZE
        } else {
            0
        };
        let needed = FRAME_HEADER_SIZE + length + trailer;
        if data.len() < needed {
            return Err(ProtocolError::MalformedFrame(format!(
                "declared payload of {} bytes needs {} bytes, have {}",
                length,
                needed,
                data.len()
            )));
        }

        let payload_end = FRAME_HEADER_SIZE + length;
        let payload = data[FRAME_HEADER_SIZE..payload_end].to_vec();
        let checksum = if control.has_checksum() {
            Some(checksum::from_wire([data[payload_end], data[payload_end + 1]]))
        } else {
            None
        };

        Ok(Frame {
            frame_type,
            subtype,
            control,
            sequence,
            payload,
            checksum,
        })
    }
}

/// Splits a message into frame payloads of at most `chunk_size` message bytes.
///
/// Every chunk except the last is prefixed with the total message length
/// (little-endian u16) and belongs in a frame with the fragment flag set.
/// The last chunk is returned without a prefix. An empty message yields one
/// empty chunk.
pub fn fragment(message: &[u8], chunk_size: usize) -> Result<Vec<Vec<u8>>> {
    if chunk_size == 0 || chunk_size + FRAGMENT_PREFIX_SIZE > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::InvalidOptions(format!(
            "fragment chunk size must be between 1 and {}, got {}",
            MAX_PAYLOAD_SIZE - FRAGMENT_PREFIX_SIZE,
            chunk_size
        )));
    }
    if message.len() > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge {
            size: message.len(),
            max: u16::MAX as usize,
        });
    }
    if message.is_empty() {
        return Ok(vec![Vec::new()]);
    }

    let total = (message.len() as u16).to_le_bytes();
    let chunks: Vec<&[u8]> = message.chunks(chunk_size).collect();
    let last = chunks.len() - 1;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            if index == last {
                chunk.to_vec()
            } else {
                let mut payload = Vec::with_capacity(FRAGMENT_PREFIX_SIZE + chunk.len());
                payload.extend_from_slice(&total);
                payload.extend_from_slice(chunk);
                payload
            }
        })
        .collect())
}

/// Accumulates fragment payloads into complete messages.
///
/// Every payload is appended; the message is released on the first frame
/// without the fragment flag, even when no fragments preceded it.
#[derive(Debug, Clone)]
pub struct Reassembler {
    buffer: Vec<u8>,
    max_size: usize,
}

impl Reassembler {
    /// Creates a reassembler that rejects messages larger than `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
        }
    }

    /// Returns whether a partial message is buffered.
    pub fn is_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Returns the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Adds one decrypted frame payload.
    ///
    /// Returns the complete message when `is_fragment` is false. On error
    /// the partial message is discarded.
    pub fn push(&mut self, payload: &[u8], is_fragment: bool) -> Result<Option<Vec<u8>>> {
        let body = if is_fragment {
            match payload.get(FRAGMENT_PREFIX_SIZE..) {
                Some(body) => body,
                None => {
                    self.clear();
                    return Err(ProtocolError::MalformedFrame(format!(
                        "fragment payload of {} bytes lacks the total-length prefix",
                        payload.len()
                    )));
                }
            }
        } else {
            payload
        };

        if self.buffer.len() + body.len() > self.max_size {
            let size = self.buffer.len() + body.len();
            self.clear();
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_size,
            });
        }

        self.buffer.extend_from_slice(body);

        if is_fragment {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.buffer)))
        }
    }

    /// Discards any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_control_default() {
        let flags = FrameControl::new();
        assert_eq!(flags.as_byte(), 0);
        assert!(!flags.is_encrypted());
        assert!(!flags.has_checksum());
        assert!(!flags.is_from_device());
        assert!(!flags.requires_ack());
        assert!(!flags.is_fragment());
    }

    #[test]
    fn test_frame_control_bits() {
        assert!(FrameControl::from_byte(0x01).is_encrypted());
        assert!(FrameControl::from_byte(0x02).has_checksum());
        assert!(FrameControl::from_byte(0x04).is_from_device());
        assert!(FrameControl::from_byte(0x08).requires_ack());
        assert!(FrameControl::from_byte(0x10).is_fragment());

        let flags = FrameControl::new()
            .with_encrypted(true)
            .with_checksum(true)
            .with_fragment(true);
        assert_eq!(flags.as_byte(), 0x13);
        assert_eq!(flags.with_fragment(false).as_byte(), 0x03);
    }

    #[test]
    fn test_frame_type_bits() {
        assert_eq!(FrameType::from_bits(0x00), FrameType::Control);
        assert_eq!(FrameType::from_bits(0x45), FrameType::Data);
        assert_eq!(FrameType::from_bits(0x02), FrameType::Reserved(2));
        assert_eq!(FrameType::Data.bits(), 1);
    }

    #[test]
    fn test_header_layout() {
        let codec = FrameCodec::new();
        let frame = Frame::new(FrameType::Data, data::STA_SSID, 7, b"home".to_vec());
        let encoded = codec.encode(&frame).unwrap();

        assert_eq!(encoded[0], (0x02 << 2) | 0x01);
        assert_eq!(encoded[1], 0x00);
        assert_eq!(encoded[2], 7);
        assert_eq!(encoded[3], 4);
        assert_eq!(&encoded[4..], b"home");
    }

    #[test]
    fn test_security_mode_frame_bytes() {
        let codec = FrameCodec::new();
        let frame = Frame::with_control(
            FrameType::Control,
            control::SET_SECURITY_MODE,
            FrameControl::new().with_checksum(true),
            0,
            vec![0x03],
        );
        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(encoded, vec![0x04, 0x02, 0x00, 0x01, 0x03, 0x31, 0x30]);
    }

    #[test]
    fn test_encode_decode_roundtrip_with_checksum() {
        let codec = FrameCodec::new();
        let control = FrameControl::new().with_checksum(true).with_require_ack(true);
        let original =
            Frame::with_control(FrameType::Data, data::CUSTOM_DATA, control, 42, vec![9, 8, 7]);

        let encoded = codec.encode(&original).unwrap();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 3 + CHECKSUM_SIZE);

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.frame_type, FrameType::Data);
        assert_eq!(decoded.subtype, data::CUSTOM_DATA);
        assert_eq!(decoded.control, control);
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.payload, vec![9, 8, 7]);
        assert!(decoded.verify_checksum().is_ok());
    }

    #[test]
    fn test_precomputed_checksum_is_kept() {
        let codec = FrameCodec::new();
        let mut frame = Frame::with_control(
            FrameType::Data,
            data::STA_PASSWORD,
            FrameControl::new().with_checksum(true).with_encrypted(true),
            3,
            b"secret".to_vec(),
        );
        let plaintext_crc = frame.compute_checksum();
        frame.checksum = Some(plaintext_crc);
        frame.payload = vec![0xEE; 6];

        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(&encoded[10..], &checksum::to_wire(plaintext_crc));
    }

    #[test]
    fn test_decode_detects_corrupted_payload() {
        let codec = FrameCodec::new();
        let frame = Frame::with_control(
            FrameType::Data,
            data::WIFI_LIST,
            FrameControl::new().with_checksum(true),
            1,
            vec![1, 2, 3, 4],
        );
        let mut encoded = codec.encode(&frame).unwrap();
        encoded[5] ^= 0xFF;

        let decoded = codec.decode(&encoded).unwrap();
        assert!(matches!(
            decoded.verify_checksum(),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_short_buffers() {
        let codec = FrameCodec::new();
        for len in 0..=FRAME_HEADER_SIZE {
            let data = vec![0x45; len];
            assert!(
                matches!(codec.decode(&data), Err(ProtocolError::MalformedFrame(_))),
                "len {} should be malformed",
                len
            );
        }
    }

    #[test]
    fn test_empty_command_is_header_only() {
        let codec = FrameCodec::new();
        let frame = Frame::new(FrameType::Control, control::GET_WIFI_LIST, 3, vec![]);
        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(encoded, vec![0x24, 0x00, 0x03, 0x00]);

        // Inbound frames always carry a payload.
        assert!(matches!(
            codec.decode(&encoded),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_length_exceeds_buffer() {
        let codec = FrameCodec::new();
        let data = [0x45, 0x00, 0x00, 0x10, 0x01, 0x02];
        assert!(matches!(
            codec.decode(&data),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_missing_checksum_trailer() {
        let codec = FrameCodec::new();
        let data = [0x45, 0x02, 0x00, 0x02, 0x01, 0x02, 0x03];
        assert!(matches!(
            codec.decode(&data),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let codec = FrameCodec::new();
        let frame = Frame::new(FrameType::Data, data::CUSTOM_DATA, 0, vec![0; 256]);
        assert!(matches!(
            codec.encode(&frame),
            Err(ProtocolError::PayloadTooLarge { size: 256, max: 255 })
        ));
    }

    #[test]
    fn test_fragment_single_chunk() {
        let chunks = fragment(&[1, 2, 3], 80).unwrap();
        assert_eq!(chunks, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_fragment_prefixes_all_but_last() {
        let message: Vec<u8> = (0..200u8).collect();
        let chunks = fragment(&message, 80).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..2], &200u16.to_le_bytes());
        assert_eq!(chunks[0].len(), 82);
        assert_eq!(&chunks[1][..2], &200u16.to_le_bytes());
        assert_eq!(chunks[2], message[160..].to_vec());
    }

    #[test]
    fn test_fragment_rejects_bad_chunk_size() {
        assert!(fragment(&[1], 0).is_err());
        assert!(fragment(&[1], 254).is_err());
        assert!(fragment(&[1], 253).is_ok());
    }

    #[test]
    fn test_reassembly_reconstructs_message() {
        for len in [1usize, 79, 80, 81, 160, 263, 1000] {
            let message: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let chunks = fragment(&message, 80).unwrap();
            let last = chunks.len() - 1;

            let mut reassembler = Reassembler::new(4096);
            let mut result = None;
            for (index, chunk) in chunks.iter().enumerate() {
                result = reassembler.push(chunk, index != last).unwrap();
                if index != last {
                    assert!(result.is_none());
                }
            }
            assert_eq!(result, Some(message));
            assert!(!reassembler.is_pending());
        }
    }

    #[test]
    fn test_reassembly_single_frame_flushes() {
        let mut reassembler = Reassembler::new(64);
        assert_eq!(reassembler.push(&[5, 6], false).unwrap(), Some(vec![5, 6]));
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn test_reassembly_rejects_short_fragment() {
        let mut reassembler = Reassembler::new(64);
        reassembler.push(&[0, 0, 1], true).unwrap();
        assert!(matches!(
            reassembler.push(&[0x01], true),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn test_reassembly_enforces_limit() {
        let mut reassembler = Reassembler::new(4);
        reassembler.push(&[0, 0, 1, 2, 3], true).unwrap();
        assert!(matches!(
            reassembler.push(&[4, 5], false),
            Err(ProtocolError::PayloadTooLarge { size: 5, max: 4 })
        ));
        assert!(!reassembler.is_pending());
    }
}
