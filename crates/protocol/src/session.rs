//! The per-connection protocol state machine.
//!
//! A [`ProtocolSession`] owns everything that must never be shared between
//! two device connections: the key agreement, the stream cipher, the
//! outbound sequence counter and the inbound reassembly buffer.
//!
//! ## Lifecycle
//! ```text
//! Idle --start_negotiation--> Negotiating --negotiation reply--> Secured
//!   ^                                                               |
//!   +----------------- reset / cipher desynchronisation ------------+
//! ```
//!
//! The session is synchronous: inbound buffers go in through
//! [`ProtocolSession::handle_inbound`] in transport order, and every
//! operation returns the encoded frames the caller must write to the
//! transport, in order.

use tracing::{debug, info, warn};

use crate::cipher::StreamCipher;
use crate::error::{ProtocolError, Result};
use crate::framing::{
    control, data, fragment, Frame, FrameCodec, FrameControl, FrameType, Reassembler,
    FRAGMENT_PREFIX_SIZE, MAX_PAYLOAD_SIZE,
};
use crate::messages::{
    DeviceErrorCode, DeviceInfo, FrameSecurity, OpMode, SessionEvent, Version, WifiList,
};
use crate::negotiation::{negotiation_length_payload, KeyAgreement};
use crate::options::SessionOptions;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key agreement exists.
    Idle,
    /// Negotiation payload sent, waiting for the device's public value.
    Negotiating,
    /// Session key established.
    Secured,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Secured => "secured",
        }
    }
}

/// Result of processing one inbound buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionOutput {
    /// Frames to write to the transport, in order.
    pub outbound: Vec<Vec<u8>>,
    /// Events for the caller, in order.
    pub events: Vec<SessionEvent>,
}

/// Controller side of one BluFi connection.
pub struct ProtocolSession {
    options: SessionOptions,
    codec: FrameCodec,
    state: SessionState,
    key_agreement: Option<KeyAgreement>,
    cipher: Option<StreamCipher>,
    sequence: u8,
    reassembler: Reassembler,
}

impl ProtocolSession {
    /// Creates an idle session with validated options.
    pub fn new(options: SessionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::from_valid_options(options))
    }

    fn from_valid_options(options: SessionOptions) -> Self {
        Self {
            reassembler: Reassembler::new(options.max_message_size),
            options,
            codec: FrameCodec::new(),
            state: SessionState::Idle,
            key_agreement: None,
            cipher: None,
            sequence: 0,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns whether the session key is established.
    pub fn is_secured(&self) -> bool {
        self.state == SessionState::Secured
    }

    /// Returns the sequence number the next outbound frame will carry.
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    /// Returns the session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Discards all negotiation, cipher and reassembly state.
    pub fn reset(&mut self) {
        if self.state != SessionState::Idle {
            info!(from = self.state.name(), "resetting blufi session");
        }
        self.state = SessionState::Idle;
        self.key_agreement = None;
        self.cipher = None;
        self.sequence = 0;
        self.reassembler.clear();
    }

    /// Starts the security negotiation.
    ///
    /// Returns the length announcement followed by the negotiation payload
    /// split into fragment frames of at most `negotiation_chunk_size` bytes.
    pub fn start_negotiation(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.state != SessionState::Idle {
            return Err(ProtocolError::InvalidState {
                operation: "start negotiation",
                state: self.state.name(),
            });
        }

        let agreement = KeyAgreement::generate()?;
        let payload = agreement.negotiation_payload();
        let chunks = fragment(&payload, self.options.negotiation_chunk_size)?;

        let security = self.policy_for(FrameType::Data);
        let mut frames = Vec::with_capacity(chunks.len() + 1);
        frames.push(self.build_frame(
            FrameType::Data,
            data::NEGOTIATION,
            false,
            security,
            &negotiation_length_payload(payload.len() as u16),
        )?);

        let last = chunks.len() - 1;
        for (index, chunk) in chunks.iter().enumerate() {
            frames.push(self.build_frame(
                FrameType::Data,
                data::NEGOTIATION,
                index != last,
                security,
                chunk,
            )?);
        }

        info!(
            payload_len = payload.len(),
            frames = frames.len(),
            "starting blufi security negotiation"
        );
        self.key_agreement = Some(agreement);
        self.state = SessionState::Negotiating;
        Ok(frames)
    }

    fn complete_negotiation(&mut self, peer_public: &[u8], output: &mut SessionOutput) {
        let agreement = match (&self.state, &self.key_agreement) {
            (SessionState::Negotiating, Some(agreement)) => agreement,
            _ => {
                output.events.push(SessionEvent::FrameDropped {
                    error: ProtocolError::InvalidState {
                        operation: "complete negotiation",
                        state: self.state.name(),
                    },
                });
                return;
            }
        };

        let key = match agreement.derive_key(peer_public) {
            Ok(key) => key,
            Err(error) => {
                warn!(%error, "device public value rejected");
                output.events.push(SessionEvent::FrameDropped { error });
                return;
            }
        };

        self.cipher = Some(StreamCipher::new(&key));
        self.key_agreement = None;

        let mode = self.options.security;
        let announce = FrameSecurity {
            checksum: true,
            encrypt: false,
        };
        match self.build_frame(
            FrameType::Control,
            control::SET_SECURITY_MODE,
            false,
            announce,
            &[mode.as_byte()],
        ) {
            Ok(frame) => output.outbound.push(frame),
            Err(error) => {
                output.events.push(SessionEvent::FrameDropped { error });
                return;
            }
        }

        self.state = SessionState::Secured;
        info!(security_mode = mode.as_byte(), "blufi session secured");
        output.events.push(SessionEvent::NegotiationComplete);
    }

    /// Processes one inbound buffer from the transport.
    ///
    /// Recoverable failures become [`SessionEvent::FrameDropped`]; cipher
    /// failures reset the session and emit [`SessionEvent::SessionReset`].
    pub fn handle_inbound(&mut self, bytes: &[u8]) -> SessionOutput {
        let mut output = SessionOutput::default();
        debug!(len = bytes.len(), frame = %hex::encode(bytes), "blufi frame received");

        let mut frame = match self.codec.decode(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping inbound frame");
                output.events.push(SessionEvent::FrameDropped { error });
                return output;
            }
        };

        // Acks go out for every decodable frame, whatever happens next.
        if frame.control.requires_ack() {
            match self.ack_frame(frame.sequence) {
                Ok(ack) => output.outbound.push(ack),
                Err(error) => output.events.push(SessionEvent::FrameDropped { error }),
            }
        }

        if frame.control.is_encrypted() {
            match &self.cipher {
                Some(cipher) => frame.payload = cipher.decrypt(&frame.payload, frame.sequence),
                None => {
                    let error = ProtocolError::Decryption(format!(
                        "encrypted frame (seq {}) received while {}",
                        frame.sequence,
                        self.state.name()
                    ));
                    warn!(%error, "cipher out of sync");
                    self.reset();
                    output.events.push(SessionEvent::SessionReset { error });
                    return output;
                }
            }
        }

        if let Err(error) = frame.verify_checksum() {
            warn!(%error, sequence = frame.sequence, "dropping inbound frame");
            output.events.push(SessionEvent::FrameDropped { error });
            return output;
        }

        let message = match self
            .reassembler
            .push(&frame.payload, frame.control.is_fragment())
        {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(
                    buffered = self.reassembler.buffered_len(),
                    "buffered inbound fragment"
                );
                return output;
            }
            Err(error) => {
                warn!(%error, "dropping inbound fragment");
                output.events.push(SessionEvent::FrameDropped { error });
                return output;
            }
        };

        self.dispatch(frame.frame_type, frame.subtype, &message, &mut output);
        output
    }

    fn dispatch(
        &mut self,
        frame_type: FrameType,
        subtype: u8,
        message: &[u8],
        output: &mut SessionOutput,
    ) {
        let event = match (frame_type, subtype) {
            (FrameType::Control, control::ACK) => match message.first() {
                Some(&acked) => Ok(SessionEvent::Ack(acked)),
                None => Err(ProtocolError::MalformedFrame("empty ack".to_string())),
            },
            (FrameType::Data, data::NEGOTIATION) => {
                self.complete_negotiation(message, output);
                return;
            }
            (FrameType::Data, data::WIFI_LIST) => Ok(SessionEvent::WifiList(WifiList::parse(message))),
            (FrameType::Data, data::ERROR) => {
                DeviceErrorCode::parse(message).map(SessionEvent::DeviceError)
            }
            (FrameType::Data, data::WIFI_STATUS_REPORT) => {
                DeviceInfo::parse(message).map(SessionEvent::DeviceInfo)
            }
            (FrameType::Data, data::VERSION) => Version::parse(message).map(SessionEvent::Version),
            (FrameType::Data, data::CUSTOM_DATA) => Ok(SessionEvent::CustomData(message.to_vec())),
            _ => Ok(SessionEvent::UnhandledFrame {
                frame_type,
                subtype,
            }),
        };

        match event {
            Ok(event) => output.events.push(event),
            Err(error) => {
                warn!(%error, subtype, "undecodable device message");
                output.events.push(SessionEvent::FrameDropped { error });
            }
        }
    }

    /// Sets the device Wi-Fi operating mode.
    pub fn set_opmode(&mut self, mode: OpMode) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::SET_OPMODE, &[mode.as_byte()])
    }

    /// Sends the station SSID.
    pub fn set_station_ssid(&mut self, ssid: &str) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Data, data::STA_SSID, ssid.as_bytes())
    }

    /// Sends the station passphrase.
    pub fn set_station_password(&mut self, password: &str) -> Result<Vec<Vec<u8>>> {
        if !self.is_secured() {
            warn!("sending station password over an unsecured session");
        }
        self.command(FrameType::Data, data::STA_PASSWORD, password.as_bytes())
    }

    /// Asks the device to connect its station interface.
    pub fn connect_to_ap(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::CONNECT_WIFI, &[])
    }

    /// Configures station mode with the given credentials and connects.
    pub fn set_station(&mut self, ssid: &str, password: &str) -> Result<Vec<Vec<u8>>> {
        let mut frames = self.set_opmode(OpMode::Station)?;
        frames.extend(self.set_station_ssid(ssid)?);
        frames.extend(self.set_station_password(password)?);
        frames.extend(self.connect_to_ap()?);
        Ok(frames)
    }

    /// Asks the device to disconnect its station interface.
    pub fn disconnect_from_ap(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::DISCONNECT_WIFI, &[])
    }

    /// Requests a Wi-Fi status report.
    pub fn trigger_device_info(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::GET_WIFI_STATUS, &[])
    }

    /// Requests a Wi-Fi scan list.
    pub fn trigger_wifi_list(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::GET_WIFI_LIST, &[])
    }

    /// Requests the firmware protocol version.
    pub fn request_version(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::GET_VERSION, &[])
    }

    /// Asks the device to drop the BLE link.
    pub fn disconnect_ble(&mut self) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Control, control::DISCONNECT_BLE, &[])
    }

    /// Sends application-defined data, fragmenting it if needed.
    pub fn send_custom_data(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.command(FrameType::Data, data::CUSTOM_DATA, payload)
    }

    fn command(
        &mut self,
        frame_type: FrameType,
        subtype: u8,
        message: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let security = self.policy_for(frame_type);
        if message.len() <= MAX_PAYLOAD_SIZE {
            return Ok(vec![self.build_frame(frame_type, subtype, false, security, message)?]);
        }

        let chunks = fragment(message, MAX_PAYLOAD_SIZE - FRAGMENT_PREFIX_SIZE)?;
        let last = chunks.len() - 1;
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.build_frame(frame_type, subtype, index != last, security, chunk))
            .collect()
    }

    fn ack_frame(&mut self, acked: u8) -> Result<Vec<u8>> {
        self.build_frame(
            FrameType::Control,
            control::ACK,
            false,
            FrameSecurity::default(),
            &[acked],
        )
    }

    fn policy_for(&self, frame_type: FrameType) -> FrameSecurity {
        match self.state {
            SessionState::Secured => self.options.security.for_frame(frame_type),
            _ => FrameSecurity {
                checksum: self.options.checksum_before_secured && frame_type == FrameType::Data,
                encrypt: false,
            },
        }
    }

    /// Encodes one outbound frame, consuming a sequence number.
    ///
    /// The checksum covers the plaintext; encryption is applied afterwards
    /// and never covers the trailer.
    fn build_frame(
        &mut self,
        frame_type: FrameType,
        subtype: u8,
        is_fragment: bool,
        security: FrameSecurity,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let cipher = if security.encrypt {
            self.cipher.as_ref()
        } else {
            None
        };
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let control = FrameControl::new()
            .with_encrypted(cipher.is_some())
            .with_checksum(security.checksum)
            .with_fragment(is_fragment);
        let mut frame = Frame::with_control(frame_type, subtype, control, sequence, payload.to_vec());

        if security.checksum {
            frame.checksum = Some(frame.compute_checksum());
        }
        if let Some(cipher) = cipher {
            frame.payload = cipher.encrypt(payload, sequence);
        }

        debug!(
            frame_type = ?frame_type,
            subtype,
            sequence,
            len = payload.len(),
            control = control.as_byte(),
            "blufi frame encoded"
        );
        self.codec.encode(&frame)
    }
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::from_valid_options(SessionOptions::default())
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("has_cipher", &self.cipher.is_some())
            .field("pending_reassembly", &self.reassembler.buffered_len())
            .finish()
    }
}
