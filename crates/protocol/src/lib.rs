//! # BluFi Protocol Library
//!
//! Controller side of the BluFi Wi-Fi provisioning protocol spoken by
//! ESP32-class devices over a BLE GATT characteristic pair.
//!
//! ## Overview
//!
//! The crate is a transport-agnostic engine. It turns provisioning
//! commands into encoded frames and inbound frames into typed events; the
//! caller moves the bytes.
//!
//! - **Frame Codec**: 4-byte header, optional CRC16 trailer, fragmentation
//! - **Key Agreement**: 1024-bit Diffie-Hellman, MD5-derived session key
//! - **Stream Cipher**: AES-128-CFB with a per-frame sequence IV
//! - **Session**: the per-connection state machine tying it all together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Commands / SessionEvent            │  messages
//! ├─────────────────────────────────────────┤
//! │        Reassembly / Fragments           │  framing
//! ├─────────────────────────────────────────┤
//! │   AES-128-CFB  │  CRC16 over plaintext  │  cipher, checksum
//! ├─────────────────────────────────────────┤
//! │            Frame header                 │  framing
//! ├─────────────────────────────────────────┤
//! │        Transport (BLE GATT)             │  caller
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use blufi_protocol::{ProtocolSession, SessionEvent, SessionState};
//!
//! let mut session = ProtocolSession::default();
//!
//! // Frames to write to the device, in order.
//! let frames = session.start_negotiation().unwrap();
//! assert!(frames.len() > 1);
//! assert_eq!(session.state(), SessionState::Negotiating);
//!
//! // Feed every notification from the device back in.
//! let output = session.handle_inbound(&[0x41, 0x04, 0x00, 0x02, 0x01, 0x02]);
//! for event in output.events {
//!     if let SessionEvent::Version(version) = event {
//!         println!("firmware protocol {}.{}", version.major, version.minor);
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame codec, fragmentation and reassembly
//! - [`checksum`]: CRC16 trailer
//! - [`negotiation`]: Diffie-Hellman key agreement
//! - [`cipher`]: Payload encryption
//! - [`messages`]: Device replies and session events
//! - [`options`]: Session tunables
//! - [`session`]: Protocol state machine
//! - [`error`]: Error types

pub mod checksum;
pub mod cipher;
pub mod error;
pub mod framing;
pub mod messages;
pub mod negotiation;
pub mod options;
pub mod session;

pub use cipher::StreamCipher;
pub use error::{ProtocolError, Result};
pub use framing::{
    fragment, Frame, FrameCodec, FrameControl, FrameType, Reassembler, FRAGMENT_PREFIX_SIZE,
    FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use messages::{
    DeviceErrorCode, DeviceInfo, FrameSecurity, OpMode, SecurityMode, SessionEvent, Version,
    WifiList, WifiNetwork,
};
pub use negotiation::{KeyAgreement, NegotiationParams, SessionKey};
pub use options::SessionOptions;
pub use session::{ProtocolSession, SessionOutput, SessionState};
