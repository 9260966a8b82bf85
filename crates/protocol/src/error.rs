//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // Frame errors
    /// Inbound buffer is too short or its declared length does not fit.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// CRC16 trailer does not match the frame contents.
    #[error("checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    ChecksumMismatch {
        /// Checksum computed locally.
        expected: u16,
        /// Checksum carried by the frame.
        got: u16,
    },

    /// Payload does not fit the frame length field or the reassembly limit.
    #[error("payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Key agreement could not be set up (no randomness available).
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    /// Peer public value is unusable.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // Session errors
    /// Operation is not valid in the current session state.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// The session state at the time.
        state: &'static str,
    },

    /// Session options failed validation.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl ProtocolError {
    /// Returns whether this error leaves the cipher state unusable.
    ///
    /// Such errors force the session back to idle; every other error only
    /// drops the offending frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Encryption(_) | ProtocolError::Decryption(_) | ProtocolError::KeyAgreement(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_frame_display() {
        let err = ProtocolError::MalformedFrame("need 5 bytes, have 3".to_string());
        assert_eq!(err.to_string(), "malformed frame: need 5 bytes, have 3");
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xBEEF,
            got: 0x0012,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xbeef, got 0x0012"
        );
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge { size: 300, max: 255 };
        assert_eq!(
            err.to_string(),
            "payload too large: 300 bytes exceeds maximum of 255 bytes"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = ProtocolError::InvalidState {
            operation: "complete negotiation",
            state: "idle",
        };
        assert_eq!(
            err.to_string(),
            "invalid state: cannot complete negotiation while idle"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::Decryption("no key".into()).is_fatal());
        assert!(ProtocolError::Encryption("bad key".into()).is_fatal());
        assert!(ProtocolError::KeyAgreement("no entropy".into()).is_fatal());
        assert!(!ProtocolError::MalformedFrame("short".into()).is_fatal());
        assert!(!ProtocolError::ChecksumMismatch { expected: 1, got: 2 }.is_fatal());
        assert!(!ProtocolError::InvalidPublicKey("zero".into()).is_fatal());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<()> {
            Ok(())
        }
        assert!(returns_result().is_ok());
    }
}
