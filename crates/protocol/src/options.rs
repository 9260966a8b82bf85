//! Tunables for a [`ProtocolSession`](crate::session::ProtocolSession).

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::framing::{FRAGMENT_PREFIX_SIZE, MAX_PAYLOAD_SIZE};
use crate::messages::SecurityMode;

/// Default negotiation chunk size in bytes.
pub const DEFAULT_NEGOTIATION_CHUNK_SIZE: usize = 80;

/// Default cap on a reassembled inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// Engine options, usually loaded as the `[session]` table of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Largest slice of the negotiation payload carried by one frame.
    pub negotiation_chunk_size: usize,

    /// Largest inbound message accepted by reassembly.
    pub max_message_size: usize,

    /// Append CRC16 to data frames sent before the key is established.
    pub checksum_before_secured: bool,

    /// Frame protection announced and applied once secured.
    pub security: SecurityMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            negotiation_chunk_size: DEFAULT_NEGOTIATION_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            checksum_before_secured: true,
            security: SecurityMode::default(),
        }
    }
}

impl SessionOptions {
    /// Validate the option values.
    pub fn validate(&self) -> Result<()> {
        let max_chunk = MAX_PAYLOAD_SIZE - FRAGMENT_PREFIX_SIZE;
        if self.negotiation_chunk_size == 0 || self.negotiation_chunk_size > max_chunk {
            return Err(ProtocolError::InvalidOptions(format!(
                "negotiation_chunk_size must be between 1 and {}, got {}",
                max_chunk, self.negotiation_chunk_size
            )));
        }

        if self.max_message_size < MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidOptions(format!(
                "max_message_size must be at least {}, got {}",
                MAX_PAYLOAD_SIZE, self.max_message_size
            )));
        }

        Ok(())
    }
}
