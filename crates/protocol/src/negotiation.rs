//! Diffie-Hellman key agreement for the BluFi security negotiation.
//!
//! The controller generates a fresh 1024-bit private exponent per negotiation
//! attempt, sends the group parameters and its public value to the device,
//! and derives the AES session key as the MD5 digest of the shared secret.
//!
//! ## Negotiation payload
//! ```text
//! 0x01 | len(P) u16 BE | P | len(G) u16 BE | G | len(pub) u16 BE | pub
//! ```
//! All integers are minimal big-endian byte strings. The payload is usually
//! larger than one frame and is chunked by the session.

use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{ProtocolError, Result};

/// Leading marker of the negotiation data payload.
pub const NEGOTIATION_DATA_MARKER: u8 = 0x01;

/// Leading marker of the negotiation length announcement.
pub const NEGOTIATION_LENGTH_MARKER: u8 = 0x00;

/// Size of the derived session key in bytes.
pub const SESSION_KEY_LENGTH: usize = 16;

/// Width of the private exponent in bits.
pub const PRIVATE_EXPONENT_BITS: usize = 1024;

/// The fixed 1024-bit group prime shared with the device firmware.
const DH_P: [u8; 128] = [
    0xcf, 0x5c, 0xf5, 0xc3, 0x84, 0x19, 0xa7, 0x24, 0x95, 0x7f, 0xf5, 0xdd,
    0x32, 0x3b, 0x9c, 0x45, 0xc3, 0xcd, 0xd2, 0x61, 0xeb, 0x74, 0x0f, 0x69,
    0xaa, 0x94, 0xb8, 0xbb, 0x1a, 0x5c, 0x96, 0x40, 0x91, 0x53, 0xbd, 0x76,
    0xb2, 0x42, 0x22, 0xd0, 0x32, 0x74, 0xe4, 0x72, 0x5a, 0x54, 0x06, 0x09,
    0x2e, 0x9e, 0x82, 0xe9, 0x13, 0x5c, 0x64, 0x3c, 0xae, 0x98, 0x13, 0x2b,
    0x0d, 0x95, 0xf7, 0xd6, 0x53, 0x47, 0xc6, 0x8a, 0xfc, 0x1e, 0x67, 0x7d,
    0xa9, 0x0e, 0x51, 0xbb, 0xab, 0x5f, 0x5c, 0xf4, 0x29, 0xc2, 0x91, 0xb4,
    0xba, 0x39, 0xc6, 0xb2, 0xdc, 0x5e, 0x8c, 0x72, 0x31, 0xe4, 0x6a, 0xa7,
    0x72, 0x8e, 0x87, 0x66, 0x45, 0x32, 0xcd, 0xf5, 0x47, 0xbe, 0x20, 0xc9,
    0xa3, 0xfa, 0x83, 0x42, 0xbe, 0x6e, 0x34, 0x37, 0x1a, 0x27, 0xc0, 0x6f,
    0x7d, 0xc0, 0xed, 0xdd, 0xd2, 0xf8, 0x63, 0x73,
];

/// The fixed group generator.
const DH_G: u32 = 2;

/// Returns the fixed group prime.
pub fn group_prime() -> BigUint {
    BigUint::from_bytes_be(&DH_P)
}

/// Returns the fixed group generator.
pub fn group_generator() -> BigUint {
    BigUint::from(DH_G)
}

/// A symmetric session key derived from a completed negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LENGTH]);

impl SessionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// One side of a Diffie-Hellman exchange over the fixed BluFi group.
///
/// The private exponent never leaves this struct; only the group parameters
/// and the public value are serialized.
#[derive(Clone)]
pub struct KeyAgreement {
    prime: BigUint,
    generator: BigUint,
    private_exponent: BigUint,
    public_value: BigUint,
}

impl KeyAgreement {
    /// Generates a fresh key pair using the operating system RNG.
    ///
    /// The private exponent has exactly [`PRIVATE_EXPONENT_BITS`] bits.
    /// Fails only if the RNG is unavailable, in which case the caller cannot
    /// proceed securely.
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; PRIVATE_EXPONENT_BITS / 8];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| ProtocolError::KeyAgreement(format!("random source unavailable: {}", e)))?;
        secret[0] |= 0x80;
        Ok(Self::from_private_exponent(&secret))
    }

    /// Builds a key pair from a known big-endian private exponent.
    pub fn from_private_exponent(secret: &[u8]) -> Self {
        let prime = group_prime();
        let generator = group_generator();
        let private_exponent = BigUint::from_bytes_be(secret);
        let public_value = generator.modpow(&private_exponent, &prime);

        Self {
            prime,
            generator,
            private_exponent,
            public_value,
        }
    }

    /// Returns the group prime.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// Returns the group generator.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Returns the local public value.
    pub fn public_value(&self) -> &BigUint {
        &self.public_value
    }

    /// Returns the local public value as a minimal big-endian byte string.
    pub fn public_value_bytes(&self) -> Vec<u8> {
        self.public_value.to_bytes_be()
    }

    /// Serializes the negotiation data payload sent to the device.
    pub fn negotiation_payload(&self) -> Vec<u8> {
        let p = self.prime.to_bytes_be();
        let g = self.generator.to_bytes_be();
        let public = self.public_value.to_bytes_be();

        let mut payload = Vec::with_capacity(1 + 6 + p.len() + g.len() + public.len());
        payload.push(NEGOTIATION_DATA_MARKER);
        for field in [&p, &g, &public] {
            payload.extend_from_slice(&(field.len() as u16).to_be_bytes());
            payload.extend_from_slice(field);
        }
        payload
    }

    /// Derives the session key from the peer's big-endian public value.
    ///
    /// The key is the MD5 digest of `peer ^ private mod P`, serialized as a
    /// minimal big-endian byte string.
    pub fn derive_key(&self, peer_public: &[u8]) -> Result<SessionKey> {
        let peer = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);

        if peer <= one || peer >= &self.prime - &one {
            return Err(ProtocolError::InvalidPublicKey(format!(
                "peer public value of {} bytes is outside (1, P-1)",
                peer_public.len()
            )));
        }

        let shared = peer.modpow(&self.private_exponent, &self.prime).to_bytes_be();
        let digest = Md5::digest(&shared);

        let mut key = [0u8; SESSION_KEY_LENGTH];
        key.copy_from_slice(&digest);
        Ok(SessionKey(key))
    }
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("public_value", &hex::encode(self.public_value.to_bytes_be()))
            .field("private_exponent", &"[REDACTED]")
            .finish()
    }
}

/// Group parameters and public value carried by a negotiation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationParams {
    /// Group prime.
    pub prime: BigUint,
    /// Group generator.
    pub generator: BigUint,
    /// Sender's public value.
    pub public_value: BigUint,
}

impl NegotiationParams {
    /// Parses a payload produced by [`KeyAgreement::negotiation_payload`].
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (&marker, mut rest) = payload
            .split_first()
            .ok_or_else(|| ProtocolError::MalformedFrame("empty negotiation payload".to_string()))?;

        if marker != NEGOTIATION_DATA_MARKER {
            return Err(ProtocolError::MalformedFrame(format!(
                "unexpected negotiation marker {:#04x}",
                marker
            )));
        }

        let mut fields = [BigUint::default(), BigUint::default(), BigUint::default()];
        for field in fields.iter_mut() {
            let (value, remaining) = take_length_prefixed(rest)?;
            *field = BigUint::from_bytes_be(value);
            rest = remaining;
        }

        if !rest.is_empty() {
            return Err(ProtocolError::MalformedFrame(format!(
                "{} trailing bytes after negotiation payload",
                rest.len()
            )));
        }

        let [prime, generator, public_value] = fields;
        Ok(Self {
            prime,
            generator,
            public_value,
        })
    }
}

fn take_length_prefixed(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < 2 {
        return Err(ProtocolError::MalformedFrame(
            "truncated negotiation field length".to_string(),
        ));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let body = &data[2..];
    if body.len() < len {
        return Err(ProtocolError::MalformedFrame(format!(
            "negotiation field declares {} bytes, {} available",
            len,
            body.len()
        )));
    }
    Ok(body.split_at(len))
}

/// Builds the length announcement that precedes the negotiation data.
pub fn negotiation_length_payload(total: u16) -> Vec<u8> {
    let [hi, lo] = total.to_be_bytes();
    vec![NEGOTIATION_LENGTH_MARKER, hi, lo]
}
