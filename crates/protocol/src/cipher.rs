//! AES-128-CFB stream encryption of frame payloads.
//!
//! Each frame is encrypted independently with a 16-byte IV whose first byte
//! is the frame sequence number and whose remaining bytes are zero. Output
//! length always equals input length.
//!
//! The IV only carries 8 bits of sequence, so keystreams repeat every 256
//! frames under one key. The device firmware derives the IV the same way and
//! both ends must agree.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};

use crate::negotiation::{SessionKey, SESSION_KEY_LENGTH};

type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<aes::Aes128>;

/// AES block and IV size.
pub const IV_LENGTH: usize = 16;

/// Builds the per-frame IV for `sequence`.
#[inline]
pub fn iv_for_sequence(sequence: u8) -> [u8; IV_LENGTH] {
    let mut iv = [0u8; IV_LENGTH];
    iv[0] = sequence;
    iv
}

/// Payload cipher keyed by a negotiated [`SessionKey`].
#[derive(Clone)]
pub struct StreamCipher {
    key: [u8; SESSION_KEY_LENGTH],
}

impl StreamCipher {
    /// Creates a cipher for the given session key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            key: *key.as_bytes(),
        }
    }

    /// Encrypts `plaintext` for the frame carrying `sequence`.
    pub fn encrypt(&self, plaintext: &[u8], sequence: u8) -> Vec<u8> {
        let iv = iv_for_sequence(sequence);
        let mut buffer = plaintext.to_vec();
        Aes128CfbEnc::new(&self.key.into(), &iv.into()).encrypt(&mut buffer);
        buffer
    }

    /// Decrypts `ciphertext` from the frame carrying `sequence`.
    pub fn decrypt(&self, ciphertext: &[u8], sequence: u8) -> Vec<u8> {
        let iv = iv_for_sequence(sequence);
        let mut buffer = ciphertext.to_vec();
        Aes128CfbDec::new(&self.key.into(), &iv.into()).decrypt(&mut buffer);
        buffer
    }
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> StreamCipher {
        StreamCipher::new(&SessionKey::from_bytes([0x2B; SESSION_KEY_LENGTH]))
    }

    #[test]
    fn test_iv_derivation() {
        let iv = iv_for_sequence(0xA7);
        assert_eq!(iv[0], 0xA7);
        assert!(iv[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        let cipher = test_cipher();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 100, 255] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            for seq in [0u8, 1, 128, 255] {
                let ciphertext = cipher.encrypt(&plaintext, seq);
                assert_eq!(ciphertext.len(), plaintext.len());
                assert_eq!(cipher.decrypt(&ciphertext, seq), plaintext);
            }
        }
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let cipher = test_cipher();
        let plaintext = b"my-home-network";
        assert_ne!(cipher.encrypt(plaintext, 3), plaintext.to_vec());
    }

    #[test]
    fn test_sequence_changes_keystream() {
        let cipher = test_cipher();
        let plaintext = [0u8; 20];
        assert_ne!(cipher.encrypt(&plaintext, 1), cipher.encrypt(&plaintext, 2));
    }

    #[test]
    fn test_same_sequence_reuses_keystream() {
        let cipher = test_cipher();
        let a = cipher.encrypt(&[0u8; 16], 9);
        let b = cipher.encrypt(&[0u8; 16], 9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_sequence_does_not_decrypt() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt(b"password123", 4);
        assert_ne!(cipher.decrypt(&ciphertext, 5), b"password123".to_vec());
    }

    #[test]
    fn test_first_block_matches_raw_aes() {
        // The first CFB block is plaintext XOR AES_k(IV).
        use aes::cipher::{BlockEncrypt, KeyInit};

        let key = [0x2Bu8; SESSION_KEY_LENGTH];
        let aes = aes::Aes128::new(&key.into());
        let mut block = iv_for_sequence(6).into();
        aes.encrypt_block(&mut block);

        let plaintext = [0x11u8; 16];
        let expected: Vec<u8> = plaintext.iter().zip(block.iter()).map(|(p, k)| p ^ k).collect();
        assert_eq!(test_cipher().encrypt(&plaintext, 6), expected);
    }

    #[test]
    fn test_debug_redacts_key() {
        assert!(format!("{:?}", test_cipher()).contains("REDACTED"));
    }
}
