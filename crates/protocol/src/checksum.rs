//! CRC16 frame checksum.
//!
//! CCITT polynomial 0x1021, initial value 0xFFFF, final XOR 0xFFFF,
//! table driven, MSB first. The device firmware computes the checksum over
//! a frame starting at its sequence byte, so [`compute`] always skips the
//! first two bytes of its input: callers pass the whole frame (header and
//! plaintext payload) and the type and frame-control bytes are left out.
//!
//! On the wire the 16-bit result travels little-endian.

/// CCITT polynomial.
const POLYNOMIAL: u16 = 0x1021;

/// Initial register value.
const INIT: u16 = 0xFFFF;

/// Number of leading input bytes that never enter the checksum.
pub const SKIPPED_LEADING_BYTES: usize = 2;

/// Size of the checksum trailer on the wire.
pub const CHECKSUM_SIZE: usize = 2;

const CRC_TABLE: [u16; 256] = generate_table();

const fn generate_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut n = 0;
    while n < 256 {
        let mut crc = (n as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        table[n] = crc;
        n += 1;
    }
    table
}

/// Computes the frame checksum of `data`, skipping its first two bytes.
///
/// Inputs of two bytes or fewer checksum as the empty message (0x0000).
pub fn compute(data: &[u8]) -> u16 {
    let body = data.get(SKIPPED_LEADING_BYTES..).unwrap_or(&[]);
    let mut crc = INIT;
    for &byte in body {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc ^ 0xFFFF
}

/// Serializes a checksum in wire order.
#[inline]
pub fn to_wire(crc: u16) -> [u8; CHECKSUM_SIZE] {
    crc.to_le_bytes()
}

/// Parses a checksum trailer in wire order.
#[inline]
pub fn from_wire(bytes: [u8; CHECKSUM_SIZE]) -> u16 {
    u16::from_le_bytes(bytes)
}
