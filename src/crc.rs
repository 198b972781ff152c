//! DNP3 CRC-16.
//!
//! Polynomial 0x3D65 processed least-significant bit first (reflected
//! constant 0xA6BC), zero initial register, ones' complement of the final
//! register. The CRC is transmitted little-endian after each block it covers.

use ::crc::{Crc, CRC_16_DNP};

/// CRC-16/DNP from the catalogue.
const DNP: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);

/// Compute the DNP3 CRC of `data`.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    DNP.checksum(data)
}

/// Check a block whose last two bytes are its little-endian CRC.
///
/// Blocks shorter than the CRC itself never verify.
#[inline]
pub fn verify(block_with_crc: &[u8]) -> bool {
    match block_with_crc.len().checked_sub(2) {
        Some(split) => {
            let (data, crc) = block_with_crc.split_at(split);
            crc16(data) == u16::from_le_bytes([crc[0], crc[1]])
        }
        None => false,
    }
}
