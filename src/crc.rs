/*
    FluxRecover

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/crc.rs

    CRC and checksum calculation and sector check verification.
*/

//! Sector check algorithms.
//!
//! Two CRC-16 variants are supported, along with the two XOR style checks used by GCR formats and
//! the Amiga trackdisk checksum. The CRC tables are generated at compile time and are immutable
//! process-wide constants. Check values are carried as `u32` so that every algorithm shares one
//! representation; the CRC-16 variants only ever use the low 16 bits.

use crate::types::{enums::CrcAlgorithm, sector::Sector};

const CCITT_POLY: u16 = 0x1021;
const ARC_POLY_REFLECTED: u16 = 0xA001;

/// Both CRC-16 generator polynomials are `(x + 1)` times a primitive degree 15 polynomial, so the
/// syndrome of a single bit error repeats every 32767 bit positions.
pub const CRC16_PERIOD_BITS: usize = 32767;

/// Data bit positions of an Amiga MFM long.
const AMIGA_DATA_MASK: u32 = 0x5555_5555;

const CCITT_TABLE: [u16; 256] = generate_ccitt_table();
const ARC_TABLE: [u16; 256] = generate_arc_table();

const fn generate_ccitt_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ CCITT_POLY } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn generate_arc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ ARC_POLY_REFLECTED } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental check calculator. The state is `Copy`, so a partially-fed hasher can be saved and
/// resumed.
#[derive(Copy, Clone, Debug)]
pub struct CrcHasher {
    algorithm: CrcAlgorithm,
    state: u32,
    count: usize,
}

impl CrcHasher {
    pub fn new(algorithm: CrcAlgorithm) -> Self {
        let state = match algorithm {
            CrcAlgorithm::Crc16CcittFalse => 0xFFFF,
            _ => 0,
        };
        Self {
            algorithm,
            state,
            count: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.update_byte(byte);
        }
    }

    #[inline]
    pub fn update_byte(&mut self, byte: u8) {
        let state = self.state as u16;
        self.state = match self.algorithm {
            CrcAlgorithm::Crc16CcittFalse => ((state << 8) ^ CCITT_TABLE[((state >> 8) as u8 ^ byte) as usize]) as u32,
            CrcAlgorithm::Crc16Arc => ((state >> 8) ^ ARC_TABLE[((state as u8) ^ byte) as usize]) as u32,
            CrcAlgorithm::Xor8 => self.state ^ byte as u32,
            // The last 6-and-2 chain value is the top six bits of the final byte.
            CrcAlgorithm::AppleChain => (byte >> 2) as u32,
            // The checksum is linear in each long, so every byte can be folded in at its position.
            CrcAlgorithm::AmigaXor32 => {
                let v = (byte as u32) << (24 - 8 * (self.count % 4));
                self.state ^ (((v >> 1) ^ v) & AMIGA_DATA_MASK)
            }
        };
        self.count += 1;
    }

    pub fn finalize(&self) -> u32 {
        self.state
    }
}

/// CRC-16/CCITT-FALSE. The check value of "123456789" is 0x29B1.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut hasher = CrcHasher::new(CrcAlgorithm::Crc16CcittFalse);
    hasher.update(data);
    hasher.finalize() as u16
}

/// CRC-16/ARC. The check value of "123456789" is 0xBB3D.
pub fn crc16_arc(data: &[u8]) -> u16 {
    let mut hasher = CrcHasher::new(CrcAlgorithm::Crc16Arc);
    hasher.update(data);
    hasher.finalize() as u16
}

/// Amiga trackdisk checksum of a buffer of whole longs. A trailing partial long is zero padded.
pub fn amiga_checksum(data: &[u8]) -> u32 {
    let mut hasher = CrcHasher::new(CrcAlgorithm::AmigaXor32);
    hasher.update(data);
    hasher.finalize()
}

pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// Compute the check of `algorithm` over a preamble followed by a payload.
pub fn compute(algorithm: CrcAlgorithm, preamble: &[u8], data: &[u8]) -> u32 {
    let mut hasher = CrcHasher::new(algorithm);
    hasher.update(preamble);
    hasher.update(data);
    hasher.finalize()
}

/// Convert a check value into the bytes stored on disk. CCITT and the Amiga checksum are stored
/// big-endian, ARC little-endian, and the single-byte checks as one byte.
pub fn stored_to_bytes(algorithm: CrcAlgorithm, value: u32) -> Vec<u8> {
    match algorithm {
        CrcAlgorithm::Crc16CcittFalse => (value as u16).to_be_bytes().to_vec(),
        CrcAlgorithm::Crc16Arc => (value as u16).to_le_bytes().to_vec(),
        CrcAlgorithm::Xor8 | CrcAlgorithm::AppleChain => vec![value as u8],
        CrcAlgorithm::AmigaXor32 => value.to_be_bytes().to_vec(),
    }
}

/// Convert stored check bytes into a check value. Missing bytes are treated as zero.
pub fn bytes_to_stored(algorithm: CrcAlgorithm, bytes: &[u8]) -> u32 {
    let b = |i: usize| bytes.get(i).copied().unwrap_or(0);
    match algorithm {
        CrcAlgorithm::Crc16CcittFalse => u16::from_be_bytes([b(0), b(1)]) as u32,
        CrcAlgorithm::Crc16Arc => u16::from_le_bytes([b(0), b(1)]) as u32,
        CrcAlgorithm::Xor8 | CrcAlgorithm::AppleChain => b(0) as u32,
        CrcAlgorithm::AmigaXor32 => u32::from_be_bytes([b(0), b(1), b(2), b(3)]),
    }
}

/// Result of a check verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrcCheck {
    pub ok: bool,
    pub calculated: u32,
    pub stored: u32,
}

/// Recompute a sector's check and compare it with the stored value. Sets the sector's
/// `crc_ok` and `crc_calculated` and nothing else; calling this twice on an unmodified sector
/// yields identical results.
pub fn verify(sector: &mut Sector) -> CrcCheck {
    let calculated = compute(sector.algorithm(), sector.preamble(), sector.data());
    let stored = sector.crc_stored();
    let ok = calculated == stored;
    sector.set_check_result(ok, calculated);
    log::trace!(
        "verify(): sector {} {} stored: {:04X} calculated: {:04X} ok: {}",
        sector.id,
        sector.algorithm(),
        stored,
        calculated,
        ok
    );
    CrcCheck { ok, calculated, stored }
}

/// Compute the syndrome of a region (payload followed by stored check bytes): zero if the region
/// verifies, otherwise the difference between calculated and stored check values. Flipping bits of
/// the region changes the syndrome linearly, which the correction stage relies on.
pub fn syndrome(algorithm: CrcAlgorithm, preamble: &[u8], region: &[u8]) -> u32 {
    let stored_len = algorithm.stored_len();
    if region.len() < stored_len {
        return 0;
    }
    let (data, stored) = region.split_at(region.len() - stored_len);
    compute(algorithm, preamble, data) ^ bytes_to_stored(algorithm, stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn reference_vectors() {
        assert_eq!(crc16_ccitt_false(CHECK), 0x29B1);
        assert_eq!(crc16_arc(CHECK), 0xBB3D);
        assert_eq!(xor8(&[0x01, 0x02, 0x04]), 0x07);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut hasher = CrcHasher::new(CrcAlgorithm::Crc16CcittFalse);
        hasher.update(&CHECK[..4]);
        let saved = hasher;
        hasher.update(&CHECK[4..]);
        assert_eq!(hasher.finalize(), 0x29B1);

        let mut resumed = saved;
        resumed.update(&CHECK[4..]);
        assert_eq!(resumed.finalize(), 0x29B1);
    }

    #[test]
    fn ibm_address_mark_crc() {
        // The IDAM CRC register after A1 A1 A1 is the well known 0xCDB4.
        assert_eq!(crc16_ccitt_false(&[0xA1, 0xA1, 0xA1]), 0xCDB4);
    }

    #[test]
    fn stored_byte_order() {
        assert_eq!(stored_to_bytes(CrcAlgorithm::Crc16CcittFalse, 0x1234), vec![0x12, 0x34]);
        assert_eq!(stored_to_bytes(CrcAlgorithm::Crc16Arc, 0x1234), vec![0x34, 0x12]);
        assert_eq!(bytes_to_stored(CrcAlgorithm::Crc16Arc, &[0x34, 0x12]), 0x1234);
        assert_eq!(bytes_to_stored(CrcAlgorithm::Xor8, &[0x5A]), 0x5A);
        assert_eq!(
            stored_to_bytes(CrcAlgorithm::AmigaXor32, 0x1234_5678),
            vec![0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn amiga_checksum_folds_odd_and_even_halves() {
        // 0x80000001: the odd half holds bit 31, the even half bit 0; both land on bit 30 and 0.
        assert_eq!(amiga_checksum(&[0x80, 0x00, 0x00, 0x01]), 0x4000_0001);
        assert_eq!(amiga_checksum(&[0xFF; 4]), 0);
        assert_eq!(amiga_checksum(&[0xAA, 0xAA, 0xAA, 0xAA, 0x55, 0x55, 0x55, 0x55]), 0);
        // Each long contributes independently.
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
        let folded = data
            .chunks(4)
            .map(amiga_checksum)
            .fold(0, |acc, c| acc ^ c);
        assert_eq!(amiga_checksum(&data), folded);
    }

    #[test]
    fn syndrome_is_zero_for_valid_region() {
        for algorithm in [CrcAlgorithm::Crc16CcittFalse, CrcAlgorithm::Crc16Arc] {
            let mut region = CHECK.to_vec();
            region.extend(stored_to_bytes(algorithm, compute(algorithm, &[], CHECK)));
            assert_eq!(syndrome(algorithm, &[], &region), 0);
            region[3] ^= 0x10;
            assert_ne!(syndrome(algorithm, &[], &region), 0);
        }
    }
}
