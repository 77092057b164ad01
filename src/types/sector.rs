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

    src/types/sector.rs

    Defines the Sector structure, the unit of data produced by the channel decoders.
*/

use crate::{
    crc,
    types::{chs::DiskChsn, enums::CrcAlgorithm, flags::SectorFlags},
    PipelineError,
    MAXIMUM_SECTOR_SIZE,
};

/// The highest confidence an unverified sector may carry.
pub const MAX_UNVERIFIED_CONFIDENCE: f32 = 0.99;

/// A decoded sector.
///
/// The check state (`crc_ok`, `crc_calculated`) and the confidence score are private so that a
/// sector can never claim to be verified after its payload has changed. Any mutation of the data
/// or stored check clears the verified state; [crc::verify] is the only way to set it again.
///
/// The checked region of a sector is its preamble (bytes covered by the check that are not part
/// of the payload, such as the MFM `A1 A1 A1 FB` address mark) followed by its data. The stored
/// check follows the data on disk and is addressable by [Sector::flip_bit] as the tail of the
/// "region" (data plus stored check bytes).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sector {
    pub id: DiskChsn,
    pub flags: SectorFlags,
    /// Indices into the data buffer of bytes marked as uncertain.
    pub weak_bytes: Vec<usize>,
    pub read_count: u32,
    /// Bit offset of the header sync match this sector was decoded from.
    pub bit_offset: usize,
    /// Hamming distance of the header sync match.
    pub sync_distance: u32,
    algorithm: CrcAlgorithm,
    preamble: Vec<u8>,
    data: Vec<u8>,
    crc_stored: u32,
    crc_calculated: u32,
    crc_ok: bool,
    confidence: f32,
}

impl Sector {
    /// Create a new, unverified sector. The data buffer may not be empty or exceed
    /// [MAXIMUM_SECTOR_SIZE].
    pub fn new(
        id: DiskChsn,
        algorithm: CrcAlgorithm,
        preamble: Vec<u8>,
        data: Vec<u8>,
        crc_stored: u32,
    ) -> Result<Self, PipelineError> {
        Self::check_len(&data)?;
        Ok(Self {
            id,
            flags: SectorFlags::empty(),
            weak_bytes: Vec::new(),
            read_count: 1,
            bit_offset: 0,
            sync_distance: 0,
            algorithm,
            preamble,
            data,
            crc_stored,
            crc_calculated: 0,
            crc_ok: false,
            confidence: 0.0,
        })
    }

    fn check_len(data: &[u8]) -> Result<(), PipelineError> {
        if data.is_empty() {
            Err(PipelineError::EmptyBuffer)
        }
        else if data.len() > MAXIMUM_SECTOR_SIZE {
            Err(PipelineError::BufferTooLarge(data.len()))
        }
        else {
            Ok(())
        }
    }

    pub fn algorithm(&self) -> CrcAlgorithm {
        self.algorithm
    }
    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    /// A sector always holds at least one byte; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn crc_stored(&self) -> u32 {
        self.crc_stored
    }
    pub fn crc_calculated(&self) -> u32 {
        self.crc_calculated
    }
    pub fn crc_ok(&self) -> bool {
        self.crc_ok
    }
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(SectorFlags::DELETED)
    }
    pub fn is_weak(&self) -> bool {
        self.flags.contains(SectorFlags::WEAK) || !self.weak_bytes.is_empty()
    }
    /// Returns true if consumers should not treat the payload as authoritative.
    pub fn is_suspect(&self) -> bool {
        !self.crc_ok
    }

    /// Set the confidence score, clamped to `0.0..=1.0`. An unverified sector is additionally
    /// held below 1.0.
    pub fn set_confidence(&mut self, confidence: f32) {
        let mut confidence = confidence.clamp(0.0, 1.0);
        if !self.crc_ok {
            confidence = confidence.min(MAX_UNVERIFIED_CONFIDENCE);
        }
        self.confidence = confidence;
    }

    /// Replace the data buffer. The sector becomes unverified.
    pub fn set_data(&mut self, data: Vec<u8>) -> Result<(), PipelineError> {
        Self::check_len(&data)?;
        self.data = data;
        self.invalidate();
        Ok(())
    }

    /// Replace the stored check value. The sector becomes unverified.
    pub fn set_crc_stored(&mut self, crc_stored: u32) {
        self.crc_stored = crc_stored;
        self.invalidate();
    }

    /// Return the stored check as it appears on disk.
    pub fn stored_bytes(&self) -> Vec<u8> {
        crc::stored_to_bytes(self.algorithm, self.crc_stored)
    }

    /// Return the data followed by the on-disk stored check bytes.
    pub fn region(&self) -> Vec<u8> {
        let mut region = self.data.clone();
        region.extend(self.stored_bytes());
        region
    }

    /// Number of bits addressable by [Sector::flip_bit].
    pub fn region_bits(&self) -> usize {
        (self.data.len() + self.algorithm.stored_len()) * 8
    }

    /// Replace the data and stored check from a region buffer as produced by [Sector::region].
    pub fn set_region(&mut self, region: &[u8]) -> Result<(), PipelineError> {
        let stored_len = self.algorithm.stored_len();
        if region.len() <= stored_len {
            return Err(PipelineError::EmptyBuffer);
        }
        let (data, stored) = region.split_at(region.len() - stored_len);
        Self::check_len(data)?;
        self.data = data.to_vec();
        self.crc_stored = crc::bytes_to_stored(self.algorithm, stored);
        self.invalidate();
        Ok(())
    }

    /// Flip one bit of the region (data followed by stored check bytes), numbering bits MSB-first.
    /// Returns false if the bit is out of range. The sector becomes unverified.
    pub fn flip_bit(&mut self, bit: usize) -> bool {
        let byte = bit / 8;
        let mask = 0x80u8 >> (bit % 8);
        if byte < self.data.len() {
            self.data[byte] ^= mask;
        }
        else if bit < self.region_bits() {
            let mut stored = self.stored_bytes();
            stored[byte - self.data.len()] ^= mask;
            self.crc_stored = crc::bytes_to_stored(self.algorithm, &stored);
        }
        else {
            return false;
        }
        self.invalidate();
        true
    }

    /// Mark a data byte as weak. Indices outside the data buffer are ignored.
    pub fn mark_weak(&mut self, index: usize) {
        if index < self.data.len() && !self.weak_bytes.contains(&index) {
            self.weak_bytes.push(index);
            self.weak_bytes.sort_unstable();
            self.flags |= SectorFlags::WEAK;
        }
    }

    pub(crate) fn set_check_result(&mut self, ok: bool, calculated: u32) {
        self.crc_ok = ok;
        self.crc_calculated = calculated;
        if !ok {
            self.confidence = self.confidence.min(MAX_UNVERIFIED_CONFIDENCE);
        }
    }

    fn invalidate(&mut self) {
        self.crc_ok = false;
        self.confidence = self.confidence.min(MAX_UNVERIFIED_CONFIDENCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector() -> Sector {
        Sector::new(
            DiskChsn::new(0, 0, 1, 0),
            CrcAlgorithm::Crc16CcittFalse,
            vec![0xA1, 0xA1, 0xA1, 0xFB],
            vec![0x55; 128],
            0x1234,
        )
        .unwrap()
    }

    #[test]
    fn empty_sector_is_rejected() {
        let result = Sector::new(
            DiskChsn::default(),
            CrcAlgorithm::Crc16CcittFalse,
            Vec::new(),
            Vec::new(),
            0,
        );
        assert_eq!(result, Err(PipelineError::EmptyBuffer));
    }

    #[test]
    fn unverified_confidence_is_below_one() {
        let mut sector = sector();
        sector.set_confidence(1.0);
        assert!(!sector.crc_ok());
        assert!(sector.confidence() < 1.0);
    }

    #[test]
    fn flip_bit_reaches_stored_check() {
        let mut sector = sector();
        // The first stored byte is the high byte for CCITT.
        assert!(sector.flip_bit(128 * 8));
        assert_eq!(sector.crc_stored(), 0x1234 ^ 0x8000);
        assert!(sector.flip_bit(128 * 8 + 15));
        assert_eq!(sector.crc_stored(), 0x1234 ^ 0x8001);
        assert!(!sector.flip_bit(130 * 8));
    }

    #[test]
    fn region_round_trip() {
        let mut sector = sector();
        let mut region = sector.region();
        region[0] = 0xAA;
        sector.set_region(&region).unwrap();
        assert_eq!(sector.data()[0], 0xAA);
        assert_eq!(sector.crc_stored(), 0x1234);
    }
}
