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

    src/types/chs.rs

    Cylinder-Head and Cylinder-Head-Sector-Size addressing.
*/

//! The `chs` module defines structures for Cylinder-Head (CH) track addressing and the
//! four-component sector ID (CHSN) found in sector headers.

use crate::{PipelineError, MAXIMUM_SECTOR_SIZE, MAXIMUM_SIZE_CODE};
use std::fmt::Display;

/// A structure representing the four components of a sector ID:
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
///  - Sector Size (n)
///
/// GCR schemas do not store a head or size code in their headers; for those, `h` is the physical
/// head the track was read from and `n` is the size code implied by the fixed 256-byte payload.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskChsn {
    c: u16,
    h: u8,
    s: u8,
    n: u8,
}

impl Display for DiskChsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3} n:{}]", self.c, self.h, self.s, self.n)
    }
}

impl DiskChsn {
    /// Create a new DiskChsn structure from the four sector ID components.
    pub fn new(c: u16, h: u8, s: u8, n: u8) -> Self {
        Self { c, h, s, n }
    }

    /// Create a new DiskChsn, rejecting size codes larger than [MAXIMUM_SIZE_CODE].
    pub fn new_checked(c: u16, h: u8, s: u8, n: u8) -> Result<Self, PipelineError> {
        if n > MAXIMUM_SIZE_CODE {
            return Err(PipelineError::InvalidSizeCode(n));
        }
        Ok(Self { c, h, s, n })
    }

    /// Return the cylinder (c) field.
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the sector id (s) field.
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Return the size (n) field.
    pub fn n(&self) -> u8 {
        self.n
    }
    /// Return the size of the 'n' parameter in bytes.
    /// The formula for calculating size from n is (128 * 2^n)
    /// We enforce a maximum size of 8192 bytes for a single sector.
    pub fn n_size(&self) -> usize {
        Self::n_to_bytes(self.n)
    }
    /// Convert a size code into a byte length, clamped to [MAXIMUM_SECTOR_SIZE].
    pub fn n_to_bytes(n: u8) -> usize {
        std::cmp::min(MAXIMUM_SECTOR_SIZE, 128usize.overflowing_shl(n as u32).0)
    }
    /// Convert a byte length into a size code, if the length is a valid IBM sector size.
    pub fn bytes_to_n(size: usize) -> Option<u8> {
        (0..=MAXIMUM_SIZE_CODE).find(|&n| Self::n_to_bytes(n) == size)
    }
    /// Return the cylinder and head components as a [DiskCh].
    pub fn ch(&self) -> DiskCh {
        DiskCh::new(self.c, self.h)
    }
}

/// A structure representing a cylinder and head address, identifying a single track.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{}]", self.c, self.h)
    }
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl DiskCh {
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_codes() {
        assert_eq!(DiskChsn::n_to_bytes(0), 128);
        assert_eq!(DiskChsn::n_to_bytes(2), 512);
        assert_eq!(DiskChsn::n_to_bytes(6), 8192);
        // Out of range codes clamp rather than overflow.
        assert_eq!(DiskChsn::n_to_bytes(7), MAXIMUM_SECTOR_SIZE);
        assert_eq!(DiskChsn::n_to_bytes(200), MAXIMUM_SECTOR_SIZE);
        assert_eq!(DiskChsn::bytes_to_n(1024), Some(3));
        assert_eq!(DiskChsn::bytes_to_n(1000), None);
    }

    #[test]
    fn checked_rejects_large_size_code() {
        assert!(DiskChsn::new_checked(0, 0, 1, 6).is_ok());
        assert_eq!(
            DiskChsn::new_checked(0, 0, 1, 7),
            Err(PipelineError::InvalidSizeCode(7))
        );
    }
}
