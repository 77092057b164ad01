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

    src/sync/mod.rs

    Sync and address mark search with Hamming distance tolerance.
*/

//! Sync search slides a window across the whole bitstream, treating it as circular, and reports
//! every offset whose Hamming distance to the pattern is within tolerance. Overlapping hits are
//! not merged; the channel decoder disambiguates by attempting a decode at each candidate.

use crate::{bitstream::Bitstream, PipelineError};
use std::fmt::{self, Display, Formatter};

/// A sync pattern of up to 64 bits, stored right-aligned in `bits`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncPattern {
    bits: u64,
    len: u8,
}

impl Display for SyncPattern {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:0width$X}/{}", self.bits, self.len, width = (self.len as usize).div_ceil(4))
    }
}

impl SyncPattern {
    /// MFM A1 with a missing clock bit.
    pub const MFM_A1: SyncPattern = SyncPattern { bits: 0x4489, len: 16 };
    /// Three consecutive MFM A1 sync words, as written before every IBM System 34 address mark.
    pub const MFM_A1_X3: SyncPattern = SyncPattern {
        bits: 0x4489_4489_4489,
        len: 48,
    };
    /// Two MFM A1 sync words, as written before every Amiga trackdisk sector.
    pub const AMIGA_SYNC: SyncPattern = SyncPattern {
        bits: 0x4489_4489,
        len: 32,
    };
    /// FM ID address mark: data 0xFE, clock 0xC7.
    pub const FM_IDAM: SyncPattern = SyncPattern { bits: 0xF57E, len: 16 };
    /// FM data address mark: data 0xFB, clock 0xC7.
    pub const FM_DAM: SyncPattern = SyncPattern { bits: 0xF56F, len: 16 };
    /// FM deleted data address mark: data 0xF8, clock 0xC7.
    pub const FM_DDAM: SyncPattern = SyncPattern { bits: 0xF56A, len: 16 };
    /// The end of a Commodore sync run: ten one bits followed by the leading zero of the first
    /// GCR codeword.
    pub const C1541_SYNC: SyncPattern = SyncPattern { bits: 0x7FE, len: 11 };
    /// Apple address field prologue.
    pub const APPLE_ADDR: SyncPattern = SyncPattern {
        bits: 0xD5AA96,
        len: 24,
    };
    /// Apple data field prologue.
    pub const APPLE_DATA: SyncPattern = SyncPattern {
        bits: 0xD5AAAD,
        len: 24,
    };

    pub fn new(bits: u64, len: u8) -> Result<Self, PipelineError> {
        if len == 0 || len > 64 {
            return Err(PipelineError::InvalidPattern(format!(
                "pattern length {} must be in 1..=64",
                len
            )));
        }
        if len < 64 && bits >> len != 0 {
            return Err(PipelineError::InvalidPattern(format!(
                "pattern {:X} does not fit in {} bits",
                bits, len
            )));
        }
        Ok(Self { bits, len })
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Patterns always have at least one bit.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn mask(&self) -> u64 {
        if self.len >= 64 {
            u64::MAX
        }
        else {
            (1u64 << self.len) - 1
        }
    }

    /// Hamming distance between this pattern and a window of the same width.
    #[inline]
    pub fn distance(&self, window: u64) -> u32 {
        ((window ^ self.bits) & self.mask()).count_ones()
    }
}

/// A located sync candidate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncMatch {
    /// Bit offset of the first bit of the pattern.
    pub offset: usize,
    pub pattern: SyncPattern,
    /// Hamming distance from the ideal pattern; 0 is an exact match.
    pub distance: u32,
}

impl SyncMatch {
    /// Bit offset of the first bit following the pattern, wrapped to the stream length.
    pub fn end(&self, stream_len: usize) -> usize {
        if stream_len == 0 {
            return 0;
        }
        (self.offset + self.pattern.len()) % stream_len
    }
}

/// Search the whole circular stream for `pattern`, returning every offset within `max_distance`
/// ranked by ascending distance, ties broken by earliest offset. A stream shorter than the
/// pattern yields no candidates.
pub fn find_sync(stream: &Bitstream, pattern: SyncPattern, max_distance: u32) -> Vec<SyncMatch> {
    let mut matches = scan(stream, pattern, 0, stream.len(), max_distance);
    matches.sort_by_key(|m| (m.distance, m.offset));
    log::trace!(
        "find_sync(): pattern {} max distance {}: {} candidates",
        pattern,
        max_distance,
        matches.len()
    );
    matches
}

/// Search `window` bit positions starting at `start` (wrapping) and return the best candidate,
/// if any: the lowest distance, ties broken by the candidate closest to `start`.
pub fn find_sync_forward(
    stream: &Bitstream,
    pattern: SyncPattern,
    start: usize,
    window: usize,
    max_distance: u32,
) -> Option<SyncMatch> {
    scan(stream, pattern, start, window.min(stream.len()), max_distance)
        .into_iter()
        .enumerate()
        .min_by_key(|(i, m)| (m.distance, *i))
        .map(|(_, m)| m)
}

/// Slide a shift register over `count` positions beginning at `start`, in search order.
fn scan(stream: &Bitstream, pattern: SyncPattern, start: usize, count: usize, max_distance: u32) -> Vec<SyncMatch> {
    let len = stream.len();
    let width = pattern.len();
    if len < width || width == 0 {
        return Vec::new();
    }

    let mask = pattern.mask();
    let mut matches = Vec::new();
    let mut window = stream.read_wrapped(start, width);

    for i in 0..count {
        let offset = (start + i) % len;
        let distance = pattern.distance(window);
        if distance <= max_distance {
            matches.push(SyncMatch {
                offset,
                pattern,
                distance,
            });
        }
        window = ((window << 1) | stream.get_wrapped(offset + width) as u64) & mask;
    }
    matches
}
