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

    src/bitstream_codec/mod.rs

    Channel codecs: MFM, FM and GCR modulation tables, encoders and decoders.
*/

//! MFM and FM interleave a clock bit before every data bit, so both share the same demodulation
//! tables: each raw byte holds four clock/data pairs, clock first. The tables are compile-time
//! constants shared by every decoding thread.

pub mod fm;
pub mod gcr;
pub mod mfm;

/// Data bits of a raw clock/data byte (bit positions 6, 4, 2, 0).
pub(crate) const DATA_NIBBLE: [u8; 256] = generate_nibble_table(0);
/// Clock bits of a raw clock/data byte (bit positions 7, 5, 3, 1).
pub(crate) const CLOCK_NIBBLE: [u8; 256] = generate_nibble_table(1);

const fn generate_nibble_table(shift: u32) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let raw = i as u32;
        table[i] = ((((raw >> (6 + shift)) & 1) << 3)
            | (((raw >> (4 + shift)) & 1) << 2)
            | (((raw >> (2 + shift)) & 1) << 1)
            | ((raw >> shift) & 1)) as u8;
        i += 1;
    }
    table
}

/// Split a 16-bit raw clock/data word into its data byte and clock byte.
#[inline]
pub fn split_cells(raw: u16) -> (u8, u8) {
    let hi = (raw >> 8) as usize;
    let lo = (raw & 0xFF) as usize;
    (
        (DATA_NIBBLE[hi] << 4) | DATA_NIBBLE[lo],
        (CLOCK_NIBBLE[hi] << 4) | CLOCK_NIBBLE[lo],
    )
}

/// Interleave a clock byte and a data byte into a 16-bit raw word, clock bit first.
#[inline]
pub fn interleave(data: u8, clock: u8) -> u16 {
    let mut word = 0u16;
    for i in (0..8).rev() {
        word = (word << 2) | ((((clock >> i) & 1) as u16) << 1) | ((data >> i) & 1) as u16;
    }
    word
}

/// Bytes demodulated from a bitstream, with the indices of bytes whose clock bits did not match
/// the encoding rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedBytes {
    pub bytes: Vec<u8>,
    pub violations: Vec<usize>,
    /// Bit offset following the final byte, wrapped to the stream length.
    pub end_offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_interleave_are_inverse() {
        for data in [0x00u8, 0xA1, 0xFE, 0x4E, 0xFF] {
            for clock in [0x00u8, 0x0A, 0xC7, 0xFF] {
                assert_eq!(split_cells(interleave(data, clock)), (data, clock));
            }
        }
        // 0x4489 is A1 with the clock bit between data bits 4 and 5 missing.
        assert_eq!(split_cells(0x4489), (0xA1, 0x0A));
    }
}
