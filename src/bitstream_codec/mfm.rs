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

    src/bitstream_codec/mfm.rs

    MFM encoding and decoding.
*/

//! In MFM a clock bit is written only between two zero data bits. Demodulation ignores clock bits
//! once the sync match has fixed alignment, but clock bits are still checked against the rule to
//! flag bytes that were likely damaged.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::{interleave, split_cells, DecodedBytes},
};

pub const MFM_BYTE_LEN: usize = 16;
/// A1 with a missing clock bit.
pub const MFM_SYNC_A1: u16 = 0x4489;

/// Encode one byte, given the final data bit of the preceding byte.
pub fn encode_byte(byte: u8, previous_bit: bool) -> u16 {
    let mut clock = 0u8;
    let mut previous = previous_bit;
    for i in (0..8).rev() {
        let bit = (byte >> i) & 1 != 0;
        clock |= ((!previous && !bit) as u8) << i;
        previous = bit;
    }
    interleave(byte, clock)
}

/// Encode `data` onto the end of `out`. The last bit of `out`, if any, is taken as the preceding
/// data bit.
pub fn encode_into(out: &mut Bitstream, data: &[u8]) {
    let mut previous = !out.is_empty() && out.get_wrapped(out.len() - 1);
    for &byte in data {
        out.push_bits(encode_byte(byte, previous) as u64, MFM_BYTE_LEN);
        previous = byte & 1 != 0;
    }
}

/// Append a raw marker word, such as [MFM_SYNC_A1], without encoding.
pub fn encode_marker(out: &mut Bitstream, raw: u16) {
    out.push_bits(raw as u64, MFM_BYTE_LEN);
}

/// Decode a single raw word.
pub fn decode_byte(raw: u16) -> u8 {
    split_cells(raw).0
}

/// Decode `count` bytes starting at the clock bit at `offset`, wrapping around the stream. Bytes
/// whose clock bits violate the MFM rule are reported in `violations`.
pub fn decode_bytes(stream: &Bitstream, offset: usize, count: usize) -> DecodedBytes {
    let len = stream.len();
    if len == 0 {
        return DecodedBytes::default();
    }
    let mut bytes = Vec::with_capacity(count);
    let mut violations = Vec::new();
    // The bit preceding the first clock bit is the last data bit of the previous byte.
    let mut previous = stream.get_wrapped(offset + len - 1);

    for k in 0..count {
        let raw = stream.read_wrapped(offset + k * MFM_BYTE_LEN, MFM_BYTE_LEN) as u16;
        let (data, clock) = split_cells(raw);
        let expected = split_cells(encode_byte(data, previous)).1;
        if clock != expected {
            violations.push(k);
        }
        bytes.push(data);
        previous = data & 1 != 0;
    }

    DecodedBytes {
        bytes,
        violations,
        end_offset: (offset + count * MFM_BYTE_LEN) % len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_bytes() {
        // 0x4E after a zero bit: 0 1 0 0 1 1 1 0
        assert_eq!(encode_byte(0x4E, false), 0x9254);
        assert_eq!(encode_byte(0x00, false), 0xAAAA);
        assert_eq!(encode_byte(0x00, true), 0x2AAA);
        assert_eq!(encode_byte(0xFF, false), 0x5555);
        // A1 normally encodes as 0x44A9; the sync mark drops one clock bit.
        assert_eq!(encode_byte(0xA1, false), 0x44A9);
        assert_eq!(decode_byte(MFM_SYNC_A1), 0xA1);
    }

    #[test]
    fn round_trip_and_violations() {
        let payload = [0x00u8, 0xFE, 0x12, 0x80, 0x01, 0x4E];
        let mut stream = Bitstream::new();
        encode_into(&mut stream, &payload);
        let decoded = decode_bytes(&stream, 0, payload.len());
        assert_eq!(decoded.bytes, payload);
        assert!(decoded.violations.is_empty());

        // Flip a data bit in byte 3: the neighbouring clock bits no longer match.
        stream.set(3 * 16 + 5, !stream.get_wrapped(3 * 16 + 5));
        let decoded = decode_bytes(&stream, 0, payload.len());
        assert_ne!(decoded.bytes[3], payload[3]);
        assert!(decoded.violations.contains(&3));
    }
}
