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

    src/bitstream_codec/fm.rs

    FM encoding and decoding.
*/

//! In FM every data bit is preceded by a clock bit that is always set, except within address marks,
//! which use the clock pattern 0xC7.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::{interleave, split_cells, DecodedBytes},
};

pub const FM_BYTE_LEN: usize = 16;
pub const FM_DATA_CLOCK: u8 = 0xFF;
pub const FM_MARK_CLOCK: u8 = 0xC7;

/// ID address mark byte.
pub const FM_IDAM: u8 = 0xFE;
/// Data address mark byte.
pub const FM_DAM: u8 = 0xFB;
/// Deleted data address mark byte.
pub const FM_DDAM: u8 = 0xF8;

pub fn encode_byte(byte: u8) -> u16 {
    interleave(byte, FM_DATA_CLOCK)
}

/// Encode an address mark byte with the missing-clock pattern.
pub fn encode_mark_byte(byte: u8) -> u16 {
    interleave(byte, FM_MARK_CLOCK)
}

pub fn encode_into(out: &mut Bitstream, data: &[u8]) {
    for &byte in data {
        out.push_bits(encode_byte(byte) as u64, FM_BYTE_LEN);
    }
}

pub fn encode_mark(out: &mut Bitstream, byte: u8) {
    out.push_bits(encode_mark_byte(byte) as u64, FM_BYTE_LEN);
}

pub fn decode_byte(raw: u16) -> u8 {
    split_cells(raw).0
}

/// Decode `count` bytes starting at the clock bit at `offset`, wrapping around the stream. Bytes
/// with a missing clock bit are reported in `violations`.
pub fn decode_bytes(stream: &Bitstream, offset: usize, count: usize) -> DecodedBytes {
    let len = stream.len();
    if len == 0 {
        return DecodedBytes::default();
    }
    let mut bytes = Vec::with_capacity(count);
    let mut violations = Vec::new();

    for k in 0..count {
        let raw = stream.read_wrapped(offset + k * FM_BYTE_LEN, FM_BYTE_LEN) as u16;
        let (data, clock) = split_cells(raw);
        if clock != FM_DATA_CLOCK {
            violations.push(k);
        }
        bytes.push(data);
    }

    DecodedBytes {
        bytes,
        violations,
        end_offset: (offset + count * FM_BYTE_LEN) % len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_marks() {
        assert_eq!(encode_mark_byte(FM_IDAM), 0xF57E);
        assert_eq!(encode_mark_byte(FM_DAM), 0xF56F);
        assert_eq!(encode_mark_byte(FM_DDAM), 0xF56A);
        assert_eq!(encode_byte(0x00), 0xAAAA);
    }

    #[test]
    fn clock_violation_detected() {
        let mut stream = Bitstream::new();
        encode_into(&mut stream, &[0x12, 0x34]);
        encode_mark(&mut stream, FM_DAM);
        let decoded = decode_bytes(&stream, 0, 3);
        assert_eq!(decoded.bytes, vec![0x12, 0x34, FM_DAM]);
        assert_eq!(decoded.violations, vec![2]);
        assert_eq!(decoded.end_offset, 0);
    }
}
