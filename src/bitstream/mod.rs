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

    src/bitstream/mod.rs

    Packed, circular bitstream type produced by the PLL and consumed by the decoders.
*/

//! A [Bitstream] holds the bit cells recovered from one revolution of a track. A track is a
//! continuous topological ring, so reads beyond the end of the stream wrap around to the
//! beginning. [Bitstream] is implemented as a wrapper around a [BitVec] from the bit_vec crate
//! (not to be confused with the bitvec crate). Bits are ordered MSB-first within each byte, and
//! the length is a count of valid bits independent of byte padding.

use bit_vec::BitVec;
use std::ops::Index;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bitstream {
    bits: BitVec,
}

/// Produce a [Bitstream] from a [BitVec].
impl From<BitVec> for Bitstream {
    fn from(bits: BitVec) -> Bitstream {
        Bitstream { bits }
    }
}

/// Produce a [Bitstream] from a byte slice. The stream will be `bytes.len() * 8` bits long.
impl From<&[u8]> for Bitstream {
    fn from(bytes: &[u8]) -> Bitstream {
        Bitstream {
            bits: BitVec::from_bytes(bytes),
        }
    }
}

impl FromIterator<bool> for Bitstream {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Bitstream {
            bits: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Bitstream {
    type Output = bool;

    /// Index the stream circularly. Panics if the stream is empty.
    fn index(&self, index: usize) -> &bool {
        if self.bits[index % self.bits.len()] {
            &true
        }
        else {
            &false
        }
    }
}

impl Bitstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bits: BitVec::with_capacity(bits),
        }
    }

    /// Create a bitstream from the first `len` bits of a byte slice.
    pub fn from_bytes_len(bytes: &[u8], len: usize) -> Self {
        let mut bits = BitVec::from_bytes(bytes);
        bits.truncate(len);
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Append the lowest `width` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u64, width: usize) {
        for i in (0..width.min(64)).rev() {
            self.bits.push((value >> i) & 1 != 0);
        }
    }

    /// Append whole bytes, MSB-first.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_bits(byte as u64, 8);
        }
    }

    pub fn extend_from(&mut self, other: &Bitstream) {
        self.bits.extend(other.bits.iter());
    }

    /// Return the bit at `index`, or None if out of range. Does not wrap.
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index)
    }

    /// Return the bit at `index` modulo the stream length. An empty stream reads as zeros.
    #[inline]
    pub fn get_wrapped(&self, index: usize) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        self.bits.get(index % self.bits.len()).unwrap_or(false)
    }

    pub fn set(&mut self, index: usize, bit: bool) {
        if index < self.bits.len() {
            self.bits.set(index, bit);
        }
    }

    /// Read `width` (at most 64) bits starting at `start`, wrapping around the end of the stream.
    /// The first bit read becomes the most significant bit of the result.
    pub fn read_wrapped(&self, start: usize, width: usize) -> u64 {
        let mut value = 0u64;
        for i in 0..width.min(64) {
            value = (value << 1) | self.get_wrapped(start + i) as u64;
        }
        value
    }

    /// Read eight bits starting at `start`, wrapping as needed.
    pub fn read_byte_wrapped(&self, start: usize) -> u8 {
        self.read_wrapped(start, 8) as u8
    }

    /// Copy `len` bits starting at `start` into a new stream, wrapping around the end.
    pub fn slice_wrapped(&self, start: usize, len: usize) -> Bitstream {
        (0..len).map(|i| self.get_wrapped(start + i)).collect()
    }

    /// Return a copy of the stream with the bit at `index` removed. Used to simulate bit-slip.
    pub fn without_bit(&self, index: usize) -> Bitstream {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| if i == index { None } else { Some(b) })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter()
    }

    /// Return the stream as bytes. The final byte is zero-padded if the length is not a multiple
    /// of eight.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }

    pub fn as_bitvec(&self) -> &BitVec {
        &self.bits
    }

    /// Count of one bits in the stream.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_msb_first() {
        let stream = Bitstream::from(&[0b1000_0001u8, 0xFF][..]);
        assert_eq!(stream.len(), 16);
        assert_eq!(stream.get(0), Some(true));
        assert_eq!(stream.get(1), Some(false));
        assert_eq!(stream.get(7), Some(true));
        assert_eq!(stream.get(16), None);
    }

    #[test]
    fn wrapped_reads() {
        let stream = Bitstream::from(&[0xF0u8, 0x0F][..]);
        // Start four bits before the end: 1111 then wrap to 1111.
        assert_eq!(stream.read_wrapped(12, 8), 0xFF);
        assert_eq!(stream.read_wrapped(4, 8), 0x00);
        assert!(stream[16]);
        assert_eq!(stream.slice_wrapped(14, 4).read_wrapped(0, 4), 0b1111);
    }

    #[test]
    fn length_independent_of_padding() {
        let stream = Bitstream::from_bytes_len(&[0xAA, 0xC0], 10);
        assert_eq!(stream.len(), 10);
        assert_eq!(stream.to_bytes(), vec![0xAA, 0xC0]);
        assert_eq!(stream.read_wrapped(8, 4), 0b1110);
    }

    #[test]
    fn push_bits_and_remove() {
        let mut stream = Bitstream::new();
        stream.push_bits(0x4489, 16);
        assert_eq!(stream.read_wrapped(0, 16), 0x4489);
        let shorter = stream.without_bit(0);
        assert_eq!(shorter.len(), 15);
        assert_eq!(shorter.read_wrapped(0, 15), 0x4489 & 0x7FFF);
    }

    #[test]
    fn empty_stream_reads_zero() {
        let stream = Bitstream::new();
        assert!(!stream.get_wrapped(5));
        assert_eq!(stream.read_wrapped(0, 16), 0);
    }
}
