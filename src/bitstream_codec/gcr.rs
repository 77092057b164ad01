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

    src/bitstream_codec/gcr.rs

    GCR codeword tables, Apple 6-and-2 helpers, and the Viterbi alignment decoder.
*/

//! GCR codes are not self-synchronizing: a single dropped or doubled bit shifts every following
//! codeword boundary. [GcrViterbi] recovers from such slips with a dynamic programming search over
//! a small set of boundary drift states, scoring each path by how many of the codewords it reads
//! are legal.

use crate::{bitstream::Bitstream, types::enums::TrackEncoding, PipelineError};

/// Marker for an illegal codeword in the decode tables.
pub const INVALID: u8 = 0xFF;

/// Commodore 4-to-5 GCR codewords, indexed by nibble.
#[rustfmt::skip]
pub const C1541_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17,
    0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];
/// Commodore 5-bit codeword to nibble, [INVALID] for illegal codewords.
pub const C1541_DECODE: [u8; 32] = generate_c1541_decode();

/// Apple 6-and-2 disk bytes, indexed by 6-bit value.
#[rustfmt::skip]
pub const APPLE_ENCODE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6,
    0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC,
    0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE,
    0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6,
    0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];
/// Apple disk byte to 6-bit value, [INVALID] for illegal disk bytes.
pub const APPLE_DECODE: [u8; 256] = generate_apple_decode();

/// Number of 6-bit values in an Apple 6-and-2 data field, excluding the checksum.
pub const APPLE_62_VALUES: usize = 342;
/// Number of auxiliary (low bit) values in an Apple 6-and-2 data field.
pub const APPLE_62_AUX: usize = 86;
pub const APPLE_SECTOR_SIZE: usize = 256;

const fn generate_c1541_decode() -> [u8; 32] {
    let mut table = [INVALID; 32];
    let mut i = 0;
    while i < 16 {
        table[C1541_ENCODE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const fn generate_apple_decode() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 64 {
        table[APPLE_ENCODE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// The GCR code in use.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GcrVariant {
    /// 5-bit codewords carrying 4 data bits.
    Commodore,
    /// 8-bit disk bytes carrying 6 data bits.
    Apple,
}

impl GcrVariant {
    pub fn from_encoding(encoding: TrackEncoding) -> Option<GcrVariant> {
        match encoding {
            TrackEncoding::GcrCommodore => Some(GcrVariant::Commodore),
            TrackEncoding::GcrApple => Some(GcrVariant::Apple),
            _ => None,
        }
    }

    /// Width of one codeword in bits.
    pub fn symbol_bits(&self) -> usize {
        match self {
            GcrVariant::Commodore => 5,
            GcrVariant::Apple => 8,
        }
    }

    /// Decode a raw codeword, or None if it is not a legal codeword.
    #[inline]
    pub fn decode_symbol(&self, raw: u64) -> Option<u8> {
        let value = match self {
            GcrVariant::Commodore => C1541_DECODE[(raw & 0x1F) as usize],
            GcrVariant::Apple => APPLE_DECODE[(raw & 0xFF) as usize],
        };
        (value != INVALID).then_some(value)
    }
}

/// Encode bytes as Commodore GCR, two codewords per byte, high nibble first.
pub fn c1541_encode_into(out: &mut Bitstream, data: &[u8]) {
    for &byte in data {
        out.push_bits(C1541_ENCODE[(byte >> 4) as usize] as u64, 5);
        out.push_bits(C1541_ENCODE[(byte & 0x0F) as usize] as u64, 5);
    }
}

/// Pack decoded Commodore nibbles into bytes, high nibble first. A trailing odd nibble is ignored.
pub fn c1541_nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
    nibbles.chunks_exact(2).map(|p| (p[0] << 4) | (p[1] & 0x0F)).collect()
}

/// Encode a byte in Apple 4-and-4 form as the (odd, even) disk byte pair.
pub fn apple_encode_44(value: u8) -> [u8; 2] {
    [(value >> 1) | 0xAA, value | 0xAA]
}

pub fn apple_decode_44(odd: u8, even: u8) -> u8 {
    ((odd << 1) | 1) & even
}

/// Returns true if a disk byte is a legal 4-and-4 byte.
pub fn is_apple_44(byte: u8) -> bool {
    byte & 0xAA == 0xAA
}

#[inline]
fn swap2(bits: u8) -> u8 {
    ((bits & 1) << 1) | ((bits >> 1) & 1)
}

/// Split a 256-byte sector into the 342 6-bit values written to disk: the 86 auxiliary values
/// holding bit-swapped low bit pairs (in reverse order), followed by the high six bits of every
/// byte.
pub fn apple_62_values(data: &[u8; APPLE_SECTOR_SIZE]) -> [u8; APPLE_62_VALUES] {
    let mut aux = [0u8; APPLE_62_AUX];
    for (i, a) in aux.iter_mut().enumerate() {
        for (j, shift) in [(i, 0), (i + APPLE_62_AUX, 2), (i + 2 * APPLE_62_AUX, 4)] {
            if j < APPLE_SECTOR_SIZE {
                *a |= swap2(data[j] & 0x03) << shift;
            }
        }
    }
    let mut values = [0u8; APPLE_62_VALUES];
    for k in 0..APPLE_62_AUX {
        values[k] = aux[APPLE_62_AUX - 1 - k];
    }
    for (i, &byte) in data.iter().enumerate() {
        values[APPLE_62_AUX + i] = byte >> 2;
    }
    values
}

/// Encode a sector as the 343 disk bytes of an Apple 6-and-2 data field: each value XORed with its
/// predecessor, followed by the final value as checksum.
pub fn apple_62_encode(data: &[u8; APPLE_SECTOR_SIZE]) -> Vec<u8> {
    let values = apple_62_values(data);
    let mut out = Vec::with_capacity(APPLE_62_VALUES + 1);
    let mut previous = 0u8;
    for &v in values.iter() {
        out.push(APPLE_ENCODE[(v ^ previous) as usize]);
        previous = v;
    }
    out.push(APPLE_ENCODE[previous as usize]);
    out
}

/// Decode 343 6-bit symbols (342 chained values plus checksum) into a sector and the stored
/// checksum value. Returns None if fewer than 343 symbols are supplied.
pub fn apple_62_decode(symbols: &[u8]) -> Option<([u8; APPLE_SECTOR_SIZE], u8)> {
    if symbols.len() < APPLE_62_VALUES + 1 {
        return None;
    }
    let mut values = [0u8; APPLE_62_VALUES];
    let mut acc = 0u8;
    for (k, v) in values.iter_mut().enumerate() {
        acc ^= symbols[k] & 0x3F;
        *v = acc;
    }
    let mut data = [0u8; APPLE_SECTOR_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        let aux = values[APPLE_62_AUX - 1 - (i % APPLE_62_AUX)];
        let low = swap2((aux >> (2 * (i / APPLE_62_AUX))) & 0x03);
        *byte = (values[APPLE_62_AUX + i] << 2) | low;
    }
    Some((data, symbols[APPLE_62_VALUES] & 0x3F))
}

/// Return the sector byte indices whose bits are carried by symbol `index` of a 6-and-2 field.
pub fn apple_62_symbol_bytes(index: usize) -> Vec<usize> {
    if index < APPLE_62_AUX {
        let i = APPLE_62_AUX - 1 - index;
        [i, i + APPLE_62_AUX, i + 2 * APPLE_62_AUX]
            .into_iter()
            .filter(|&j| j < APPLE_SECTOR_SIZE)
            .collect()
    }
    else if index < APPLE_62_VALUES {
        vec![index - APPLE_62_AUX]
    }
    else {
        Vec::new()
    }
}

/// Largest supported [ViterbiConfig::max_drift]. Trellis backpointers are stored as bytes.
pub const MAX_DRIFT: u8 = 8;

/// Parameters for [GcrViterbi].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViterbiConfig {
    /// Largest codeword boundary drift, in bits, in either direction.
    pub max_drift: u8,
    /// Cost of reading an illegal codeword.
    pub illegal_penalty: u32,
    /// Cost of each bit of drift change between consecutive codewords.
    pub slip_penalty: u32,
    /// Minimum fraction of legal codewords on the best path for the decode to be accepted.
    pub min_score: f32,
}

impl Default for ViterbiConfig {
    fn default() -> Self {
        Self {
            max_drift: 3,
            illegal_penalty: 16,
            slip_penalty: 4,
            min_score: 0.75,
        }
    }
}

impl ViterbiConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_drift > MAX_DRIFT {
            return Err(PipelineError::ParameterError(format!(
                "Viterbi drift of {} bits exceeds the maximum of {}",
                self.max_drift, MAX_DRIFT
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(PipelineError::ParameterError(format!(
                "Viterbi minimum score {} must be within 0.0..=1.0",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// The most probable codeword sequence found by [GcrViterbi].
#[derive(Clone, Debug, PartialEq)]
pub struct GcrDecodeResult {
    /// Decoded codeword values; illegal codewords decode as zero.
    pub symbols: Vec<u8>,
    /// Indices of codewords that were illegal on the best path.
    pub illegal: Vec<usize>,
    /// Total drift change along the best path, in bits.
    pub slips: u32,
    /// Fraction of legal codewords on the best path.
    pub score: f32,
    /// Bit offset following the final codeword, wrapped to the stream length.
    pub end_offset: usize,
}

/// Viterbi-style codeword boundary aligner.
///
/// The trellis state is the drift `d` of codeword boundaries from their nominal position: codeword
/// `k` is read at `start + k * width + d`. Moving between states costs `slip_penalty` per bit of
/// drift and may change `d` by at most one per codeword. Reading an illegal codeword costs
/// `illegal_penalty`. The cheapest path is recovered by backtracking from the best final state.
/// Ties prefer the predecessor nearest the nominal alignment, so a path only drifts once legal
/// codewords stop agreeing with the nominal boundary.
#[derive(Clone, Debug)]
pub struct GcrViterbi {
    variant: GcrVariant,
    config: ViterbiConfig,
}

impl GcrViterbi {
    pub fn new(variant: GcrVariant, config: ViterbiConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { variant, config })
    }

    pub fn variant(&self) -> GcrVariant {
        self.variant
    }

    /// Decode `count` codewords starting at bit `start`. Returns None if the best path falls below
    /// the configured minimum score; the region is then undecodable.
    pub fn decode(&self, stream: &Bitstream, start: usize, count: usize) -> Option<GcrDecodeResult> {
        if count == 0 || stream.is_empty() {
            return None;
        }
        let width = self.variant.symbol_bits();
        let max_drift = self.config.max_drift as i64;
        let states = (2 * max_drift + 1) as usize;
        let len = stream.len() as i64;
        let slip = self.config.slip_penalty as u64;

        let read = |k: usize, state: usize| -> u64 {
            let d = state as i64 - max_drift;
            let pos = (start as i64 + (k * width) as i64 + d).rem_euclid(len) as usize;
            stream.read_wrapped(pos, width)
        };
        let branch = |raw: u64| -> u64 {
            match self.variant.decode_symbol(raw) {
                Some(_) => 0,
                None => self.config.illegal_penalty as u64,
            }
        };
        let drift = |state: usize| (state as i64 - max_drift).unsigned_abs();

        let mut cost: Vec<u64> = (0..states).map(|s| slip * drift(s) + branch(read(0, s))).collect();
        let mut backpointers: Vec<Vec<u8>> = Vec::with_capacity(count.saturating_sub(1));

        for k in 1..count {
            let mut next = vec![u64::MAX; states];
            let mut bp = vec![0u8; states];
            for s in 0..states {
                let mut best: Option<(u64, u64, bool, usize)> = None;
                for p in [s.checked_sub(1), Some(s), Some(s + 1)].into_iter().flatten() {
                    if p >= states {
                        continue;
                    }
                    let key = (cost[p] + slip * (p as i64 - s as i64).unsigned_abs(), drift(p), p != s, p);
                    if best.map_or(true, |b| (key.0, key.1, key.2) < (b.0, b.1, b.2)) {
                        best = Some(key);
                    }
                }
                if let Some((c, _, _, p)) = best {
                    next[s] = c + branch(read(k, s));
                    bp[s] = p as u8;
                }
            }
            cost = next;
            backpointers.push(bp);
        }

        let mut state = (0..states).min_by_key(|&s| (cost[s], drift(s)))?;
        let mut path = vec![0usize; count];
        path[count - 1] = state;
        for k in (1..count).rev() {
            state = backpointers[k - 1][state] as usize;
            path[k - 1] = state;
        }

        let mut symbols = Vec::with_capacity(count);
        let mut illegal = Vec::new();
        for (k, &s) in path.iter().enumerate() {
            match self.variant.decode_symbol(read(k, s)) {
                Some(v) => symbols.push(v),
                None => {
                    symbols.push(0);
                    illegal.push(k);
                }
            }
        }
        let slips = path
            .windows(2)
            .map(|w| (w[1] as i64 - w[0] as i64).unsigned_abs() as u32)
            .sum::<u32>()
            + drift(path[0]) as u32;
        let score = 1.0 - (illegal.len() as f32 / count as f32);
        let end_offset = (start as i64 + (count * width) as i64 + path[count - 1] as i64 - max_drift)
            .rem_euclid(len) as usize;

        if score < self.config.min_score {
            log::debug!(
                "GcrViterbi::decode(): best path score {:.3} below threshold {:.3} ({} illegal of {})",
                score,
                self.config.min_score,
                illegal.len(),
                count
            );
            return None;
        }
        if slips > 0 {
            log::trace!(
                "GcrViterbi::decode(): realigned {} bits of drift over {} codewords",
                slips,
                count
            );
        }

        Some(GcrDecodeResult {
            symbols,
            illegal,
            slips,
            score,
            end_offset,
        })
    }
}
