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

    src/correction.rs

    Bit-error correction guided by CRC redundancy.
*/

//! When a sector fails its check, a CRC-16 can often locate and repair one or two flipped bits.
//!
//! CRC-16 is linear over GF(2): flipping bit `i` of a region changes the region's syndrome
//! (calculated check XOR stored check) by a fixed value `D(i)` that depends only on the bit's
//! distance from the end of the data. Trying a flip is therefore a table comparison instead of a
//! full CRC recomputation. `D(i)` repeats with the polynomial's period of
//! [CRC16_PERIOD_BITS](crate::crc::CRC16_PERIOD_BITS), so in regions longer than that a single-bit
//! syndrome matches more than one position and is reported as ambiguous rather than guessed.
//! Single-bit flips are searched exhaustively. Double-bit flips are searched
//! only within a bounded window around bytes already marked as weak by the channel decoder, under
//! a trial and wall-clock budget, since an unbounded search is quadratic and increasingly likely to
//! find a false match.

use crate::{
    crc,
    types::{enums::CrcAlgorithm, flags::SectorFlags, sector::Sector},
};
use std::{
    fmt::{self, Display, Formatter},
    time::{Duration, Instant},
};

/// Confidence lost for every bit flipped by a successful correction.
pub const CONFIDENCE_PENALTY_PER_BIT: f32 = 0.05;
/// How often the double-bit search checks its time limit, in trials.
const TIME_CHECK_INTERVAL: u64 = 4096;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrectionConfig {
    /// Maximum number of bits to flip: 0 disables correction, 1 searches single bits only.
    pub max_bits: u8,
    /// Maximum number of double-bit combinations to try.
    pub max_trials: u64,
    /// Wall-clock limit for the double-bit search.
    pub time_limit: Option<Duration>,
    /// Largest byte span searched for double-bit errors.
    pub window_bytes: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_bits: 2,
            max_trials: 1_000_000,
            time_limit: Some(Duration::from_millis(250)),
            window_bytes: 16,
        }
    }
}

impl CorrectionConfig {
    /// Single-bit correction only. Used for sector headers, whose short length makes a double-bit
    /// match meaningless.
    pub fn single_bit() -> Self {
        Self {
            max_bits: 1,
            ..Default::default()
        }
    }

    /// A larger window and budget for forensic recovery.
    pub fn paranoid() -> Self {
        Self {
            max_bits: 2,
            max_trials: 8_000_000,
            time_limit: Some(Duration::from_secs(2)),
            window_bytes: 32,
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_bits: 0,
            ..Default::default()
        }
    }
}

/// The result of a correction attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrectionOutcome {
    /// The region already passed its check; nothing was changed.
    AlreadyValid,
    /// The listed region bits (MSB-first, data followed by stored check) were flipped.
    Corrected { flipped: Vec<usize> },
    /// The search completed without finding a passing combination.
    NotFound { trials: u64 },
    /// The double-bit search was aborted by its trial or time budget.
    BudgetExhausted { trials: u64 },
    /// More than one flip or combination of flips passes; the region was left unchanged.
    Ambiguous { trials: u64 },
    /// The check algorithm cannot localize errors.
    Unsupported,
}

impl Display for CorrectionOutcome {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CorrectionOutcome::AlreadyValid => write!(f, "already valid"),
            CorrectionOutcome::Corrected { flipped } => write!(f, "corrected {} bit(s) at {:?}", flipped.len(), flipped),
            CorrectionOutcome::NotFound { trials } => write!(f, "no correction found after {} trials", trials),
            CorrectionOutcome::BudgetExhausted { trials } => write!(f, "budget exhausted after {} trials", trials),
            CorrectionOutcome::Ambiguous { trials } => write!(f, "ambiguous match after {} trials", trials),
            CorrectionOutcome::Unsupported => write!(f, "check cannot localize errors"),
        }
    }
}

impl CorrectionOutcome {
    pub fn is_corrected(&self) -> bool {
        matches!(self, CorrectionOutcome::Corrected { .. })
    }

    pub fn bits_flipped(&self) -> usize {
        match self {
            CorrectionOutcome::Corrected { flipped } => flipped.len(),
            _ => 0,
        }
    }
}

/// Compute the syndrome change caused by flipping each bit of a region of `region_len` bytes
/// (data followed by the stored check).
fn syndrome_deltas(algorithm: CrcAlgorithm, region_len: usize) -> Vec<u32> {
    let stored_len = algorithm.stored_len();
    let data_bits = region_len.saturating_sub(stored_len) * 8;

    // Register difference after a single one bit followed by `z` zero bits, indexed by z.
    let mut by_distance = Vec::with_capacity(data_bits);
    let (mut reg, reflected) = match algorithm {
        CrcAlgorithm::Crc16Arc => (0xA001u16, true),
        _ => (0x1021u16, false),
    };
    for _ in 0..data_bits {
        by_distance.push(reg);
        reg = if reflected {
            if reg & 1 != 0 { (reg >> 1) ^ 0xA001 } else { reg >> 1 }
        }
        else if reg & 0x8000 != 0 {
            (reg << 1) ^ 0x1021
        }
        else {
            reg << 1
        };
    }

    let mut deltas = Vec::with_capacity(region_len * 8);
    for g in 0..data_bits {
        // Reflected CRCs consume each byte least significant bit first.
        let processed = if reflected { (g / 8) * 8 + (7 - g % 8) } else { g };
        deltas.push(by_distance[data_bits - 1 - processed] as u32);
    }
    for g in 0..stored_len * 8 {
        let mut stored = vec![0u8; stored_len];
        stored[g / 8] = 0x80 >> (g % 8);
        deltas.push(crc::bytes_to_stored(algorithm, &stored));
    }
    deltas
}

/// Choose the data byte range for the double-bit search: the `window_bytes` span covering the most
/// weak bytes, starting one byte before the first weak byte it covers. Empty if there are no weak
/// markers.
fn double_bit_window(data_len: usize, weak: &[usize], window_bytes: usize) -> std::ops::Range<usize> {
    let mut weak: Vec<usize> = weak.iter().copied().filter(|&w| w < data_len).collect();
    if weak.is_empty() || window_bytes == 0 {
        return 0..0;
    }
    weak.sort_unstable();
    weak.dedup();

    let mut best = (0usize, 0usize);
    for (i, &w) in weak.iter().enumerate() {
        let lo = w.saturating_sub(1);
        let covered = weak[i..].iter().take_while(|&&x| x < lo + window_bytes).count();
        if covered > best.0 {
            best = (covered, lo);
        }
    }
    let lo = best.1;
    lo..(lo + window_bytes).min(data_len)
}

fn flip(region: &mut [u8], bit: usize) {
    region[bit / 8] ^= 0x80 >> (bit % 8);
}

/// Attempt to repair `region` (data followed by stored check bytes) in place so that it verifies
/// against `algorithm` with the given preamble. `weak` lists data byte indices marked as
/// uncertain, which bound the double-bit search.
pub fn correct_buffer(
    algorithm: CrcAlgorithm,
    preamble: &[u8],
    region: &mut [u8],
    weak: &[usize],
    config: &CorrectionConfig,
) -> CorrectionOutcome {
    if !algorithm.can_localize() {
        return CorrectionOutcome::Unsupported;
    }
    let stored_len = algorithm.stored_len();
    if region.len() <= stored_len {
        return CorrectionOutcome::NotFound { trials: 0 };
    }
    let syndrome = crc::syndrome(algorithm, preamble, region);
    if syndrome == 0 {
        return CorrectionOutcome::AlreadyValid;
    }
    if config.max_bits == 0 {
        return CorrectionOutcome::NotFound { trials: 0 };
    }

    let deltas = syndrome_deltas(algorithm, region.len());
    let mut trials = 0u64;

    let matches: Vec<usize> = deltas
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == syndrome)
        .map(|(bit, _)| bit)
        .collect();
    trials += deltas.len() as u64;
    match matches.as_slice() {
        [] => {}
        [bit] => {
            flip(region, *bit);
            log::debug!("correct_buffer(): single bit error at bit {} after {} trials", bit, trials);
            return CorrectionOutcome::Corrected { flipped: vec![*bit] };
        }
        _ => {
            log::debug!(
                "correct_buffer(): single bit syndrome matches {} positions {:?}",
                matches.len(),
                matches
            );
            return CorrectionOutcome::Ambiguous { trials };
        }
    }

    if config.max_bits < 2 {
        return CorrectionOutcome::NotFound { trials };
    }

    let data_len = region.len() - stored_len;
    let window = double_bit_window(data_len, weak, config.window_bytes);
    if window.is_empty() {
        log::debug!("correct_buffer(): no weak markers to bound a double bit search");
        return CorrectionOutcome::NotFound { trials };
    }

    let bits: Vec<usize> = (window.start * 8..window.end * 8).collect();
    let started = Instant::now();
    let mut pair_trials = 0u64;
    let mut found: Option<(usize, usize)> = None;

    // The whole window is scanned: a second passing pair makes the match meaningless.
    for (i, &a) in bits.iter().enumerate() {
        for &b in &bits[i + 1..] {
            if pair_trials >= config.max_trials {
                log::warn!("correct_buffer(): trial budget of {} exhausted", config.max_trials);
                return CorrectionOutcome::BudgetExhausted {
                    trials: trials + pair_trials,
                };
            }
            if pair_trials % TIME_CHECK_INTERVAL == 0 {
                if let Some(limit) = config.time_limit {
                    if started.elapsed() > limit {
                        log::warn!("correct_buffer(): time limit of {:?} exhausted", limit);
                        return CorrectionOutcome::BudgetExhausted {
                            trials: trials + pair_trials,
                        };
                    }
                }
            }
            pair_trials += 1;
            if deltas[a] ^ deltas[b] == syndrome {
                if found.is_some() {
                    log::debug!("correct_buffer(): second double bit match at bits {}, {}", a, b);
                    return CorrectionOutcome::Ambiguous {
                        trials: trials + pair_trials,
                    };
                }
                found = Some((a, b));
            }
        }
    }

    if let Some((a, b)) = found {
        flip(region, a);
        flip(region, b);
        log::debug!(
            "correct_buffer(): double bit error at bits {}, {} after {} trials",
            a,
            b,
            trials + pair_trials
        );
        return CorrectionOutcome::Corrected { flipped: vec![a, b] };
    }

    CorrectionOutcome::NotFound {
        trials: trials + pair_trials,
    }
}

/// Attempt to correct a sector that failed its check. On success the sector is re-verified,
/// flagged as corrected, has its read count incremented and its confidence lowered in proportion
/// to the number of bits flipped. Any other outcome leaves the sector untouched.
pub fn correct_sector(sector: &mut Sector, config: &CorrectionConfig) -> CorrectionOutcome {
    let mut region = sector.region();
    let outcome = correct_buffer(
        sector.algorithm(),
        sector.preamble(),
        &mut region,
        &sector.weak_bytes,
        config,
    );

    if let CorrectionOutcome::Corrected { flipped } = &outcome {
        let mut candidate = sector.clone();
        for &bit in flipped {
            candidate.flip_bit(bit);
        }
        let check = crc::verify(&mut candidate);
        if !check.ok {
            log::error!(
                "correct_sector(): sector {} failed verification after correction",
                sector.id
            );
            return CorrectionOutcome::NotFound { trials: 0 };
        }
        candidate.read_count += 1;
        candidate.flags |= SectorFlags::CORRECTED;
        candidate.set_confidence(1.0 - CONFIDENCE_PENALTY_PER_BIT * flipped.len() as f32);
        *sector = candidate;
    }
    outcome
}
