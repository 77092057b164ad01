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

    src/fusion.rs

    Multi-revolution sector fusion by per-byte plurality voting.
*/

//! Fusion combines several independent reads of the same physical sector, usually taken from
//! different revolutions of a track. Each byte of the region (data followed by the stored check)
//! is decided by plurality vote. Ties go to the value read by the revolution with the highest
//! quality score, then to the earliest read.
//!
//! A byte's agreement is the fraction of reads that voted for the winning value. Bytes whose
//! agreement falls below the weak threshold are flagged weak; a byte read identically by two of
//! three revolutions is not weak, a three-way disagreement always is.
//!
//! If the fused region does not pass its check and only a few bytes are weak, the alternative
//! values actually observed at those positions are tried in combination within a bounded budget.
//! Only values some revolution really read are ever substituted.

use crate::{
    crc,
    types::{enums::CrcAlgorithm, flags::SectorFlags, sector::Sector},
    PipelineError,
};

pub const DEFAULT_WEAK_THRESHOLD: f32 = 0.6;
/// Scale applied to the mean agreement of a fused sector that does not verify.
pub const UNVERIFIED_CONFIDENCE_SCALE: f32 = 0.5;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FusionConfig {
    /// Agreement below which a byte is flagged weak. Valid range is 0.4 to 0.8.
    pub weak_threshold: f32,
    /// Largest number of weak bytes for which a combination search is attempted.
    pub max_combination_bytes: usize,
    /// Maximum number of combinations checked.
    pub max_combinations: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weak_threshold: DEFAULT_WEAK_THRESHOLD,
            max_combination_bytes: 8,
            max_combinations: 256,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.4..=0.8).contains(&self.weak_threshold) {
            return Err(PipelineError::ParameterError(format!(
                "fusion weak threshold {} outside 0.4..=0.8",
                self.weak_threshold
            )));
        }
        Ok(())
    }
}

/// One read of a sector and the quality score of the revolution it came from.
#[derive(Copy, Clone, Debug)]
pub struct SectorRead<'a> {
    pub sector: &'a Sector,
    pub quality: f32,
}

impl<'a> SectorRead<'a> {
    pub fn new(sector: &'a Sector, quality: f32) -> Self {
        Self { sector, quality }
    }
}

/// The outcome of fusing two or more reads.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FusionResult {
    /// The fused sector. Verified sectors have `crc_ok` set.
    pub sector: Sector,
    pub verified: bool,
    /// Region indices (data followed by stored check) flagged weak.
    pub weak_bytes: Vec<usize>,
    /// Agreement of each region byte, 0.0 to 1.0.
    pub byte_confidence: Vec<f32>,
    /// True if the result was found by the weak-byte combination search.
    pub combination_used: bool,
    /// Number of reads that took part in the vote.
    pub reads: usize,
}

/// Tally of the values read at one region position.
#[derive(Clone, Debug, Default)]
struct Ballot {
    /// (value, votes, best quality, first read index), winner first after `rank`.
    entries: Vec<(u8, usize, f32, usize)>,
}

impl Ballot {
    fn vote(&mut self, value: u8, quality: f32, read: usize) {
        match self.entries.iter_mut().find(|e| e.0 == value) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = entry.2.max(quality);
            }
            None => self.entries.push((value, 1, quality, read)),
        }
    }

    fn rank(&mut self) {
        self.entries.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.total_cmp(&a.2))
                .then_with(|| a.3.cmp(&b.3))
        });
    }

    fn winner(&self) -> (u8, usize) {
        self.entries.first().map(|e| (e.0, e.1)).unwrap_or((0, 0))
    }
}

/// Return the most common data length among the reads, preferring the earliest on a tie.
fn consensus_len(reads: &[SectorRead]) -> usize {
    let mut best = (0usize, 0usize);
    for read in reads.iter() {
        let len = read.sector.len();
        let count = reads.iter().filter(|r| r.sector.len() == len).count();
        if count > best.1 {
            best = (len, count);
        }
    }
    best.0
}

/// Fuse two or more reads of one sector. Returns None if fewer than two reads share a common
/// data length and check algorithm.
pub fn fuse(reads: &[SectorRead], config: &FusionConfig) -> Option<FusionResult> {
    if reads.len() < 2 {
        return None;
    }
    let len = consensus_len(reads);
    let algorithm = reads.iter().find(|r| r.sector.len() == len)?.sector.algorithm();
    let reads: Vec<SectorRead> = reads
        .iter()
        .filter(|r| r.sector.len() == len && r.sector.algorithm() == algorithm)
        .copied()
        .collect();
    if reads.len() < 2 {
        log::debug!("fuse(): fewer than two compatible reads of {} bytes", len);
        return None;
    }
    let n = reads.len();
    let regions: Vec<Vec<u8>> = reads.iter().map(|r| r.sector.region()).collect();
    let region_len = regions[0].len();

    let mut ballots = vec![Ballot::default(); region_len];
    for (i, (read, region)) in reads.iter().zip(regions.iter()).enumerate() {
        for (ballot, &value) in ballots.iter_mut().zip(region.iter()) {
            ballot.vote(value, read.quality, i);
        }
    }

    let mut fused_region = Vec::with_capacity(region_len);
    let mut byte_confidence = Vec::with_capacity(region_len);
    let mut weak_bytes = Vec::new();
    for (i, ballot) in ballots.iter_mut().enumerate() {
        ballot.rank();
        let (value, votes) = ballot.winner();
        let agreement = votes as f32 / n as f32;
        fused_region.push(value);
        byte_confidence.push(agreement);
        if agreement < config.weak_threshold {
            weak_bytes.push(i);
        }
    }

    // The best-quality read supplies the sector ID, preamble and flags.
    let base = reads
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.quality.total_cmp(&b.quality).then_with(|| ib.cmp(ia)))
        .map(|(_, r)| r.sector)?;
    let preamble = base.preamble();

    let mut combination_used = false;
    let mut verified = crc::syndrome(algorithm, preamble, &fused_region) == 0;
    if !verified && !weak_bytes.is_empty() {
        if let Some(found) = combination_search(&ballots, &weak_bytes, &fused_region, algorithm, preamble, config) {
            for &i in weak_bytes.iter() {
                let votes = ballots[i].entries.iter().find(|e| e.0 == found[i]).map_or(0, |e| e.1);
                byte_confidence[i] = votes as f32 / n as f32;
            }
            fused_region = found;
            verified = true;
            combination_used = true;
        }
    }

    let mut sector = base.clone();
    sector.set_region(&fused_region).ok()?;
    sector.read_count = reads.iter().map(|r| r.sector.read_count).sum();
    sector.weak_bytes.clear();
    sector.flags.remove(SectorFlags::WEAK | SectorFlags::CORRECTED);
    sector.flags |= SectorFlags::FUSED;
    for &i in weak_bytes.iter() {
        sector.mark_weak(i);
    }
    let check = crc::verify(&mut sector);
    if check.ok != verified {
        log::error!("fuse(): sector {} verification disagrees with fused syndrome", sector.id);
    }

    let mean = byte_confidence.iter().sum::<f32>() / byte_confidence.len().max(1) as f32;
    if check.ok {
        sector.set_confidence(mean);
    }
    else {
        sector.set_confidence(mean * UNVERIFIED_CONFIDENCE_SCALE);
    }

    log::debug!(
        "fuse(): sector {} from {} reads: {} weak bytes, verified: {}{}",
        sector.id,
        n,
        weak_bytes.len(),
        check.ok,
        if combination_used { " (combination search)" } else { "" }
    );

    Some(FusionResult {
        sector,
        verified: check.ok,
        weak_bytes,
        byte_confidence,
        combination_used,
        reads: n,
    })
}

/// Try the alternative values observed at each weak position, odometer style, until a region
/// passes its check or the budget runs out. Checks that cannot localize errors are excluded: with
/// a one byte check, a wrong combination passes too easily.
fn combination_search(
    ballots: &[Ballot],
    weak_bytes: &[usize],
    fused: &[u8],
    algorithm: CrcAlgorithm,
    preamble: &[u8],
    config: &FusionConfig,
) -> Option<Vec<u8>> {
    if !algorithm.can_localize() || weak_bytes.len() > config.max_combination_bytes {
        log::debug!(
            "combination_search(): skipped ({} weak bytes, check {})",
            weak_bytes.len(),
            algorithm
        );
        return None;
    }

    let radix: Vec<usize> = weak_bytes.iter().map(|&i| ballots[i].entries.len()).collect();
    let mut digits = vec![0usize; weak_bytes.len()];
    let mut region = fused.to_vec();
    let mut tried = 0usize;

    loop {
        // Advance the odometer; all-zero digits is the plurality region already checked.
        let mut carry = true;
        for (digit, &base) in digits.iter_mut().zip(radix.iter()) {
            if !carry {
                break;
            }
            *digit += 1;
            carry = *digit >= base;
            if carry {
                *digit = 0;
            }
        }
        if carry {
            log::debug!("combination_search(): exhausted {} combinations", tried);
            return None;
        }
        if tried >= config.max_combinations {
            log::warn!("combination_search(): budget of {} combinations exhausted", config.max_combinations);
            return None;
        }
        tried += 1;

        for (&i, &digit) in weak_bytes.iter().zip(digits.iter()) {
            region[i] = ballots[i].entries[digit].0;
        }
        if crc::syndrome(algorithm, preamble, &region) == 0 {
            log::debug!("combination_search(): found passing combination after {} trials", tried);
            return Some(region);
        }
    }
}
