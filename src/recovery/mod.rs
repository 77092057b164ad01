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

    src/recovery/mod.rs

    The recovery orchestrator: drives sectors through the pipeline state machine.
*/

//! A [Recovery] drives one sector at a time through the following state machine:
//!
//! ```text
//! PLL_DECODE -> SYNC_SEARCH -> CHANNEL_DECODE -> CRC_CHECK
//!     pass: VERIFIED
//!     fail: CORRECTION -> CRC_CHECK'
//!         pass: VERIFIED
//!         fail: FUSION (two or more reads) -> CRC_CHECK''
//!             pass: VERIFIED
//!             fail: EXHAUSTED
//! ```
//!
//! If the first three stages produce no read of the requested sector, the PLL is re-run with a
//! perturbed profile up to `max_retries` times. Every path reaches `VERIFIED` or `EXHAUSTED`
//! within a bounded number of stages. Each stage visited is recorded in the [RecoveryResult].
//!
//! Whole-track recovery first discovers the sector IDs present, with the same perturbed retries.
//! Each sector then resumes from the profile that found the IDs, so its stage trail matches that
//! of a single sector recovery.

mod config;
mod result;

pub use config::{RecoveryConfig, DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT};
pub use result::{RecoveryMethod, RecoveryResult, StageRecord, TrackRecovery};

use crate::{
    bitstream::Bitstream,
    correction::{self, CorrectionOutcome},
    crc,
    flux::{
        pll::{Pll, PllProfile},
        FluxSample,
    },
    fusion::{self, SectorRead},
    parallel::par_map,
    track_schema::TrackSchemaTrait,
    types::{chs::DiskCh, enums::RecoveryStage, sector::Sector, track::Track},
    PipelineError,
};
use std::collections::BTreeSet;

/// Scale applied to the clean-byte fraction of an unverified best-effort read.
const UNVERIFIED_READ_SCALE: f32 = 0.5;

/// One revolution decoded with one PLL profile.
#[derive(Clone, Debug)]
struct RevolutionDecode {
    revolution: usize,
    bits: Bitstream,
    dropped: u32,
    quality: f32,
    final_cell_ns: u32,
    headers: usize,
    best_distance: Option<u32>,
    /// One sector per ID, ascending.
    sectors: Vec<Sector>,
}

/// Revolutions decoded with the first PLL profile that found any sector on the track.
#[derive(Clone, Debug)]
struct Discovery {
    attempt: u32,
    decodes: Vec<RevolutionDecode>,
    /// Stages of every attempt, the successful one last.
    stages: Vec<StageRecord>,
    /// Number of leading stages that belong to attempts which found no sector.
    failed: usize,
}

/// A read of the requested sector from one revolution.
#[derive(Clone, Debug)]
struct Candidate {
    sector: Sector,
    quality: f32,
    revolution: usize,
}

/// The flux recovery pipeline.
#[derive(Clone, Debug)]
pub struct Recovery {
    config: RecoveryConfig,
}

impl Recovery {
    pub fn new(config: RecoveryConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recover one sector, identified by its sector ID, from one or more revolutions of a track.
    /// This never fails: an unrecoverable sector is reported as such, with every stage attempted.
    pub fn recover_sector(&self, ch: DiskCh, revolutions: &[FluxSample], sector_id: u8) -> RecoveryResult {
        self.recover_with(ch, revolutions, sector_id, None)
    }

    /// Decode the revolutions with the base profile and then its perturbations until any sector
    /// is found.
    fn discover(&self, ch: DiskCh, revolutions: &[FluxSample]) -> Discovery {
        let mut stages = Vec::new();
        let mut attempt = 0;
        loop {
            let profile = self.config.profile.perturbed(attempt);
            let decodes = self.decode_revolutions(ch, revolutions, &profile);
            let failed = stages.len();
            let headers = Self::record_decode(attempt, &profile, &decodes, &mut stages);
            let found: BTreeSet<u8> = decodes.iter().flat_map(|d| d.sectors.iter().map(|s| s.id.s())).collect();

            if !found.is_empty() {
                stages.push(StageRecord::new(
                    RecoveryStage::ChannelDecode,
                    true,
                    format!("{} sector IDs found", found.len()),
                ));
                return Discovery {
                    attempt,
                    decodes,
                    stages,
                    failed,
                };
            }
            if let Some(headers) = headers.filter(|&h| h > 0) {
                stages.push(StageRecord::new(
                    RecoveryStage::ChannelDecode,
                    false,
                    format!("no sectors decoded from {} sync candidates", headers),
                ));
            }
            // No profile change can produce bits from a capture without transitions.
            if headers.is_none() || attempt >= self.config.max_retries {
                log::debug!(
                    "Recovery::discover(): no sectors found on {:?} after {} attempts",
                    ch,
                    attempt + 1
                );
                let failed = stages.len();
                return Discovery {
                    attempt,
                    decodes,
                    stages,
                    failed,
                };
            }
            attempt += 1;
        }
    }

    /// Recover every sector found on a track. Sectors are recovered independently, in parallel
    /// when enabled; results are ordered by ascending sector ID.
    pub fn recover_track(&self, ch: DiskCh, revolutions: &[FluxSample]) -> TrackRecovery {
        let discovery = self.discover(ch, revolutions);
        let ids: Vec<u8> = discovery
            .decodes
            .iter()
            .flat_map(|d| d.sectors.iter().map(|s| s.id.s()))
            .collect::<BTreeSet<u8>>()
            .into_iter()
            .collect();

        log::debug!(
            "Recovery::recover_track(): {} revolutions of {:?}: {} sector IDs found on attempt {}",
            revolutions.len(),
            ch,
            ids.len(),
            discovery.attempt
        );

        let results = par_map(&ids, self.config.parallel, |&id| {
            self.recover_with(ch, revolutions, id, Some(&discovery))
        });

        let mut track = Track::new(ch, self.config.encoding, self.nominal_bitrate(), Self::nominal_rpm(revolutions));
        track.bitstream = discovery.decodes.first().map(|d| d.bits.clone());
        track.revolutions = revolutions.to_vec();
        track.set_decoded(!discovery.decodes.is_empty());

        let mut recovery = TrackRecovery::new(track);
        recovery.discovery = discovery.stages;
        for result in results {
            if let Some(sector) = result.sector() {
                recovery.track.insert_sector(sector.clone());
            }
            recovery.results.insert(result.sector_id(), result);
        }
        recovery
    }

    /// Nominal data rate: MFM and FM spend two cells per data bit, GCR one.
    fn nominal_bitrate(&self) -> u32 {
        let cells_per_bit = if self.config.encoding.is_gcr() { 1 } else { 2 };
        1_000_000_000 / (self.config.profile.cell_ns() * cells_per_bit).max(1)
    }

    fn nominal_rpm(revolutions: &[FluxSample]) -> u32 {
        match revolutions.first().map(|r| r.duration()) {
            Some(duration) if duration > 0 => (60_000_000_000u64 / duration) as u32,
            _ => 0,
        }
    }

    fn decode_revolutions(&self, ch: DiskCh, revolutions: &[FluxSample], profile: &PllProfile) -> Vec<RevolutionDecode> {
        let ctx = self.config.decode_context(ch.h());
        let schema = self.config.schema();
        let pll = Pll::from_profile(*profile);
        let indexed: Vec<(usize, &FluxSample)> = revolutions.iter().enumerate().collect();

        par_map(&indexed, self.config.parallel, |&(revolution, sample)| {
            let decoded = pll.decode(sample);
            let quality = decoded.quality();
            let headers = schema.find_headers(&decoded.bits, &ctx);
            let sectors = schema.decode_candidates(&decoded.bits, &headers, &ctx);
            RevolutionDecode {
                revolution,
                dropped: decoded.dropped,
                quality,
                final_cell_ns: decoded.final_cell_ns,
                headers: headers.len(),
                best_distance: headers.iter().map(|h| h.distance).min(),
                sectors,
                bits: decoded.bits,
            }
        })
    }

    fn recover_with(
        &self,
        ch: DiskCh,
        revolutions: &[FluxSample],
        sector_id: u8,
        discovery: Option<&Discovery>,
    ) -> RecoveryResult {
        let mut stages = discovery.map(|d| d.stages[..d.failed].to_vec()).unwrap_or_default();
        if revolutions.is_empty() {
            stages.push(StageRecord::new(RecoveryStage::PllDecode, false, "no revolutions supplied"));
            return Self::exhausted(sector_id, stages, None);
        }

        let mut candidates = self.acquire(ch, revolutions, sector_id, discovery, &mut stages);
        if candidates.is_empty() {
            return Self::exhausted(sector_id, stages, None);
        }

        // Best reads first: fewest weak bytes, closest sync, best PLL quality, earliest revolution.
        candidates.sort_by(|a, b| {
            a.sector
                .weak_bytes
                .len()
                .cmp(&b.sector.weak_bytes.len())
                .then_with(|| a.sector.sync_distance.cmp(&b.sector.sync_distance))
                .then_with(|| b.quality.total_cmp(&a.quality))
                .then_with(|| a.revolution.cmp(&b.revolution))
        });

        // CRC_CHECK
        let checks: Vec<String> = candidates
            .iter_mut()
            .map(|c| {
                let check = crc::verify(&mut c.sector);
                format!(
                    "rev {}: {} stored {:04X} calculated {:04X}",
                    c.revolution,
                    if check.ok { "pass" } else { "fail" },
                    check.stored,
                    check.calculated
                )
            })
            .collect();
        let passing = candidates.iter().position(|c| c.sector.crc_ok());
        stages.push(StageRecord::new(RecoveryStage::CrcCheck, passing.is_some(), checks.join("; ")));
        if let Some(index) = passing {
            let mut sector = candidates.swap_remove(index).sector;
            sector.set_confidence(1.0);
            return Self::verified(sector_id, stages, RecoveryMethod::Direct, sector);
        }

        // CORRECTION, CRC_CHECK'
        if let Some((sector, bits)) = self.correct(&candidates, &mut stages) {
            return Self::verified(sector_id, stages, RecoveryMethod::BitCorrection { bits }, sector);
        }

        // FUSION, CRC_CHECK''
        let mut best_effort = None;
        if candidates.len() >= 2 {
            let reads: Vec<SectorRead> = candidates.iter().map(|c| SectorRead::new(&c.sector, c.quality)).collect();
            match fusion::fuse(&reads, &self.config.fusion) {
                Some(fused) => {
                    stages.push(StageRecord::new(
                        RecoveryStage::Fusion,
                        true,
                        format!(
                            "{} reads fused, {} weak bytes{}",
                            fused.reads,
                            fused.weak_bytes.len(),
                            if fused.combination_used { ", combination search" } else { "" }
                        ),
                    ));
                    stages.push(StageRecord::new(
                        RecoveryStage::CrcCheck,
                        fused.verified,
                        format!(
                            "fused: stored {:04X} calculated {:04X}",
                            fused.sector.crc_stored(),
                            fused.sector.crc_calculated()
                        ),
                    ));
                    if fused.verified {
                        let method = if fused.combination_used {
                            RecoveryMethod::FusionCombination { revolutions: fused.reads }
                        }
                        else {
                            RecoveryMethod::Fusion { revolutions: fused.reads }
                        };
                        return Self::verified(sector_id, stages, method, fused.sector);
                    }
                    best_effort = Some(fused.sector);
                }
                None => {
                    stages.push(StageRecord::new(RecoveryStage::Fusion, false, "no compatible reads to fuse"));
                }
            }
        }
        else {
            log::debug!(
                "Recovery::recover_with(): sector {} has a single read, fusion unavailable",
                sector_id
            );
        }

        let best_effort = best_effort.or_else(|| {
            let mut sector = candidates.swap_remove(0).sector;
            let clean = 1.0 - sector.weak_bytes.len() as f32 / sector.len().max(1) as f32;
            sector.set_confidence(UNVERIFIED_READ_SCALE * clean);
            Some(sector)
        });
        Self::exhausted(sector_id, stages, best_effort)
    }

    /// Record PLL_DECODE and, if any bits were decoded, SYNC_SEARCH for one decode attempt.
    /// Returns the number of sync candidates, or None if no bits were decoded.
    fn record_decode(
        attempt: u32,
        profile: &PllProfile,
        decodes: &[RevolutionDecode],
        stages: &mut Vec<StageRecord>,
    ) -> Option<usize> {
        let total_bits: usize = decodes.iter().map(|d| d.bits.len()).sum();
        let dropped: u32 = decodes.iter().map(|d| d.dropped).sum();
        let final_cells: Vec<u32> = decodes.iter().map(|d| d.final_cell_ns).collect();
        stages.push(StageRecord::new(
            RecoveryStage::PllDecode,
            total_bits > 0,
            format!(
                "attempt {} cell {} ns: {} bits from {} revolutions, {} dropped transitions, final cells {:?} ns",
                attempt,
                profile.cell_ns(),
                total_bits,
                decodes.len(),
                dropped,
                final_cells
            ),
        ));
        if total_bits == 0 {
            log::debug!("Recovery::record_decode(): no bits decoded from any revolution");
            return None;
        }

        let headers: usize = decodes.iter().map(|d| d.headers).sum();
        let best_distance = decodes.iter().filter_map(|d| d.best_distance).min();
        stages.push(StageRecord::new(
            RecoveryStage::SyncSearch,
            headers > 0,
            match best_distance {
                Some(distance) => format!("{} sync candidates, best distance {}", headers, distance),
                None => "no sync candidates".to_string(),
            },
        ));
        Some(headers)
    }

    /// Run PLL_DECODE, SYNC_SEARCH and CHANNEL_DECODE, retrying with perturbed PLL profiles until a
    /// read of the sector is found or the retry limit is reached. With a track discovery, the
    /// search resumes from the attempt that found the track's sectors and reuses its decodes.
    fn acquire(
        &self,
        ch: DiskCh,
        revolutions: &[FluxSample],
        sector_id: u8,
        discovery: Option<&Discovery>,
        stages: &mut Vec<StageRecord>,
    ) -> Vec<Candidate> {
        let first = discovery.map_or(0, |d| d.attempt);
        for attempt in first..=self.config.max_retries {
            let profile = self.config.profile.perturbed(attempt);
            let fresh;
            let decodes: &[RevolutionDecode] = match discovery {
                Some(d) if attempt == first => &d.decodes,
                _ => {
                    fresh = self.decode_revolutions(ch, revolutions, &profile);
                    &fresh
                }
            };

            // No profile change can produce bits from a capture without transitions.
            let Some(headers) = Self::record_decode(attempt, &profile, decodes, stages)
            else {
                break;
            };

            if headers > 0 {
                let candidates: Vec<Candidate> = decodes
                    .iter()
                    .flat_map(|d| {
                        d.sectors.iter().filter(|s| s.id.s() == sector_id).map(move |s| Candidate {
                            sector: s.clone(),
                            quality: d.quality,
                            revolution: d.revolution,
                        })
                    })
                    .collect();
                stages.push(StageRecord::new(
                    RecoveryStage::ChannelDecode,
                    !candidates.is_empty(),
                    format!("{} reads of sector {} decoded", candidates.len(), sector_id),
                ));
                if !candidates.is_empty() {
                    return candidates;
                }
            }
            log::trace!(
                "Recovery::acquire(): sector {} not found on attempt {}",
                sector_id,
                attempt
            );
        }
        Vec::new()
    }

    /// Run CORRECTION and CRC_CHECK' over the distinct reads, best first.
    fn correct(&self, candidates: &[Candidate], stages: &mut Vec<StageRecord>) -> Option<(Sector, usize)> {
        let mut outcomes = Vec::new();
        let mut seen: Vec<Vec<u8>> = Vec::new();
        let mut corrected = None;

        for candidate in candidates.iter() {
            let region = candidate.sector.region();
            if seen.contains(&region) {
                continue;
            }
            seen.push(region);

            let mut sector = candidate.sector.clone();
            let outcome = correction::correct_sector(&mut sector, &self.config.correction);
            outcomes.push(format!("rev {}: {}", candidate.revolution, outcome));
            match outcome {
                CorrectionOutcome::Corrected { ref flipped } => {
                    corrected = Some((sector, flipped.len()));
                    break;
                }
                // The same holds for every read.
                CorrectionOutcome::Unsupported => break,
                CorrectionOutcome::BudgetExhausted { trials } => {
                    log::warn!(
                        "Recovery::correct(): sector {} correction budget exhausted after {} trials",
                        candidate.sector.id,
                        trials
                    );
                }
                _ => {}
            }
        }

        stages.push(StageRecord::new(RecoveryStage::Correction, corrected.is_some(), outcomes.join("; ")));
        stages.push(StageRecord::new(
            RecoveryStage::CrcCheck,
            corrected.as_ref().is_some_and(|(s, _)| s.crc_ok()),
            match &corrected {
                Some((s, _)) => format!("corrected: stored {:04X} calculated {:04X}", s.crc_stored(), s.crc_calculated()),
                None => "no corrected read".to_string(),
            },
        ));
        corrected
    }

    fn verified(sector_id: u8, mut stages: Vec<StageRecord>, method: RecoveryMethod, sector: Sector) -> RecoveryResult {
        log::debug!(
            "Recovery::verified(): sector {} recovered via {} (confidence {:.2})",
            sector_id,
            method,
            sector.confidence()
        );
        stages.push(StageRecord::new(RecoveryStage::Verified, true, method.to_string()));
        RecoveryResult::new(sector_id, stages, method, Some(sector))
    }

    fn exhausted(sector_id: u8, mut stages: Vec<StageRecord>, best_effort: Option<Sector>) -> RecoveryResult {
        log::warn!(
            "Recovery::exhausted(): sector {} unrecovered after {} stages{}",
            sector_id,
            stages.len(),
            if best_effort.is_some() { ", best-effort data retained" } else { "" }
        );
        stages.push(StageRecord::new(
            RecoveryStage::Exhausted,
            false,
            if best_effort.is_some() {
                "no method produced a verified sector; best-effort data is unverified"
            }
            else {
                "no read of the sector was decoded"
            },
        ));
        RecoveryResult::new(sector_id, stages, RecoveryMethod::Unrecovered, best_effort)
    }
}
