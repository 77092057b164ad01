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

    src/recovery/result.rs

    Recovery result, stage trail and method provenance.
*/

use crate::{
    types::{enums::RecoveryStage, sector::Sector, track::Track},
    MAXIMUM_SECTOR_SIZE,
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

/// One stage visited by the recovery state machine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageRecord {
    pub stage: RecoveryStage,
    pub success: bool,
    /// Diagnostic detail: Hamming distances, drop counts, flipped bits and so on.
    pub detail: String,
}

impl StageRecord {
    pub fn new(stage: RecoveryStage, success: bool, detail: impl Into<String>) -> Self {
        Self {
            stage,
            success,
            detail: detail.into(),
        }
    }
}

impl Display for StageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<14} {:<4} {}",
            self.stage.to_string(),
            if self.success { "ok" } else { "fail" },
            self.detail
        )
    }
}

/// How a sector's data was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecoveryMethod {
    /// A read passed its check as decoded.
    Direct,
    /// A read passed its check after flipping `bits` bits.
    BitCorrection { bits: usize },
    /// Plurality voting across `revolutions` reads produced a passing sector.
    Fusion { revolutions: usize },
    /// Plurality voting left weak bytes; a combination of observed values passed.
    FusionCombination { revolutions: usize },
    /// No method produced a passing sector.
    Unrecovered,
}

impl Display for RecoveryMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryMethod::Direct => write!(f, "direct read"),
            RecoveryMethod::BitCorrection { bits } => write!(f, "CRC-guided correction of {} bit(s)", bits),
            RecoveryMethod::Fusion { revolutions } => {
                write!(f, "multi-revolution fusion of {} reads", revolutions)
            }
            RecoveryMethod::FusionCombination { revolutions } => {
                write!(f, "multi-revolution fusion of {} reads with weak byte search", revolutions)
            }
            RecoveryMethod::Unrecovered => write!(f, "unrecovered"),
        }
    }
}

/// The outcome of recovering one sector. Immutable once produced.
///
/// An unrecovered result may still carry best-effort data; it is never presented as verified:
/// `recovered()` is false and `confidence()` is below 1.0.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecoveryResult {
    sector_id: u8,
    recovered: bool,
    stages: Vec<StageRecord>,
    method: RecoveryMethod,
    confidence: f32,
    data: Vec<u8>,
    data_len: usize,
    sector: Option<Sector>,
}

impl RecoveryResult {
    pub(crate) fn new(
        sector_id: u8,
        stages: Vec<StageRecord>,
        method: RecoveryMethod,
        sector: Option<Sector>,
    ) -> Self {
        let recovered = method != RecoveryMethod::Unrecovered && sector.as_ref().is_some_and(|s| s.crc_ok());
        let (data, data_len, confidence) = match &sector {
            Some(s) => {
                let len = s.len().min(MAXIMUM_SECTOR_SIZE);
                (s.data()[..len].to_vec(), s.len(), s.confidence())
            }
            None => (Vec::new(), 0, 0.0),
        };
        Self {
            sector_id,
            recovered,
            stages,
            method: if recovered { method } else { RecoveryMethod::Unrecovered },
            confidence,
            data,
            data_len,
            sector,
        }
    }

    pub fn sector_id(&self) -> u8 {
        self.sector_id
    }

    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// Every stage attempted, in order.
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn stage_trail(&self) -> Vec<RecoveryStage> {
        self.stages.iter().map(|r| r.stage).collect()
    }

    /// The terminal stage: [RecoveryStage::Verified] or [RecoveryStage::Exhausted].
    pub fn final_stage(&self) -> RecoveryStage {
        self.stages.last().map_or(RecoveryStage::Exhausted, |r| r.stage)
    }

    pub fn method(&self) -> &RecoveryMethod {
        &self.method
    }

    pub fn method_text(&self) -> String {
        self.method.to_string()
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Recovered data, or best-effort data if unrecovered. Bounded to [MAXIMUM_SECTOR_SIZE].
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// The final sector, with flags, weak bytes and read count.
    pub fn sector(&self) -> Option<&Sector> {
        self.sector.as_ref()
    }

    /// A human-readable account of the recovery.
    pub fn report(&self) -> String {
        let mut report = format!(
            "Sector {}: {} via {} (confidence {:.2}, {} bytes)\n",
            self.sector_id,
            if self.recovered { "RECOVERED" } else { "UNRECOVERED" },
            self.method,
            self.confidence,
            self.data_len
        );
        for record in self.stages.iter() {
            report.push_str(&format!("  {}\n", record));
        }
        report
    }
}

/// The outcome of recovering every sector found on a track.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackRecovery {
    pub track: Track,
    /// Results keyed by sector ID, iterated in ascending order.
    pub results: BTreeMap<u8, RecoveryResult>,
    /// PLL_DECODE and SYNC_SEARCH attempts made to find the sector IDs on the track, the
    /// successful attempt (if any) last.
    pub discovery: Vec<StageRecord>,
}

impl TrackRecovery {
    pub(crate) fn new(track: Track) -> Self {
        Self {
            track,
            results: BTreeMap::new(),
            discovery: Vec::new(),
        }
    }

    pub fn result(&self, sector_id: u8) -> Option<&RecoveryResult> {
        self.results.get(&sector_id)
    }

    pub fn recovered_count(&self) -> usize {
        self.results.values().filter(|r| r.recovered()).count()
    }

    pub fn unrecovered_ids(&self) -> Vec<u8> {
        self.results
            .iter()
            .filter(|(_, r)| !r.recovered())
            .map(|(&id, _)| id)
            .collect()
    }
}
