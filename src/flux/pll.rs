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

    src/flux/pll.rs

    Phase-locked loop timing recovery: converts flux transition intervals into a bitstream.
*/

//! The PLL rounds each transition interval to a whole number of bit cells and emits `n-1` zero
//! bits followed by a one bit, the run-length mapping shared by every self-clocking and GCR code
//! supported by this crate. The cell time estimate follows the observed per-cell interval with an
//! exponential moving average whose gain is a Q16 fixed-point fraction, and is clamped to the
//! profile's bounds after every update.

use crate::{
    bitstream::Bitstream,
    flux::{FluxSample, FluxStats},
    format_us,
    types::enums::TrackEncoding,
    PipelineError,
};

const Q16_ONE: u64 = 1 << 16;
/// The largest loop gain accepted by [PllProfile::new] (0.25). Higher gains let a single noisy
/// interval drag the clock far enough to misclassify its neighbours.
pub const MAX_ALPHA_Q16: u32 = 16384;
/// Default loop gain, approximately 0.05.
pub const DEFAULT_ALPHA_Q16: u32 = 3277;
/// Relative step applied to the cell time for each PLL retry, in thousandths.
const PERTURB_STEP_PERMILLE: u64 = 30;

/// Parameters for one PLL decode. A [PllProfile] can only be constructed in a valid state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllProfile {
    cell_ns: u32,
    cell_ns_min: u32,
    cell_ns_max: u32,
    alpha_q16: u32,
    max_run_cells: u32,
}

impl Default for PllProfile {
    fn default() -> Self {
        Self::MFM_DD
    }
}

impl PllProfile {
    /// Double density MFM: 250Kbps, 2µs cells.
    pub const MFM_DD: PllProfile = PllProfile {
        cell_ns: 2000,
        cell_ns_min: 1700,
        cell_ns_max: 2300,
        alpha_q16: DEFAULT_ALPHA_Q16,
        max_run_cells: 4,
    };
    /// High density MFM: 500Kbps, 1µs cells.
    pub const MFM_HD: PllProfile = PllProfile {
        cell_ns: 1000,
        cell_ns_min: 850,
        cell_ns_max: 1150,
        alpha_q16: DEFAULT_ALPHA_Q16,
        max_run_cells: 4,
    };
    /// Single density FM: 125Kbps data, 4µs clock/data cells.
    pub const FM_SD: PllProfile = PllProfile {
        cell_ns: 4000,
        cell_ns_min: 3400,
        cell_ns_max: 4600,
        alpha_q16: DEFAULT_ALPHA_Q16,
        max_run_cells: 2,
    };
    /// Commodore 1541 speed zone 3 (tracks 1-17): 3.25µs cells.
    pub const GCR_C1541: PllProfile = PllProfile {
        cell_ns: 3250,
        cell_ns_min: 2800,
        cell_ns_max: 3700,
        alpha_q16: DEFAULT_ALPHA_Q16,
        max_run_cells: 3,
    };
    /// Apple II: 4µs cells.
    pub const GCR_APPLE: PllProfile = PllProfile {
        cell_ns: 4000,
        cell_ns_min: 3400,
        cell_ns_max: 4600,
        alpha_q16: DEFAULT_ALPHA_Q16,
        max_run_cells: 3,
    };

    /// Create a new profile. `alpha_q16` is the loop gain as a fraction of 65536.
    pub fn new(
        cell_ns: u32,
        cell_ns_min: u32,
        cell_ns_max: u32,
        alpha_q16: u32,
        max_run_cells: u32,
    ) -> Result<Self, PipelineError> {
        if cell_ns_min == 0 {
            return Err(PipelineError::InvalidProfile("minimum cell time must be non-zero".into()));
        }
        if !(cell_ns_min..=cell_ns_max).contains(&cell_ns) {
            return Err(PipelineError::InvalidProfile(format!(
                "cell time {} outside of clamp bounds {}..={}",
                cell_ns, cell_ns_min, cell_ns_max
            )));
        }
        if alpha_q16 > MAX_ALPHA_Q16 {
            return Err(PipelineError::InvalidProfile(format!(
                "loop gain {} exceeds maximum {}",
                alpha_q16, MAX_ALPHA_Q16
            )));
        }
        if !(1..=64).contains(&max_run_cells) {
            return Err(PipelineError::InvalidProfile(format!(
                "maximum run length {} must be in 1..=64",
                max_run_cells
            )));
        }
        Ok(Self {
            cell_ns,
            cell_ns_min,
            cell_ns_max,
            alpha_q16,
            max_run_cells,
        })
    }

    /// Return the default profile for an encoding.
    pub fn for_encoding(encoding: TrackEncoding) -> Self {
        match encoding {
            TrackEncoding::Mfm => Self::MFM_DD,
            TrackEncoding::Fm => Self::FM_SD,
            TrackEncoding::GcrCommodore => Self::GCR_C1541,
            TrackEncoding::GcrApple => Self::GCR_APPLE,
        }
    }

    pub fn cell_ns(&self) -> u32 {
        self.cell_ns
    }
    pub fn cell_ns_min(&self) -> u32 {
        self.cell_ns_min
    }
    pub fn cell_ns_max(&self) -> u32 {
        self.cell_ns_max
    }
    pub fn alpha_q16(&self) -> u32 {
        self.alpha_q16
    }
    pub fn max_run_cells(&self) -> u32 {
        self.max_run_cells
    }

    /// Return a copy of this profile with the cell time and clamps scaled for retry `attempt`.
    /// Attempt 0 is the profile itself; odd attempts speed the clock up and even attempts slow it
    /// down, in growing 3% steps: +3%, -3%, +6%, -6%, ...
    pub fn perturbed(&self, attempt: u32) -> Self {
        if attempt == 0 {
            return *self;
        }
        let step = ((attempt as u64 + 1) / 2) * PERTURB_STEP_PERMILLE;
        let permille = if attempt % 2 == 1 {
            1000 + step
        }
        else {
            1000u64.saturating_sub(step).max(100)
        };
        let scale = |v: u32| ((v as u64 * permille) / 1000).clamp(1, u32::MAX as u64) as u32;
        Self {
            cell_ns: scale(self.cell_ns),
            cell_ns_min: scale(self.cell_ns_min),
            cell_ns_max: scale(self.cell_ns_max),
            ..*self
        }
    }
}

/// Outcome of feeding one interval to the PLL.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PllStep {
    /// A run of `n` cells: emit `n-1` zeros and a one.
    Run(u32),
    /// An implausibly long interval. The run was capped and the estimate left unchanged.
    Dropped(u32),
    /// A zero-length interval. Nothing is emitted.
    Zero,
}

/// Mutable PLL state for one decode pass. The cell time is tracked in Q16 fixed point and always
/// lies within the profile's clamp bounds.
#[derive(Clone, Debug)]
pub struct PllState {
    profile: PllProfile,
    cell_q16: u64,
}

impl PllState {
    pub fn new(profile: &PllProfile) -> Self {
        Self {
            profile: *profile,
            cell_q16: (profile.cell_ns as u64) << 16,
        }
    }

    /// Current cell time estimate, rounded to the nearest nanosecond.
    pub fn cell_ns(&self) -> u32 {
        ((self.cell_q16 + (Q16_ONE / 2)) >> 16) as u32
    }

    /// Classify one interval and update the cell time estimate.
    pub fn step(&mut self, delta_ns: u64) -> PllStep {
        if delta_ns == 0 {
            return PllStep::Zero;
        }
        let delta_q16 = (delta_ns as u128) << 16;
        let cell = self.cell_q16 as u128;
        let n = ((delta_q16 + cell / 2) / cell).max(1);

        let max_run = self.profile.max_run_cells as u128;
        if n > max_run {
            return PllStep::Dropped(self.profile.max_run_cells);
        }

        let observed = (delta_q16 / n) as i128;
        let current = self.cell_q16 as i128;
        let adjusted = current + ((self.profile.alpha_q16 as i128 * (observed - current)) >> 16);

        let min = (self.profile.cell_ns_min as i128) << 16;
        let max = (self.profile.cell_ns_max as i128) << 16;
        self.cell_q16 = adjusted.clamp(min, max) as u64;

        PllStep::Run(n as u32)
    }
}

/// The output of a PLL decode pass.
#[derive(Clone, Debug, Default)]
pub struct PllDecodeResult {
    pub bits: Bitstream,
    /// The cell time estimate after the final transition.
    pub final_cell_ns: u32,
    /// Count of dropped (implausibly long or zero-length) transitions.
    pub dropped: u32,
    pub stats: FluxStats,
}

impl PllDecodeResult {
    /// Fraction of transitions decoded without being dropped.
    pub fn quality(&self) -> f32 {
        self.stats.quality()
    }
}

/// A PLL configured with a [PllProfile].
#[derive(Clone, Debug, Default)]
pub struct Pll {
    profile: PllProfile,
}

impl Pll {
    pub fn from_profile(profile: PllProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &PllProfile {
        &self.profile
    }

    /// Decode one revolution into a bitstream. This never fails: a degenerate capture produces a
    /// short or empty bitstream along with a drop count.
    pub fn decode(&self, sample: &FluxSample) -> PllDecodeResult {
        let mut state = PllState::new(&self.profile);
        let mut bits = Bitstream::with_capacity(sample.len() * 3);
        let mut dropped = 0;
        let mut stats = FluxStats {
            total: sample.len() as u32,
            shortest_flux: u64::MAX,
            ..FluxStats::default()
        };
        let half_cell = (self.profile.cell_ns / 2) as u64;

        for (flux_ct, delta) in sample.intervals().enumerate() {
            if delta > 0 {
                stats.shortest_flux = stats.shortest_flux.min(delta);
                stats.longest_flux = stats.longest_flux.max(delta);
                if delta < half_cell {
                    stats.too_short += 1;
                }
            }

            let run = match state.step(delta) {
                PllStep::Run(n) => n,
                PllStep::Dropped(n) => {
                    log::trace!(
                        "Pll::decode(): Too slow flux detected: #{} dt: {} cell: {}",
                        flux_ct,
                        format_us!(delta),
                        format_us!(state.cell_ns())
                    );
                    stats.too_long += 1;
                    dropped += 1;
                    n
                }
                PllStep::Zero => {
                    stats.zero += 1;
                    dropped += 1;
                    continue;
                }
            };

            for _ in 0..run - 1 {
                bits.push(false);
            }
            bits.push(true);
        }

        if stats.shortest_flux == u64::MAX {
            stats.shortest_flux = 0;
        }

        log::debug!(
            "Pll::decode(): {} transitions -> {} bits, final cell: {} dropped: {}",
            sample.len(),
            bits.len(),
            format_us!(state.cell_ns()),
            dropped
        );

        PllDecodeResult {
            bits,
            final_cell_ns: state.cell_ns(),
            dropped,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_validation() {
        assert!(PllProfile::new(2000, 1700, 2300, DEFAULT_ALPHA_Q16, 4).is_ok());
        assert!(PllProfile::new(2000, 2100, 2300, DEFAULT_ALPHA_Q16, 4).is_err());
        assert!(PllProfile::new(2000, 1700, 2300, MAX_ALPHA_Q16 + 1, 4).is_err());
        assert!(PllProfile::new(2000, 1700, 2300, DEFAULT_ALPHA_Q16, 0).is_err());
        assert!(PllProfile::new(0, 0, 2300, DEFAULT_ALPHA_Q16, 4).is_err());
    }

    #[test]
    fn default_profiles_are_valid() {
        for p in [
            PllProfile::MFM_DD,
            PllProfile::MFM_HD,
            PllProfile::FM_SD,
            PllProfile::GCR_C1541,
            PllProfile::GCR_APPLE,
        ] {
            assert_eq!(
                PllProfile::new(p.cell_ns, p.cell_ns_min, p.cell_ns_max, p.alpha_q16, p.max_run_cells),
                Ok(p)
            );
        }
        assert!(PllProfile::MFM_HD.cell_ns() < PllProfile::MFM_DD.cell_ns());
    }

    #[test]
    fn perturbation_alternates() {
        let base = PllProfile::MFM_DD;
        assert_eq!(base.perturbed(0), base);
        assert_eq!(base.perturbed(1).cell_ns(), 2060);
        assert_eq!(base.perturbed(2).cell_ns(), 1940);
        assert_eq!(base.perturbed(3).cell_ns(), 2120);
        let p = base.perturbed(4);
        assert!(p.cell_ns_min() <= p.cell_ns() && p.cell_ns() <= p.cell_ns_max());
    }

    #[test]
    fn estimate_stays_clamped() {
        let mut state = PllState::new(&PllProfile::MFM_DD);
        // Consistently slow cells pull the estimate up, but never past the clamp.
        for _ in 0..10_000 {
            state.step(2500);
        }
        assert_eq!(state.cell_ns(), PllProfile::MFM_DD.cell_ns_max());
        for _ in 0..10_000 {
            state.step(1400);
        }
        assert_eq!(state.cell_ns(), PllProfile::MFM_DD.cell_ns_min());
    }

    #[test]
    fn dropped_transition_does_not_move_estimate() {
        let mut state = PllState::new(&PllProfile::MFM_DD);
        assert_eq!(state.step(20_000), PllStep::Dropped(4));
        assert_eq!(state.cell_ns(), 2000);
        assert_eq!(state.step(0), PllStep::Zero);
        assert_eq!(state.step(500), PllStep::Run(1));
    }

    #[test]
    fn tracks_gradual_drift() {
        // A capture running 5% slow, all runs of two cells.
        let sample = FluxSample::from_deltas(&vec![4200; 2000]);
        let result = Pll::from_profile(PllProfile::MFM_DD).decode(&sample);
        assert_eq!(result.dropped, 0);
        assert_eq!(result.bits.len(), 4000);
        assert!((2090..=2110).contains(&result.final_cell_ns));
    }
}
