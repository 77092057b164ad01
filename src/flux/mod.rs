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

    src/flux/mod.rs

    Flux capture types: transition timestamps for one revolution, and decode statistics.
*/

use crate::bitstream::Bitstream;
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Format a nanosecond quantity as microseconds.
#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value as f64 / 1_000.0)
    };
}

pub mod pll;

/// One revolution of flux transition timestamps, in nanoseconds measured from the index pulse.
/// The first interval is measured from time zero.
///
/// Timestamps are expected to be monotonically increasing, but a [FluxSample] accepts any
/// sequence: the PLL treats non-increasing timestamps as implausible transitions rather than
/// rejecting the capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxSample {
    timestamps: Vec<u64>,
}

impl From<Vec<u64>> for FluxSample {
    fn from(timestamps: Vec<u64>) -> Self {
        Self { timestamps }
    }
}

impl FluxSample {
    pub fn new(timestamps: Vec<u64>) -> Self {
        Self { timestamps }
    }

    /// Build a sample from transition-to-transition intervals.
    pub fn from_deltas(deltas: &[u64]) -> Self {
        let mut time = 0u64;
        let timestamps = deltas
            .iter()
            .map(|&d| {
                time = time.saturating_add(d);
                time
            })
            .collect();
        Self { timestamps }
    }

    /// Synthesize an ideal capture from a bitstream: one transition at the end of every cell
    /// holding a one bit, with every cell exactly `cell_ns` long.
    pub fn from_bitstream(bits: &Bitstream, cell_ns: u64) -> Self {
        let timestamps = bits
            .iter()
            .enumerate()
            .filter_map(|(i, bit)| bit.then_some((i as u64 + 1) * cell_ns))
            .collect();
        Self { timestamps }
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Time of the final transition.
    pub fn duration(&self) -> u64 {
        self.timestamps.last().copied().unwrap_or(0)
    }

    /// Iterate over the intervals between transitions. Non-increasing timestamps produce a zero
    /// interval.
    pub fn intervals(&self) -> impl Iterator<Item = u64> + '_ {
        let mut last = 0u64;
        self.timestamps.iter().map(move |&t| {
            let delta = t.saturating_sub(last);
            last = last.max(t);
            delta
        })
    }

    pub fn is_monotonic(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] < w[1])
    }
}

/// Statistics gathered while decoding one revolution.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxStats {
    pub total: u32,
    /// Intervals longer than the profile's maximum run length.
    pub too_long: u32,
    /// Intervals shorter than half a cell, decoded as a single cell.
    pub too_short: u32,
    /// Zero-length intervals, which emit no bits.
    pub zero: u32,
    pub shortest_flux: u64,
    pub longest_flux: u64,
}

impl Display for FluxStats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Total: {} Shortest: {} Longest: {} Too Short: {} Too Long: {} Zero: {}",
            self.total,
            format_us!(self.shortest_flux),
            format_us!(self.longest_flux),
            self.too_short,
            self.too_long,
            self.zero
        )
    }
}

impl FluxStats {
    /// Fraction of transitions that were decoded without being dropped, from 0.0 to 1.0.
    /// An empty capture has quality 0.0.
    pub fn quality(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        let dropped = self.too_long + self.zero;
        1.0 - (dropped as f32 / self.total as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_from_index() {
        let sample = FluxSample::new(vec![2000, 6000, 6000, 5000, 12000]);
        let intervals: Vec<u64> = sample.intervals().collect();
        assert_eq!(intervals, vec![2000, 4000, 0, 0, 6000]);
        assert!(!sample.is_monotonic());
    }

    #[test]
    fn from_bitstream_places_transitions() {
        let bits: Bitstream = [false, true, false, false, true].into_iter().collect();
        let sample = FluxSample::from_bitstream(&bits, 2000);
        assert_eq!(sample.timestamps(), &[4000, 10000]);
        assert_eq!(FluxSample::from_deltas(&[4000, 6000]), sample);
    }
}
