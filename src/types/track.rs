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

    src/types/track.rs

    Defines the Track structure, an ordered collection of sectors for one cylinder and head.
*/

use crate::{
    bitstream::Bitstream,
    flux::FluxSample,
    types::{chs::DiskCh, enums::TrackEncoding, sector::Sector},
};
use std::collections::BTreeMap;

/// A decoded track. Sectors are keyed by sector ID so that iteration is always in ascending
/// sector-ID order, regardless of the order in which they were decoded.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    pub ch: DiskCh,
    pub encoding: TrackEncoding,
    /// Nominal data rate in bits per second.
    pub bitrate: u32,
    pub rpm: u32,
    /// Bitstream of the first decoded revolution, if any.
    pub bitstream: Option<Bitstream>,
    pub revolutions: Vec<FluxSample>,
    sectors: BTreeMap<u8, Sector>,
    decoded: bool,
}

impl Track {
    pub fn new(ch: DiskCh, encoding: TrackEncoding, bitrate: u32, rpm: u32) -> Self {
        Self {
            ch,
            encoding,
            bitrate,
            rpm,
            ..Default::default()
        }
    }

    /// Insert a sector, replacing any existing sector with the same ID only if the new sector is
    /// verified and the existing one is not, or if the new sector has higher confidence.
    /// Returns true if the sector was stored.
    pub fn insert_sector(&mut self, sector: Sector) -> bool {
        let id = sector.id.s();
        match self.sectors.get(&id) {
            Some(existing) if !Self::is_better(&sector, existing) => {
                log::trace!("Track::insert_sector(): keeping existing sector {}", existing.id);
                false
            }
            _ => {
                self.sectors.insert(id, sector);
                true
            }
        }
    }

    fn is_better(new: &Sector, existing: &Sector) -> bool {
        match (new.crc_ok(), existing.crc_ok()) {
            (true, false) => true,
            (false, true) => false,
            _ => new.confidence() > existing.confidence(),
        }
    }

    pub fn sector(&self, id: u8) -> Option<&Sector> {
        self.sectors.get(&id)
    }

    /// Iterate over sectors in ascending sector-ID order.
    pub fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.sectors.values()
    }

    pub fn sector_ids(&self) -> Vec<u8> {
        self.sectors.keys().copied().collect()
    }

    pub fn sector_ct(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    pub fn set_decoded(&mut self, decoded: bool) {
        self.decoded = decoded;
    }

    /// Number of sectors that did not pass their check.
    pub fn error_count(&self) -> usize {
        self.sectors.values().filter(|s| !s.crc_ok()).count()
    }

    /// Aggregate quality score: the mean sector confidence, or 0.0 for a track with no sectors.
    pub fn quality(&self) -> f32 {
        if self.sectors.is_empty() {
            return 0.0;
        }
        self.sectors.values().map(|s| s.confidence()).sum::<f32>() / self.sectors.len() as f32
    }
}
