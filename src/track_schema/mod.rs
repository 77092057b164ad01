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

    src/track_schema/mod.rs

    Track schemas: sector layouts for each supported track format.
*/

//! The `track_schema` module defines a `TrackSchema` enum that represents the layout of sector
//! headers, data fields, gaps and address marks on a track.
//!
//! A track schema relies on the [bitstream_codec](crate::bitstream_codec) module to demodulate
//! the underlying encoding, however a `TrackSchema` implementation need not be fully encoding
//! agnostic - a certain schema may only ever have been paired with a specific encoding type.
//! The IBM System 34 schema serves both FM and MFM tracks, the Amiga trackdisk schema is MFM only,
//! and the Commodore and Apple schemas are GCR only. Since the Amiga shares its encoding with IBM
//! tracks, the schema of a track cannot always be inferred from its encoding.
//!
//! A `TrackSchema` also defines the layout of a track for formatting operations, which is used to
//! synthesize tracks.
//!
//! A `TrackSchema` contains no state.

mod dispatch;
pub mod amiga;
pub mod apple;
pub mod commodore;
pub mod system34;

use crate::{
    bitstream::Bitstream,
    bitstream_codec::gcr::ViterbiConfig,
    crc,
    sync::SyncMatch,
    types::{
        chs::{DiskCh, DiskChsn},
        enums::{CrcAlgorithm, TrackEncoding},
        sector::Sector,
    },
    PipelineError,
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackSchema {
    System34,
    Amiga,
    Commodore,
    Apple,
}

impl Display for TrackSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrackSchema::System34 => write!(f, "IBM System34"),
            TrackSchema::Amiga => write!(f, "Amiga trackdisk"),
            TrackSchema::Commodore => write!(f, "Commodore 1541"),
            TrackSchema::Apple => write!(f, "Apple DOS 3.3"),
        }
    }
}

impl From<TrackEncoding> for TrackSchema {
    fn from(encoding: TrackEncoding) -> Self {
        match encoding {
            TrackEncoding::Fm | TrackEncoding::Mfm => TrackSchema::System34,
            TrackEncoding::GcrCommodore => TrackSchema::Commodore,
            TrackEncoding::GcrApple => TrackSchema::Apple,
        }
    }
}

impl TrackSchema {
    /// Returns true if tracks of this schema can be written with `encoding`.
    pub fn supports(&self, encoding: TrackEncoding) -> bool {
        match self {
            TrackSchema::System34 => matches!(encoding, TrackEncoding::Fm | TrackEncoding::Mfm),
            TrackSchema::Amiga => encoding == TrackEncoding::Mfm,
            TrackSchema::Commodore => encoding == TrackEncoding::GcrCommodore,
            TrackSchema::Apple => encoding == TrackEncoding::GcrApple,
        }
    }

    /// The data field check a schema uses when not overridden.
    pub fn default_crc(&self, encoding: TrackEncoding) -> CrcAlgorithm {
        match self {
            TrackSchema::Amiga => CrcAlgorithm::AmigaXor32,
            _ => encoding.default_crc(),
        }
    }
}

/// Parameters shared by all sector decodes on a track.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DecodeContext {
    pub encoding: TrackEncoding,
    /// Data field check for System 34 sectors. GCR schemas always use their own fixed check.
    pub crc: CrcAlgorithm,
    pub sync_max_distance: u32,
    pub viterbi: ViterbiConfig,
    /// Physical head, used for GCR sector IDs which do not record one.
    pub head: u8,
}

impl DecodeContext {
    pub fn new(encoding: TrackEncoding) -> Self {
        Self {
            encoding,
            crc: encoding.default_crc(),
            sync_max_distance: encoding.default_sync_distance(),
            viterbi: ViterbiConfig::default(),
            head: 0,
        }
    }
}

/// A sector to be laid out by [TrackSchema::format_track].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectorDescriptor {
    pub id: DiskChsn,
    pub data: Vec<u8>,
    pub deleted: bool,
}

impl SectorDescriptor {
    pub fn new(id: DiskChsn, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            deleted: false,
        }
    }
}

/// Layout parameters for [TrackSchema::format_track].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatParams {
    /// Gap between sectors in bytes; the schema default if None.
    pub gap3: Option<usize>,
    /// Data field check for System 34 sectors.
    pub crc: Option<CrcAlgorithm>,
    /// Commodore disk ID, written to every sector header.
    pub disk_id: [u8; 2],
    /// Apple volume number, written to every address field.
    pub volume: u8,
}

impl Default for FormatParams {
    fn default() -> Self {
        Self {
            gap3: None,
            crc: None,
            disk_id: [0x41, 0x42],
            volume: 254,
        }
    }
}

/// Operations every track schema implements.
pub trait TrackSchemaTrait {
    /// Locate every candidate sector header on the track, ranked by sync distance.
    fn find_headers(&self, stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch>;

    /// Decode the header at `header` and its following data field. Returns None if the header is
    /// invalid, the data field cannot be found, or the region is undecodable. The returned sector
    /// has not been verified.
    fn decode_sector(&self, stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector>;

    /// Lay out a complete track containing `sectors`.
    fn format_track(
        &self,
        encoding: TrackEncoding,
        ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError>;
}

impl TrackSchema {
    /// Decode every sector found on the track, one per sector ID, in ascending ID order.
    ///
    /// Fuzzy sync matching may produce several candidates for one physical sector. For each ID
    /// the first candidate whose data check passes is kept, or the best-ranked candidate if none
    /// pass.
    pub fn decode_track(&self, stream: &Bitstream, ctx: &DecodeContext) -> Vec<Sector> {
        let headers = self.find_headers(stream, ctx);
        self.decode_candidates(stream, &headers, ctx)
    }

    /// Decode sectors at previously located header candidates, with the same selection rules as
    /// [TrackSchema::decode_track].
    pub fn decode_candidates(&self, stream: &Bitstream, headers: &[SyncMatch], ctx: &DecodeContext) -> Vec<Sector> {
        let mut sectors: BTreeMap<u8, (Sector, bool)> = BTreeMap::new();

        for header in headers.iter() {
            let Some(sector) = self.decode_sector(stream, header, ctx)
            else {
                continue;
            };
            let passes = crc::compute(sector.algorithm(), sector.preamble(), sector.data()) == sector.crc_stored();
            match sectors.get(&sector.id.s()) {
                Some((_, true)) => {}
                Some((_, false)) if !passes => {}
                _ => {
                    sectors.insert(sector.id.s(), (sector, passes));
                }
            }
        }

        log::debug!(
            "TrackSchema::decode_candidates(): {} {} header candidates, {} sectors decoded",
            self,
            headers.len(),
            sectors.len()
        );
        sectors.into_values().map(|(s, _)| s).collect()
    }
}
