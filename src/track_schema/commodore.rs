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

    src/track_schema/commodore.rs

    Implements the Commodore 1541 GCR track schema.
*/

//! A Commodore 1541 sector is written as two blocks, each introduced by a run of at least ten
//! one bits. The header block holds a block ID of 0x08, an XOR checksum, the sector and track
//! numbers and the two byte disk ID. The data block holds a block ID of 0x07, 256 data bytes and
//! an XOR checksum of the data. Both blocks are GCR encoded with [GcrViterbi] handling slips.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::gcr::{self, GcrVariant, GcrViterbi},
    crc,
    sync::{find_sync, find_sync_forward, SyncMatch, SyncPattern},
    track_schema::{DecodeContext, FormatParams, SectorDescriptor},
    types::{
        chs::{DiskCh, DiskChsn},
        enums::{CrcAlgorithm, TrackEncoding},
        flags::SectorFlags,
        sector::Sector,
    },
    PipelineError,
};

pub const HEADER_BLOCK_ID: u8 = 0x08;
pub const DATA_BLOCK_ID: u8 = 0x07;
pub const SECTOR_SIZE: usize = 256;
pub const GAP_BYTE: u8 = 0x55;

/// Bytes in a header block, including the two padding bytes.
const HEADER_BLOCK_LEN: usize = 8;
/// Bytes decoded from a data block: block ID, data and checksum. The two trailing pad bytes are
/// not needed.
const DATA_BLOCK_DECODE_LEN: usize = 1 + SECTOR_SIZE + 1;
const SYNC_BYTES: usize = 5;
const HEADER_GAP_BYTES: usize = 9;
const DEFAULT_SECTOR_GAP_BYTES: usize = 8;
/// Bit window following a header in which the data block sync must begin.
const DATA_SYNC_WINDOW: usize = 200;

pub struct CommodoreSchema;

impl CommodoreSchema {
    pub(crate) fn find_headers(stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch> {
        find_sync(stream, SyncPattern::C1541_SYNC, ctx.sync_max_distance)
    }

    /// Decode a GCR block of `bytes` bytes following a sync mark. The final zero bit of the sync
    /// pattern is the first bit of the block.
    fn decode_block(stream: &Bitstream, sync: &SyncMatch, bytes: usize, ctx: &DecodeContext) -> Option<gcr::GcrDecodeResult> {
        let start = (sync.offset + sync.pattern.len() - 1) % stream.len();
        GcrViterbi::new(GcrVariant::Commodore, ctx.viterbi)
            .ok()?
            .decode(stream, start, bytes * 2)
    }

    pub(crate) fn decode_sector(stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector> {
        if stream.is_empty() {
            return None;
        }
        let header_block = Self::decode_block(stream, header, HEADER_BLOCK_LEN, ctx)?;
        let fields = gcr::c1541_nibbles_to_bytes(&header_block.symbols);
        if fields[0] != HEADER_BLOCK_ID {
            return None;
        }
        let (checksum, s, t, id2, id1) = (fields[1], fields[2], fields[3], fields[4], fields[5]);
        if !header_block.illegal.is_empty() || checksum != s ^ t ^ id2 ^ id1 {
            log::trace!(
                "CommodoreSchema::decode_sector(): bad header at {} (sector {} track {})",
                header.offset,
                s,
                t
            );
            return None;
        }

        let data_sync = find_sync_forward(
            stream,
            SyncPattern::C1541_SYNC,
            header_block.end_offset,
            DATA_SYNC_WINDOW,
            ctx.sync_max_distance,
        )?;
        let data_block = Self::decode_block(stream, &data_sync, DATA_BLOCK_DECODE_LEN, ctx)?;
        let block = gcr::c1541_nibbles_to_bytes(&data_block.symbols);
        if block[0] != DATA_BLOCK_ID {
            log::trace!(
                "CommodoreSchema::decode_sector(): sector {} data block ID {:02X}",
                s,
                block[0]
            );
            return None;
        }

        let id = DiskChsn::new(t as u16, ctx.head, s, 1);
        let mut sector = Sector::new(
            id,
            CrcAlgorithm::Xor8,
            Vec::new(),
            block[1..=SECTOR_SIZE].to_vec(),
            block[SECTOR_SIZE + 1] as u32,
        )
        .ok()?;
        sector.bit_offset = header.offset;
        sector.sync_distance = header.distance.max(data_sync.distance);
        if header_block.slips + data_block.slips > 0 {
            sector.flags |= SectorFlags::BIT_SLIP;
        }
        if !data_block.illegal.is_empty() {
            sector.flags |= SectorFlags::ENCODING_ERROR;
            // Codeword k carries half of block byte k / 2; block byte 0 is the block ID.
            for &k in data_block.illegal.iter() {
                if let Some(index) = (k / 2).checked_sub(1) {
                    sector.mark_weak(index);
                }
            }
        }
        Some(sector)
    }

    fn push_sync(track: &mut Bitstream) {
        for _ in 0..SYNC_BYTES {
            track.push_bits(0xFF, 8);
        }
    }

    fn push_gap(track: &mut Bitstream, bytes: usize) {
        for _ in 0..bytes {
            track.push_bits(GAP_BYTE as u64, 8);
        }
    }

    pub(crate) fn format_track(
        encoding: TrackEncoding,
        ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError> {
        if encoding != TrackEncoding::GcrCommodore {
            return Err(PipelineError::UnsupportedEncoding(encoding));
        }
        let gap = params.gap3.unwrap_or(DEFAULT_SECTOR_GAP_BYTES);
        let [id1, id2] = params.disk_id;
        let track_number = ch.c() as u8;
        let mut track = Bitstream::new();

        for sector in sectors {
            if sector.data.len() != SECTOR_SIZE {
                return Err(PipelineError::ParameterError(format!(
                    "sector {} must be {} bytes, got {}",
                    sector.id,
                    SECTOR_SIZE,
                    sector.data.len()
                )));
            }
            let s = sector.id.s();
            let header = [
                HEADER_BLOCK_ID,
                s ^ track_number ^ id2 ^ id1,
                s,
                track_number,
                id2,
                id1,
                0x0F,
                0x0F,
            ];
            Self::push_sync(&mut track);
            gcr::c1541_encode_into(&mut track, &header);
            Self::push_gap(&mut track, HEADER_GAP_BYTES);

            let mut block = Vec::with_capacity(SECTOR_SIZE + 4);
            block.push(DATA_BLOCK_ID);
            block.extend_from_slice(&sector.data);
            block.push(crc::xor8(&sector.data));
            block.extend_from_slice(&[0x00, 0x00]);
            Self::push_sync(&mut track);
            gcr::c1541_encode_into(&mut track, &block);
            Self::push_gap(&mut track, gap);
        }

        log::debug!(
            "CommodoreSchema::format_track(): formatted track {} with {} sectors in {} bits",
            track_number,
            sectors.len(),
            track.len()
        );
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_schema::TrackSchema;

    fn descriptors(count: u8) -> Vec<SectorDescriptor> {
        (0..count)
            .map(|s| {
                let data = (0..SECTOR_SIZE).map(|i| (i as u8).wrapping_mul(7) ^ s).collect();
                SectorDescriptor::new(DiskChsn::new(17, 0, s, 1), data)
            })
            .collect()
    }

    #[test]
    fn round_trip() {
        let sectors = descriptors(3);
        let track = CommodoreSchema::format_track(
            TrackEncoding::GcrCommodore,
            DiskCh::new(17, 0),
            &sectors,
            &FormatParams::default(),
        )
        .unwrap();
        let ctx = DecodeContext::new(TrackEncoding::GcrCommodore);
        let decoded = TrackSchema::Commodore.decode_track(&track, &ctx);
        assert_eq!(decoded.len(), 3);
        for (sector, desc) in decoded.iter().zip(sectors.iter()) {
            assert_eq!(sector.id, DiskChsn::new(17, 0, desc.id.s(), 1));
            assert_eq!(sector.data(), &desc.data[..]);
            assert_eq!(crc::xor8(sector.data()) as u32, sector.crc_stored());
            assert!(!sector.flags.contains(SectorFlags::BIT_SLIP));
        }
    }

    #[test]
    fn wrong_sector_size() {
        let sectors = vec![SectorDescriptor::new(DiskChsn::new(1, 0, 0, 1), vec![0; 100])];
        let result = CommodoreSchema::format_track(
            TrackEncoding::GcrCommodore,
            DiskCh::new(1, 0),
            &sectors,
            &FormatParams::default(),
        );
        assert!(matches!(result, Err(PipelineError::ParameterError(_))));
        let result = CommodoreSchema::format_track(TrackEncoding::Mfm, DiskCh::new(1, 0), &[], &FormatParams::default());
        assert!(matches!(result, Err(PipelineError::UnsupportedEncoding(_))));
    }
}
