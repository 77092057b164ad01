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

    src/track_schema/amiga.rs

    Amiga trackdisk sector layout.
*/

//! Amiga trackdisk tracks are MFM encoded but do not use the IBM address marks. Every sector starts
//! with two zero bytes and two raw 0x4489 sync words, followed by a single 540 byte block: a four
//! byte info field (format 0xFF, track, sector, sectors until the gap), a 16 byte label, a header
//! checksum, a data checksum and 512 bytes of data. Each field is split into its odd bits and its
//! even bits, written one after the other, so a data byte is only whole once both halves of its
//! field have been read.
//!
//! Both checksums are XOR folds that cannot localize errors. A damaged data field can be flagged
//! but never repaired by bit flipping.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::{interleave, mfm, split_cells},
    crc,
    sync::{find_sync, SyncMatch, SyncPattern},
    track_schema::{DecodeContext, FormatParams, SectorDescriptor},
    types::{
        chs::{DiskCh, DiskChsn},
        enums::{CrcAlgorithm, TrackEncoding},
        flags::SectorFlags,
        sector::Sector,
    },
    PipelineError,
};

pub const FORMAT_BYTE: u8 = 0xFF;
pub const SECTOR_SIZE: usize = 512;
/// Size code recorded for every Amiga sector.
pub const SIZE_CODE: u8 = 2;
pub const SECTORS_PER_TRACK_DD: u8 = 11;
pub const SECTORS_PER_TRACK_HD: u8 = 22;

const INFO_LEN: usize = 4;
const LABEL_LEN: usize = 16;
const CHECKSUM_LEN: usize = 4;
/// Demodulated bytes following the sync words.
const BLOCK_LEN: usize = INFO_LEN + LABEL_LEN + 2 * CHECKSUM_LEN + SECTOR_SIZE;

const INFO_OFFSET: usize = 0;
const LABEL_OFFSET: usize = INFO_OFFSET + INFO_LEN;
const HEADER_SUM_OFFSET: usize = LABEL_OFFSET + LABEL_LEN;
const DATA_SUM_OFFSET: usize = HEADER_SUM_OFFSET + CHECKSUM_LEN;
const DATA_OFFSET: usize = DATA_SUM_OFFSET + CHECKSUM_LEN;

const DEFAULT_TRACK_GAP_BYTES: usize = 300;

/// Split a field into its odd half followed by its even half. The odd and even bits of a byte
/// pair are the clock and data cells of an MFM word.
fn split_field(field: &[u8]) -> Vec<u8> {
    let (odd, even): (Vec<u8>, Vec<u8>) = field
        .chunks(2)
        .map(|pair| {
            let (even, odd) = split_cells(u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]));
            (odd, even)
        })
        .unzip();
    let mut out = odd;
    out.extend(even);
    out
}

/// Rebuild a field from its odd half followed by its even half.
fn join_field(halves: &[u8]) -> Vec<u8> {
    let (odd, even) = halves.split_at(halves.len() / 2);
    odd.iter()
        .zip(even.iter())
        .flat_map(|(&o, &e)| interleave(e, o).to_be_bytes())
        .collect()
}

pub struct AmigaSchema;

impl AmigaSchema {
    pub(crate) fn find_headers(stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch> {
        if ctx.encoding != TrackEncoding::Mfm {
            log::error!("AmigaSchema::find_headers(): unsupported encoding {}", ctx.encoding);
            return Vec::new();
        }
        find_sync(stream, SyncPattern::AMIGA_SYNC, ctx.sync_max_distance)
    }

    pub(crate) fn decode_sector(stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector> {
        if ctx.encoding != TrackEncoding::Mfm || stream.is_empty() {
            return None;
        }
        let decoded = mfm::decode_bytes(stream, header.end(stream.len()), BLOCK_LEN);
        let block = &decoded.bytes;

        let info = join_field(&block[INFO_OFFSET..LABEL_OFFSET]);
        let label = join_field(&block[LABEL_OFFSET..HEADER_SUM_OFFSET]);
        let header_sum = crc::bytes_to_stored(
            CrcAlgorithm::AmigaXor32,
            &join_field(&block[HEADER_SUM_OFFSET..DATA_SUM_OFFSET]),
        );
        let (fmt, tt, ss) = (info[0], info[1], info[2]);
        if fmt != FORMAT_BYTE {
            log::trace!(
                "AmigaSchema::decode_sector(): format byte {:02X} at {}",
                fmt,
                header.offset
            );
            return None;
        }
        let mut header_region = info.clone();
        header_region.extend_from_slice(&label);
        let calculated = crc::amiga_checksum(&header_region);
        if calculated != header_sum {
            log::trace!(
                "AmigaSchema::decode_sector(): header checksum error at {} (track {} sector {}): stored {:08X} calculated {:08X}",
                header.offset,
                tt,
                ss,
                header_sum,
                calculated
            );
            return None;
        }

        let data_sum = crc::bytes_to_stored(
            CrcAlgorithm::AmigaXor32,
            &join_field(&block[DATA_SUM_OFFSET..DATA_OFFSET]),
        );
        let data = join_field(&block[DATA_OFFSET..BLOCK_LEN]);
        let id = DiskChsn::new((tt / 2) as u16, tt % 2, ss, SIZE_CODE);
        let mut sector = Sector::new(id, CrcAlgorithm::AmigaXor32, Vec::new(), data, data_sum).ok()?;
        sector.bit_offset = header.offset;
        sector.sync_distance = header.distance;

        let half = SECTOR_SIZE / 2;
        let data_violations: Vec<usize> = decoded.violations.iter().filter(|&&v| v >= DATA_OFFSET).copied().collect();
        if !data_violations.is_empty() {
            sector.flags |= SectorFlags::ENCODING_ERROR;
            // Each demodulated byte carries half the bits of a pair of data bytes.
            for v in data_violations {
                let pair = (v - DATA_OFFSET) % half;
                sector.mark_weak(2 * pair);
                sector.mark_weak(2 * pair + 1);
            }
        }
        log::trace!(
            "AmigaSchema::decode_sector(): decoded sector {} at bit {} ({} clock violations)",
            id,
            header.offset,
            decoded.violations.len()
        );
        Some(sector)
    }

    /// Build the 540 byte block of a sector, odd and even halves already split.
    fn sector_block(track_number: u8, sector: u8, to_gap: u8, data: &[u8]) -> Vec<u8> {
        let info = [FORMAT_BYTE, track_number, sector, to_gap];
        let label = [0u8; LABEL_LEN];
        let mut header_region = info.to_vec();
        header_region.extend_from_slice(&label);
        let header_sum = crc::amiga_checksum(&header_region);
        let data_sum = crc::amiga_checksum(data);

        let mut block = Vec::with_capacity(BLOCK_LEN);
        block.extend(split_field(&info));
        block.extend(split_field(&label));
        block.extend(split_field(&crc::stored_to_bytes(CrcAlgorithm::AmigaXor32, header_sum)));
        block.extend(split_field(&crc::stored_to_bytes(CrcAlgorithm::AmigaXor32, data_sum)));
        block.extend(split_field(data));
        block
    }

    /// Lay out an Amiga trackdisk track. Sectors are written back to back with a single gap at
    /// the end of the track. The track number is derived from `ch` as `c * 2 + h`.
    pub(crate) fn format_track(
        encoding: TrackEncoding,
        ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError> {
        if encoding != TrackEncoding::Mfm {
            return Err(PipelineError::UnsupportedEncoding(encoding));
        }
        let track_number = u8::try_from(ch.c() as u32 * 2 + ch.h() as u32)
            .map_err(|_| PipelineError::ParameterError(format!("cylinder {} is out of range", ch.c())))?;
        let count = sectors.len();
        let mut track = Bitstream::with_capacity((count * (BLOCK_LEN + 4) + DEFAULT_TRACK_GAP_BYTES) * 16);

        for (i, sector) in sectors.iter().enumerate() {
            if sector.data.len() != SECTOR_SIZE {
                return Err(PipelineError::ParameterError(format!(
                    "sector {} must be {} bytes, got {}",
                    sector.id,
                    SECTOR_SIZE,
                    sector.data.len()
                )));
            }
            let to_gap = (count - i) as u8;
            mfm::encode_into(&mut track, &[0x00, 0x00]);
            mfm::encode_marker(&mut track, mfm::MFM_SYNC_A1);
            mfm::encode_marker(&mut track, mfm::MFM_SYNC_A1);
            mfm::encode_into(&mut track, &Self::sector_block(track_number, sector.id.s(), to_gap, &sector.data));
        }
        mfm::encode_into(&mut track, &vec![0x00; params.gap3.unwrap_or(DEFAULT_TRACK_GAP_BYTES)]);

        log::debug!(
            "AmigaSchema::format_track(): formatted track {} with {} sectors in {} bits",
            track_number,
            count,
            track.len()
        );
        Ok(track)
    }
}
