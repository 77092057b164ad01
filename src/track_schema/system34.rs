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

    src/track_schema/system34.rs

    Implements the IBM System 34 track schema for FM and MFM tracks.
*/

//! IBM System 34 tracks consist of an ID address mark (IDAM) followed by a sector header (C, H, S,
//! N and a CRC), a short gap, and a data address mark (DAM) followed by the sector data and its
//! CRC. MFM address marks are preceded by three A1 sync bytes with a missing clock bit, which are
//! included in the CRC. FM address marks are written with the clock pattern 0xC7 and are not
//! preceded by sync bytes.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::{
        fm::{self, FM_BYTE_LEN},
        mfm::{self, MFM_BYTE_LEN, MFM_SYNC_A1},
        DecodedBytes,
    },
    correction::{self, CorrectionConfig},
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
    MAXIMUM_SIZE_CODE,
};

pub const DEFAULT_TRACK_SIZE_BYTES: usize = 6250;

pub const GAP_BYTE: u8 = 0x4E;
pub const FM_GAP_BYTE: u8 = 0xFF;
pub const SYNC_BYTE: u8 = 0;

pub const IAM_MARKER_BYTE: u8 = 0xFC;
pub const IDAM_MARKER_BYTE: u8 = 0xFE;
pub const DAM_MARKER_BYTE: u8 = 0xFB;
pub const DDAM_MARKER_BYTE: u8 = 0xF8;

/// MFM C2 with a missing clock bit, written before the index address mark.
pub const MFM_SYNC_C2: u16 = 0x5224;
/// FM index address mark: data 0xFC, clock 0xD7.
pub const FM_IAM: u16 = 0xF77A;

/// Number of bytes after the header CRC in which the data address mark must begin.
const DAM_SEARCH_WINDOW_BYTES: usize = 64;

const MFM_SYNC_LEN: usize = 12;
const FM_SYNC_LEN: usize = 6;

pub struct System34Schema;

impl System34Schema {
    pub(crate) fn find_headers(stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch> {
        match ctx.encoding {
            TrackEncoding::Mfm => find_sync(stream, SyncPattern::MFM_A1_X3, ctx.sync_max_distance),
            TrackEncoding::Fm => find_sync(stream, SyncPattern::FM_IDAM, ctx.sync_max_distance),
            _ => {
                log::error!("System34Schema::find_headers(): unsupported encoding {}", ctx.encoding);
                Vec::new()
            }
        }
    }

    fn decode_bytes(encoding: TrackEncoding, stream: &Bitstream, offset: usize, count: usize) -> DecodedBytes {
        match encoding {
            TrackEncoding::Fm => fm::decode_bytes(stream, offset, count),
            _ => mfm::decode_bytes(stream, offset, count),
        }
    }

    /// Return the bit offset of the first byte after the address mark, and the mark byte itself.
    fn mark_end(encoding: TrackEncoding, stream: &Bitstream, sync: &SyncMatch) -> (usize, u8) {
        match encoding {
            // The pattern is the mark itself.
            TrackEncoding::Fm => (sync.end(stream.len()), fm::decode_byte(sync.pattern.bits() as u16)),
            // The pattern is the A1 sync; the mark byte follows it.
            _ => {
                let mark_offset = sync.end(stream.len());
                let mark = mfm::decode_bytes(stream, mark_offset, 1).bytes[0];
                ((mark_offset + MFM_BYTE_LEN) % stream.len(), mark)
            }
        }
    }

    fn preamble(encoding: TrackEncoding, mark: u8) -> Vec<u8> {
        match encoding {
            TrackEncoding::Fm => vec![mark],
            _ => vec![0xA1, 0xA1, 0xA1, mark],
        }
    }

    /// Decode and verify a sector header. A header failing its CRC gets one single-bit correction
    /// attempt; an unverifiable header is never trusted.
    fn decode_header(stream: &Bitstream, sync: &SyncMatch, ctx: &DecodeContext) -> Option<(DiskChsn, usize, bool)> {
        let (offset, mark) = Self::mark_end(ctx.encoding, stream, sync);
        if mark != IDAM_MARKER_BYTE {
            log::trace!(
                "System34Schema::decode_header(): expected IDAM at {}, found {:02X}",
                sync.offset,
                mark
            );
            return None;
        }
        let decoded = Self::decode_bytes(ctx.encoding, stream, offset, 6);
        let mut region = decoded.bytes;
        let preamble = Self::preamble(ctx.encoding, mark);

        let mut corrected = false;
        if crc::syndrome(CrcAlgorithm::Crc16CcittFalse, &preamble, &region) != 0 {
            let outcome = correction::correct_buffer(
                CrcAlgorithm::Crc16CcittFalse,
                &preamble,
                &mut region,
                &[],
                &CorrectionConfig::single_bit(),
            );
            if !outcome.is_corrected() {
                log::trace!(
                    "System34Schema::decode_header(): header CRC error at {}: {}",
                    sync.offset,
                    outcome
                );
                return None;
            }
            corrected = true;
        }

        let (c, h, s, n) = (region[0], region[1], region[2], region[3]);
        if n > MAXIMUM_SIZE_CODE {
            log::trace!("System34Schema::decode_header(): invalid size code {}", n);
            return None;
        }
        let end = (offset + 6 * Self::byte_len(ctx.encoding)) % stream.len();
        Some((DiskChsn::new(c as u16, h, s, n), end, corrected))
    }

    fn byte_len(encoding: TrackEncoding) -> usize {
        match encoding {
            TrackEncoding::Fm => FM_BYTE_LEN,
            _ => MFM_BYTE_LEN,
        }
    }

    fn find_data_mark(stream: &Bitstream, start: usize, ctx: &DecodeContext) -> Option<SyncMatch> {
        let window = DAM_SEARCH_WINDOW_BYTES * Self::byte_len(ctx.encoding);
        match ctx.encoding {
            TrackEncoding::Fm => {
                let dam = find_sync_forward(stream, SyncPattern::FM_DAM, start, window, ctx.sync_max_distance);
                let ddam = find_sync_forward(stream, SyncPattern::FM_DDAM, start, window, ctx.sync_max_distance);
                match (dam, ddam) {
                    (Some(a), Some(b)) => {
                        let dist = |m: &SyncMatch| (m.offset + stream.len() - start) % stream.len();
                        Some(if (a.distance, dist(&a)) <= (b.distance, dist(&b)) { a } else { b })
                    }
                    (a, b) => a.or(b),
                }
            }
            _ => find_sync_forward(stream, SyncPattern::MFM_A1_X3, start, window, ctx.sync_max_distance),
        }
    }

    pub(crate) fn decode_sector(stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector> {
        if !matches!(ctx.encoding, TrackEncoding::Mfm | TrackEncoding::Fm) || stream.is_empty() {
            return None;
        }
        let (id, header_end, header_corrected) = Self::decode_header(stream, header, ctx)?;

        let dam_sync = Self::find_data_mark(stream, header_end, ctx)?;
        let (data_offset, mark) = Self::mark_end(ctx.encoding, stream, &dam_sync);
        let deleted = match mark {
            DDAM_MARKER_BYTE => true,
            0xF9..=DAM_MARKER_BYTE => false,
            _ => {
                log::trace!(
                    "System34Schema::decode_sector(): sector {} has no data mark (found {:02X})",
                    id,
                    mark
                );
                return None;
            }
        };

        let size = id.n_size();
        let stored_len = ctx.crc.stored_len();
        let decoded = Self::decode_bytes(ctx.encoding, stream, data_offset, size + stored_len);
        let (data, stored) = decoded.bytes.split_at(size);

        let mut sector = Sector::new(
            id,
            ctx.crc,
            Self::preamble(ctx.encoding, mark),
            data.to_vec(),
            crc::bytes_to_stored(ctx.crc, stored),
        )
        .ok()?;
        sector.bit_offset = header.offset;
        sector.sync_distance = header.distance.max(dam_sync.distance);
        if deleted {
            sector.flags |= SectorFlags::DELETED;
        }
        if header_corrected {
            sector.flags |= SectorFlags::HEADER_CORRECTED;
        }
        if !decoded.violations.is_empty() {
            sector.flags |= SectorFlags::ENCODING_ERROR;
            for &v in decoded.violations.iter() {
                sector.mark_weak(v);
            }
        }
        log::trace!(
            "System34Schema::decode_sector(): decoded sector {} at bit {} ({} clock violations)",
            id,
            header.offset,
            decoded.violations.len()
        );
        Some(sector)
    }

    /// Lay out an IBM System 34 track. Data lengths must match each sector's size code.
    pub(crate) fn format_track(
        encoding: TrackEncoding,
        _ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError> {
        let crc_algorithm = params.crc.unwrap_or(CrcAlgorithm::Crc16CcittFalse);
        let mut track = Bitstream::with_capacity(DEFAULT_TRACK_SIZE_BYTES * 16);

        match encoding {
            TrackEncoding::Mfm => {
                let gap3 = params.gap3.unwrap_or(54);
                mfm::encode_into(&mut track, &[GAP_BYTE; 80]);
                mfm::encode_into(&mut track, &[SYNC_BYTE; MFM_SYNC_LEN]);
                for _ in 0..3 {
                    mfm::encode_marker(&mut track, MFM_SYNC_C2);
                }
                mfm::encode_into(&mut track, &[IAM_MARKER_BYTE]);
                mfm::encode_into(&mut track, &[GAP_BYTE; 50]);

                for sector in sectors {
                    Self::check_descriptor(sector)?;
                    let (header, data) = Self::sector_fields(sector, crc_algorithm, encoding);

                    mfm::encode_into(&mut track, &[SYNC_BYTE; MFM_SYNC_LEN]);
                    for _ in 0..3 {
                        mfm::encode_marker(&mut track, MFM_SYNC_A1);
                    }
                    mfm::encode_into(&mut track, &header);
                    mfm::encode_into(&mut track, &[GAP_BYTE; 22]);
                    mfm::encode_into(&mut track, &[SYNC_BYTE; MFM_SYNC_LEN]);
                    for _ in 0..3 {
                        mfm::encode_marker(&mut track, MFM_SYNC_A1);
                    }
                    mfm::encode_into(&mut track, &data);
                    mfm::encode_into(&mut track, &vec![GAP_BYTE; gap3]);
                }
                mfm::encode_into(&mut track, &[GAP_BYTE; 100]);
            }
            TrackEncoding::Fm => {
                let gap3 = params.gap3.unwrap_or(27);
                fm::encode_into(&mut track, &[FM_GAP_BYTE; 40]);
                fm::encode_into(&mut track, &[SYNC_BYTE; FM_SYNC_LEN]);
                track.push_bits(FM_IAM as u64, FM_BYTE_LEN);
                fm::encode_into(&mut track, &[FM_GAP_BYTE; 26]);

                for sector in sectors {
                    Self::check_descriptor(sector)?;
                    let (header, data) = Self::sector_fields(sector, crc_algorithm, encoding);

                    fm::encode_into(&mut track, &[SYNC_BYTE; FM_SYNC_LEN]);
                    fm::encode_mark(&mut track, header[0]);
                    fm::encode_into(&mut track, &header[1..]);
                    fm::encode_into(&mut track, &[FM_GAP_BYTE; 11]);
                    fm::encode_into(&mut track, &[SYNC_BYTE; FM_SYNC_LEN]);
                    fm::encode_mark(&mut track, data[0]);
                    fm::encode_into(&mut track, &data[1..]);
                    fm::encode_into(&mut track, &vec![FM_GAP_BYTE; gap3]);
                }
                fm::encode_into(&mut track, &[FM_GAP_BYTE; 100]);
            }
            other => return Err(PipelineError::UnsupportedEncoding(other)),
        }

        log::debug!(
            "System34Schema::format_track(): formatted {} {} sectors in {} bits",
            sectors.len(),
            encoding,
            track.len()
        );
        Ok(track)
    }

    fn check_descriptor(sector: &SectorDescriptor) -> Result<(), PipelineError> {
        if sector.id.n() > MAXIMUM_SIZE_CODE {
            return Err(PipelineError::InvalidSizeCode(sector.id.n()));
        }
        if sector.data.len() != sector.id.n_size() {
            return Err(PipelineError::ParameterError(format!(
                "sector {} data length {} does not match size code",
                sector.id,
                sector.data.len()
            )));
        }
        Ok(())
    }

    /// Build the header field (IDAM, CHSN, CRC) and the data field (mark, data, CRC) of a sector.
    /// The A1 sync bytes of MFM fields are included in the CRC but not in the returned fields.
    fn sector_fields(sector: &SectorDescriptor, crc_algorithm: CrcAlgorithm, encoding: TrackEncoding) -> (Vec<u8>, Vec<u8>) {
        let id = sector.id;
        let fields = [id.c() as u8, id.h(), id.s(), id.n()];
        let header_crc = crc::compute(
            CrcAlgorithm::Crc16CcittFalse,
            &Self::preamble(encoding, IDAM_MARKER_BYTE),
            &fields,
        );
        let mut header = vec![IDAM_MARKER_BYTE];
        header.extend_from_slice(&fields);
        header.extend(header_crc.to_be_bytes());

        let mark = if sector.deleted { DDAM_MARKER_BYTE } else { DAM_MARKER_BYTE };
        let preamble = Self::preamble(encoding, mark);
        let mut data = vec![mark];
        data.extend_from_slice(&sector.data);
        data.extend(crc::stored_to_bytes(
            crc_algorithm,
            crc::compute(crc_algorithm, &preamble, &sector.data),
        ));
        (header, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_schema::TrackSchema;

    fn descriptors(count: u8, n: u8) -> Vec<SectorDescriptor> {
        (1..=count)
            .map(|s| {
                let data = (0..DiskChsn::n_to_bytes(n)).map(|i| (i as u8) ^ s).collect();
                SectorDescriptor::new(DiskChsn::new(5, 1, s, n), data)
            })
            .collect()
    }

    fn round_trip(encoding: TrackEncoding) {
        let sectors = descriptors(4, 1);
        let track = System34Schema::format_track(encoding, DiskCh::new(5, 1), &sectors, &FormatParams::default()).unwrap();
        let ctx = DecodeContext::new(encoding);
        assert!(System34Schema::find_headers(&track, &ctx).len() >= 4);

        let decoded = TrackSchema::System34.decode_track(&track, &ctx);
        assert_eq!(decoded.len(), 4);
        for (sector, desc) in decoded.iter().zip(sectors.iter()) {
            assert_eq!(sector.id, desc.id);
            assert_eq!(sector.data(), &desc.data[..]);
            assert_eq!(
                crc::compute(sector.algorithm(), sector.preamble(), sector.data()),
                sector.crc_stored()
            );
            assert!(sector.weak_bytes.is_empty());
        }
    }

    #[test]
    fn mfm_round_trip() {
        round_trip(TrackEncoding::Mfm);
    }

    #[test]
    fn fm_round_trip() {
        round_trip(TrackEncoding::Fm);
    }

    #[test]
    fn header_single_bit_error_is_corrected() {
        let sectors = descriptors(1, 0);
        let mut track =
            System34Schema::format_track(TrackEncoding::Mfm, DiskCh::new(5, 1), &sectors, &FormatParams::default())
                .unwrap();
        let ctx = DecodeContext::new(TrackEncoding::Mfm);
        let header = System34Schema::find_headers(&track, &ctx)[0];
        // Flip the data bit carrying the MSB of the sector ID byte (C, H, S, N follow the mark).
        let bit = header.offset + 48 + 16 + 2 * 16 + 1;
        track.set(bit, !track.get_wrapped(bit));

        let sector = System34Schema::decode_sector(&track, &header, &ctx).unwrap();
        assert_eq!(sector.id.s(), 1);
        assert!(sector.flags.contains(SectorFlags::HEADER_CORRECTED));
    }

    #[test]
    fn deleted_mark() {
        let mut sectors = descriptors(1, 0);
        sectors[0].deleted = true;
        for encoding in [TrackEncoding::Mfm, TrackEncoding::Fm] {
            let track = System34Schema::format_track(encoding, DiskCh::new(5, 1), &sectors, &FormatParams::default()).unwrap();
            let ctx = DecodeContext::new(encoding);
            let header = System34Schema::find_headers(&track, &ctx)[0];
            let sector = System34Schema::decode_sector(&track, &header, &ctx).unwrap();
            assert!(sector.is_deleted());
            assert_eq!(sector.preamble().last(), Some(&DDAM_MARKER_BYTE));
        }
    }
}
