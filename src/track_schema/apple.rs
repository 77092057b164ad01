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

    src/track_schema/apple.rs

    Implements the Apple DOS 3.3 6-and-2 GCR track schema.
*/

//! An Apple DOS 3.3 sector consists of an address field (prologue D5 AA 96, then volume, track,
//! sector and checksum in 4-and-4 encoding, then epilogue DE AA EB) and a data field (prologue
//! D5 AA AD, 343 6-and-2 disk bytes, then epilogue DE AA EB). Fields are separated by self-sync
//! bytes: 0xFF followed by two zero bits.

use crate::{
    bitstream::Bitstream,
    bitstream_codec::gcr::{self, GcrVariant, GcrViterbi, APPLE_62_VALUES, APPLE_SECTOR_SIZE},
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

pub const ADDRESS_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];
pub const DATA_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0xAD];
pub const EPILOGUE: [u8; 3] = [0xDE, 0xAA, 0xEB];

/// Disk bytes in the 4-and-4 encoded volume, track, sector and checksum.
const ADDRESS_FIELD_LEN: usize = 8;
const GAP1_SYNC_BYTES: usize = 40;
const GAP2_SYNC_BYTES: usize = 6;
const DEFAULT_GAP3_SYNC_BYTES: usize = 16;
/// Bit window following an address field in which the data prologue must begin.
const DATA_PROLOGUE_WINDOW: usize = 400;

pub struct AppleSchema;

impl AppleSchema {
    pub(crate) fn find_headers(stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch> {
        find_sync(stream, SyncPattern::APPLE_ADDR, ctx.sync_max_distance)
    }

    /// Decode the address field following a prologue into (volume, track, sector). Every disk byte
    /// must be a legal 4-and-4 byte and the checksum must match.
    fn decode_address(stream: &Bitstream, header: &SyncMatch) -> Option<(u8, u8, u8)> {
        let start = header.end(stream.len());
        let raw: Vec<u8> = (0..ADDRESS_FIELD_LEN)
            .map(|i| stream.read_byte_wrapped(start + i * 8))
            .collect();
        if !raw.iter().all(|&b| gcr::is_apple_44(b)) {
            return None;
        }
        let fields: Vec<u8> = raw.chunks_exact(2).map(|p| gcr::apple_decode_44(p[0], p[1])).collect();
        let (volume, track, sector, checksum) = (fields[0], fields[1], fields[2], fields[3]);
        if checksum != volume ^ track ^ sector {
            log::trace!(
                "AppleSchema::decode_address(): bad address checksum at {}: {:02X}",
                header.offset,
                checksum
            );
            return None;
        }
        Some((volume, track, sector))
    }

    pub(crate) fn decode_sector(stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector> {
        if stream.is_empty() {
            return None;
        }
        let (_volume, track, s) = Self::decode_address(stream, header)?;
        let address_end = (header.end(stream.len()) + ADDRESS_FIELD_LEN * 8) % stream.len();

        let data_sync = find_sync_forward(
            stream,
            SyncPattern::APPLE_DATA,
            address_end,
            DATA_PROLOGUE_WINDOW,
            ctx.sync_max_distance,
        )?;
        let field = GcrViterbi::new(GcrVariant::Apple, ctx.viterbi).ok()?.decode(
            stream,
            data_sync.end(stream.len()),
            APPLE_62_VALUES + 1,
        )?;
        let (data, stored) = gcr::apple_62_decode(&field.symbols)?;

        let id = DiskChsn::new(track as u16, ctx.head, s, 1);
        let mut sector = Sector::new(id, CrcAlgorithm::AppleChain, Vec::new(), data.to_vec(), stored as u32).ok()?;
        sector.bit_offset = header.offset;
        sector.sync_distance = header.distance.max(data_sync.distance);
        if field.slips > 0 {
            sector.flags |= SectorFlags::BIT_SLIP;
        }
        if !field.illegal.is_empty() {
            sector.flags |= SectorFlags::ENCODING_ERROR;
            for &k in field.illegal.iter() {
                for index in gcr::apple_62_symbol_bytes(k) {
                    sector.mark_weak(index);
                }
            }
        }
        Some(sector)
    }

    fn push_self_sync(track: &mut Bitstream, count: usize) {
        for _ in 0..count {
            track.push_bits(0xFF, 8);
            track.push_bits(0, 2);
        }
    }

    pub(crate) fn format_track(
        encoding: TrackEncoding,
        ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError> {
        if encoding != TrackEncoding::GcrApple {
            return Err(PipelineError::UnsupportedEncoding(encoding));
        }
        let gap3 = params.gap3.unwrap_or(DEFAULT_GAP3_SYNC_BYTES);
        let volume = params.volume;
        let track_number = ch.c() as u8;
        let mut track = Bitstream::new();
        Self::push_self_sync(&mut track, GAP1_SYNC_BYTES);

        for sector in sectors {
            let data: &[u8; APPLE_SECTOR_SIZE] = sector.data.as_slice().try_into().map_err(|_| {
                PipelineError::ParameterError(format!(
                    "sector {} must be {} bytes, got {}",
                    sector.id,
                    APPLE_SECTOR_SIZE,
                    sector.data.len()
                ))
            })?;
            let s = sector.id.s();

            track.push_bytes(&ADDRESS_PROLOGUE);
            for value in [volume, track_number, s, volume ^ track_number ^ s] {
                track.push_bytes(&gcr::apple_encode_44(value));
            }
            track.push_bytes(&EPILOGUE);
            Self::push_self_sync(&mut track, GAP2_SYNC_BYTES);

            track.push_bytes(&DATA_PROLOGUE);
            track.push_bytes(&gcr::apple_62_encode(data));
            track.push_bytes(&EPILOGUE);
            Self::push_self_sync(&mut track, gap3);
        }

        log::debug!(
            "AppleSchema::format_track(): formatted track {} with {} sectors in {} bits",
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
    use crate::{crc, track_schema::TrackSchema};

    #[test]
    fn round_trip() {
        let sectors: Vec<SectorDescriptor> = (0..4u8)
            .map(|s| {
                let data = (0..APPLE_SECTOR_SIZE).map(|i| (i as u8).wrapping_add(s * 31)).collect();
                SectorDescriptor::new(DiskChsn::new(3, 0, s, 1), data)
            })
            .collect();
        let track =
            AppleSchema::format_track(TrackEncoding::GcrApple, DiskCh::new(3, 0), &sectors, &FormatParams::default())
                .unwrap();
        let ctx = DecodeContext::new(TrackEncoding::GcrApple);
        let decoded = TrackSchema::Apple.decode_track(&track, &ctx);
        assert_eq!(decoded.len(), 4);
        for (sector, desc) in decoded.iter().zip(sectors.iter()) {
            assert_eq!(sector.id, DiskChsn::new(3, 0, desc.id.s(), 1));
            assert_eq!(sector.data(), &desc.data[..]);
            assert_eq!(
                crc::compute(CrcAlgorithm::AppleChain, &[], sector.data()),
                sector.crc_stored()
            );
        }
    }

    #[test]
    fn damaged_address_is_rejected() {
        let sectors = vec![SectorDescriptor::new(DiskChsn::new(3, 0, 5, 1), vec![0xA5; APPLE_SECTOR_SIZE])];
        let mut track =
            AppleSchema::format_track(TrackEncoding::GcrApple, DiskCh::new(3, 0), &sectors, &FormatParams::default())
                .unwrap();
        let ctx = DecodeContext::new(TrackEncoding::GcrApple);
        let header = AppleSchema::find_headers(&track, &ctx)[0];
        // Flip the low bit of the odd sector byte; the checksum no longer matches.
        let bit = header.offset + 24 + 4 * 8 + 7;
        track.set(bit, !track.get_wrapped(bit));
        assert!(AppleSchema::decode_sector(&track, &header, &ctx).is_none());
    }
}
