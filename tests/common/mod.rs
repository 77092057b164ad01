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

    tests/common/mod.rs

    Common support routines for tests
*/
#![allow(dead_code)]

use fluxrecover::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seed for every randomized capture, so that failures are reproducible.
pub const TEST_SEED: u64 = 0x0F1A_55ED;

/// Raw bits per MFM or FM byte.
pub const CLOCKED_BYTE_LEN: usize = 16;

/// Deterministic sector contents that differ between sectors.
pub fn sector_data(len: usize, sector: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(29).wrapping_add(sector.wrapping_mul(71)) ^ 0x5A)
        .collect()
}

/// Size code and first sector ID of the synthetic tracks built for each encoding.
pub fn layout(encoding: TrackEncoding) -> (u8, u8) {
    match encoding {
        TrackEncoding::Mfm => (2, 1),
        TrackEncoding::Fm => (0, 1),
        TrackEncoding::GcrCommodore | TrackEncoding::GcrApple => (1, 0),
    }
}

/// Describe `count` consecutive sectors for a track.
pub fn descriptors(encoding: TrackEncoding, ch: DiskCh, count: u8) -> Vec<SectorDescriptor> {
    let (n, first) = layout(encoding);
    (first..first + count)
        .map(|s| {
            SectorDescriptor::new(
                DiskChsn::new(ch.c(), ch.h(), s, n),
                sector_data(DiskChsn::n_to_bytes(n), s),
            )
        })
        .collect()
}

/// Describe a full Amiga trackdisk track: sectors 0 to `count - 1`, 512 bytes each.
pub fn amiga_descriptors(ch: DiskCh, count: u8) -> Vec<SectorDescriptor> {
    (0..count)
        .map(|s| SectorDescriptor::new(DiskChsn::new(ch.c(), ch.h(), s, 2), sector_data(512, s)))
        .collect()
}

/// Describe `count` sectors laid out the way `schema` numbers them.
pub fn schema_descriptors(schema: TrackSchema, encoding: TrackEncoding, ch: DiskCh, count: u8) -> Vec<SectorDescriptor> {
    match schema {
        TrackSchema::Amiga => amiga_descriptors(ch, count),
        _ => descriptors(encoding, ch, count),
    }
}

pub fn format_schema_track(schema: TrackSchema, encoding: TrackEncoding, ch: DiskCh, sectors: &[SectorDescriptor]) -> Bitstream {
    schema
        .format_track(encoding, ch, sectors, &FormatParams::default())
        .expect("Failed to format track")
}

pub fn format_track(encoding: TrackEncoding, ch: DiskCh, sectors: &[SectorDescriptor]) -> Bitstream {
    TrackSchema::from(encoding)
        .format_track(encoding, ch, sectors, &FormatParams::default())
        .expect("Failed to format track")
}

pub fn cell_ns(encoding: TrackEncoding) -> u64 {
    PllProfile::for_encoding(encoding).cell_ns() as u64
}

/// An ideal capture of `bits` at the nominal cell time for `encoding`.
pub fn ideal_flux(bits: &Bitstream, encoding: TrackEncoding) -> FluxSample {
    FluxSample::from_bitstream(bits, cell_ns(encoding))
}

/// A capture of `bits` with every transition displaced by up to `jitter` cells, uniformly
/// distributed. Cells are `cell_ns` long.
pub fn jittered_flux(bits: &Bitstream, cell_ns: u64, jitter: f64, seed: u64) -> FluxSample {
    let mut rng = StdRng::seed_from_u64(seed);
    let max = (cell_ns as f64 * jitter) as i64;
    let timestamps = bits
        .iter()
        .enumerate()
        .filter(|(_, bit)| *bit)
        .map(|(i, _)| {
            let ideal = ((i as u64 + 1) * cell_ns) as i64;
            let noise = if max > 0 { rng.gen_range(-max..=max) } else { 0 };
            (ideal + noise) as u64
        })
        .collect();
    FluxSample::new(timestamps)
}

/// Header sync offset of sector `sector_id` on a clean System 34 track.
pub fn header_offset(encoding: TrackEncoding, track: &Bitstream, sector_id: u8) -> usize {
    TrackSchema::System34
        .decode_track(track, &DecodeContext::new(encoding))
        .into_iter()
        .find(|s| s.id.s() == sector_id)
        .map(|s| s.bit_offset)
        .expect("Sector not found on track")
}

/// Raw bit offset of the first data byte of a System 34 sector, relative to its header sync.
pub fn data_field_offset(encoding: TrackEncoding, header_offset: usize) -> usize {
    match encoding {
        // IDAM, header, gap2, sync, DAM
        TrackEncoding::Fm => header_offset + (1 + 6 + 11 + 6 + 1) * CLOCKED_BYTE_LEN,
        // A1 x3, IDAM, header, gap2, sync, A1 x3, DAM
        _ => header_offset + (3 + 1 + 6 + 22 + 12 + 3 + 1) * CLOCKED_BYTE_LEN,
    }
}

/// Set the data cell of `bit` (0 is the MSB) of data byte `byte` of a System 34 sector. The bit must
/// be clear. Setting a cell only ever shortens flux intervals, so the PLL recovers the damaged
/// stream exactly; the decoder sees a changed byte and a clock violation.
pub fn set_data_bit(encoding: TrackEncoding, track: &mut Bitstream, header_offset: usize, byte: usize, bit: usize) {
    let cell = data_field_offset(encoding, header_offset) + byte * CLOCKED_BYTE_LEN + bit * 2 + 1;
    assert!(!track[cell], "data bit {} of byte {} is already set", bit, byte);
    track.set(cell, true);
}

/// Build an MFM track whose sector `sector_id` has the given data bytes cleared, so that
/// [set_data_bit] can damage them.
pub fn mfm_track_with_clear_bytes(ch: DiskCh, count: u8, sector_id: u8, clear: &[usize]) -> (Vec<SectorDescriptor>, Bitstream) {
    let mut sectors = descriptors(TrackEncoding::Mfm, ch, count);
    if let Some(sector) = sectors.iter_mut().find(|s| s.id.s() == sector_id) {
        for &byte in clear {
            sector.data[byte] = 0;
        }
    }
    let track = format_track(TrackEncoding::Mfm, ch, &sectors);
    (sectors, track)
}

/// Count of positions at which two buffers differ.
pub fn differing_bytes(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() + a.len().abs_diff(b.len())
}
