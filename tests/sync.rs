mod common;

use common::*;
use fluxrecover::{
    prelude::*,
    sync::{find_sync, find_sync_forward},
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An MFM encoded run of zero bytes: alternating clock and data cells.
fn zero_fill(bytes: usize) -> Bitstream {
    let mut stream = Bitstream::new();
    for _ in 0..bytes {
        stream.push_bits(0xAAAA, 16);
    }
    stream
}

fn splice(stream: &mut Bitstream, offset: usize, value: u64, width: usize) {
    for i in 0..width {
        let bit = (value >> (width - 1 - i)) & 1 != 0;
        stream.set((offset + i) % stream.len(), bit);
    }
}

#[test]
fn test_sync_exact_match() {
    init();
    let mut stream = zero_fill(64);
    splice(&mut stream, 301, 0x4489, 16);

    let matches = find_sync(&stream, SyncPattern::MFM_A1, 0);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offset, 301);
    assert_eq!(matches[0].distance, 0);
    assert_eq!(matches[0].end(stream.len()), 317);
}

#[test]
fn test_sync_wraps_around_index() {
    init();
    let mut stream = zero_fill(64);
    let offset = stream.len() - 5;
    splice(&mut stream, offset, 0x4489, 16);

    let matches = find_sync(&stream, SyncPattern::MFM_A1, 0);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offset, offset);
    assert_eq!(matches[0].end(stream.len()), 11);
}

#[test]
fn test_sync_fuzzy_match() {
    init();
    let mut stream = zero_fill(64);
    // 0x4489 with one bit flipped.
    splice(&mut stream, 160, 0x4489 ^ 0x0100, 16);

    assert!(find_sync(&stream, SyncPattern::MFM_A1, 0).is_empty());
    let matches = find_sync(&stream, SyncPattern::MFM_A1, 1);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offset, 160);
    assert_eq!(matches[0].distance, 1);

    // Candidates are ranked by distance before offset.
    splice(&mut stream, 480, 0x4489, 16);
    let matches = find_sync(&stream, SyncPattern::MFM_A1, 1);
    assert_eq!(matches[0].offset, 480);
    assert_eq!(matches[0].distance, 0);
    assert_eq!(matches[1].offset, 160);
}

#[test]
fn test_sync_forward_window() {
    init();
    let mut stream = zero_fill(64);
    splice(&mut stream, 200, 0x4489, 16);
    splice(&mut stream, 600, 0x4489, 16);

    let found = find_sync_forward(&stream, SyncPattern::MFM_A1, 100, 200, 0).unwrap();
    assert_eq!(found.offset, 200);
    let found = find_sync_forward(&stream, SyncPattern::MFM_A1, 300, 400, 0).unwrap();
    assert_eq!(found.offset, 600);
    assert!(find_sync_forward(&stream, SyncPattern::MFM_A1, 300, 200, 0).is_none());
}

#[test]
fn test_sync_short_stream() {
    init();
    let stream: Bitstream = [true, false, false, true, false].into_iter().collect();
    assert!(find_sync(&stream, SyncPattern::MFM_A1, 4).is_empty());
    assert!(find_sync(&Bitstream::new(), SyncPattern::C1541_SYNC, 0).is_empty());
}

#[test]
fn test_sync_invalid_pattern() {
    init();
    assert!(SyncPattern::new(0x4489, 0).is_err());
    assert!(SyncPattern::new(0x4489, 65).is_err());
    assert!(SyncPattern::new(0x1_0000, 16).is_err());
    assert_eq!(SyncPattern::new(0x4489, 16).unwrap(), SyncPattern::MFM_A1);
}

#[test]
fn test_sync_finds_every_mfm_address_mark() {
    init();
    let ch = DiskCh::new(0, 0);
    let track = format_track(TrackEncoding::Mfm, ch, &descriptors(TrackEncoding::Mfm, ch, 9));
    // One A1 x3 sync ahead of each IDAM and each DAM.
    let matches = find_sync(&track, SyncPattern::MFM_A1_X3, 0);
    assert_eq!(matches.len(), 18);
    assert!(matches.windows(2).all(|w| w[0].offset < w[1].offset));
}
