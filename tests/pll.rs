mod common;

use common::*;
use fluxrecover::prelude::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The bits a PLL can recover from a capture of `bits`: everything up to the final transition.
fn recoverable(bits: &Bitstream) -> Vec<bool> {
    let last_one = bits.iter().enumerate().filter(|(_, b)| *b).map(|(i, _)| i).last();
    match last_one {
        Some(i) => bits.iter().take(i + 1).collect(),
        None => Vec::new(),
    }
}

fn assert_exact(decoded: &PllDecodeResult, bits: &Bitstream) {
    let expected = recoverable(bits);
    let actual: Vec<bool> = decoded.bits.iter().collect();
    assert_eq!(actual.len(), expected.len(), "decoded length mismatch");
    if let Some(i) = actual.iter().zip(expected.iter()).position(|(a, e)| a != e) {
        panic!("decoded bitstream differs from original at bit {}", i);
    }
}

fn mfm_track() -> Bitstream {
    let ch = DiskCh::new(0, 0);
    format_track(TrackEncoding::Mfm, ch, &descriptors(TrackEncoding::Mfm, ch, 9))
}

#[test]
fn test_pll_exact_round_trip() {
    init();
    for encoding in [
        TrackEncoding::Mfm,
        TrackEncoding::Fm,
        TrackEncoding::GcrCommodore,
        TrackEncoding::GcrApple,
    ] {
        let ch = DiskCh::new(1, 0);
        let bits = format_track(encoding, ch, &descriptors(encoding, ch, 4));
        let decoded = Pll::from_profile(PllProfile::for_encoding(encoding)).decode(&ideal_flux(&bits, encoding));
        assert_eq!(decoded.dropped, 0, "{} capture dropped transitions", encoding);
        assert_eq!(decoded.final_cell_ns as u64, cell_ns(encoding));
        assert_eq!(decoded.quality(), 1.0);
        assert_exact(&decoded, &bits);
    }
}

#[test]
fn test_pll_high_density() {
    init();
    let bits = mfm_track();
    let sample = FluxSample::from_bitstream(&bits, PllProfile::MFM_HD.cell_ns() as u64);
    let decoded = Pll::from_profile(PllProfile::MFM_HD).decode(&sample);
    assert_exact(&decoded, &bits);

    // The same capture read with a double density profile is garbage.
    let decoded = Pll::from_profile(PllProfile::MFM_DD).decode(&sample);
    assert_ne!(decoded.bits.len(), recoverable(&bits).len());
}

#[test]
fn test_pll_tolerates_jitter() {
    init();
    let bits = mfm_track();
    for (i, jitter) in [0.02, 0.05, 0.08].into_iter().enumerate() {
        let sample = jittered_flux(&bits, 2000, jitter, TEST_SEED + i as u64);
        let decoded = Pll::from_profile(PllProfile::MFM_DD).decode(&sample);
        assert_eq!(decoded.dropped, 0);
        assert_exact(&decoded, &bits);
    }
}

#[test]
fn test_pll_tracks_spindle_drift() {
    init();
    // The cell time drifts from 2000ns to 2150ns across the revolution.
    let bits = mfm_track();
    let ones: Vec<usize> = bits.iter().enumerate().filter(|(_, b)| *b).map(|(i, _)| i).collect();
    let total = bits.len() as f64;
    let mut time = 0.0f64;
    let mut last = 0usize;
    let mut timestamps = Vec::with_capacity(ones.len());
    for &i in ones.iter() {
        let cell = 2000.0 + 150.0 * (i as f64 / total);
        time += (i + 1 - last) as f64 * cell;
        last = i + 1;
        timestamps.push(time as u64);
    }

    let decoded = Pll::from_profile(PllProfile::MFM_DD).decode(&FluxSample::new(timestamps));
    assert_eq!(decoded.dropped, 0);
    assert_exact(&decoded, &bits);
    assert!(decoded.final_cell_ns > 2100, "final cell {} did not follow drift", decoded.final_cell_ns);
}

#[test]
fn test_pll_drops_missing_flux() {
    init();
    // 100 two-cell runs, a 40 cell hole, then 100 more two-cell runs.
    let mut deltas = vec![4000u64; 100];
    deltas.push(80_000);
    deltas.extend(vec![4000u64; 100]);
    let decoded = Pll::from_profile(PllProfile::MFM_DD).decode(&FluxSample::from_deltas(&deltas));
    assert_eq!(decoded.dropped, 1);
    assert_eq!(decoded.final_cell_ns, 2000);
    // The hole is capped at the maximum run length.
    assert_eq!(decoded.bits.len(), 200 * 2 + PllProfile::MFM_DD.max_run_cells() as usize);
    assert!(decoded.quality() < 1.0);
}

#[test]
fn test_pll_degenerate_captures() {
    init();
    let pll = Pll::from_profile(PllProfile::MFM_DD);

    let decoded = pll.decode(&FluxSample::default());
    assert!(decoded.bits.is_empty());
    assert_eq!(decoded.dropped, 0);

    let decoded = pll.decode(&FluxSample::new(vec![0; 1000]));
    assert!(decoded.bits.is_empty());
    assert_eq!(decoded.dropped, 1000);

    // Time running backwards produces zero-length intervals, not a panic.
    let decoded = pll.decode(&FluxSample::new(vec![8000, 4000, 12000, 2000]));
    assert_eq!(decoded.dropped, 2);
    assert_eq!(decoded.bits.len(), 4 + 2);
}
