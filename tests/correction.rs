mod common;

use common::*;
use fluxrecover::{
    correction::{correct_buffer, correct_sector},
    crc,
    prelude::*,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const PREAMBLE: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];

fn verified_sector(algorithm: CrcAlgorithm) -> Sector {
    verified_sector_sized(algorithm, 512)
}

fn verified_sector_sized(algorithm: CrcAlgorithm, len: usize) -> Sector {
    let data = sector_data(len, 3);
    let stored = crc::compute(algorithm, &PREAMBLE, &data);
    let n = DiskChsn::bytes_to_n(len).unwrap();
    let mut sector = Sector::new(DiskChsn::new(0, 0, 3, n), algorithm, PREAMBLE.to_vec(), data, stored).unwrap();
    assert!(crc::verify(&mut sector).ok);
    sector
}

#[test]
fn test_correction_single_bit_anywhere() {
    init();
    for algorithm in [CrcAlgorithm::Crc16CcittFalse, CrcAlgorithm::Crc16Arc] {
        let original = verified_sector(algorithm);
        // First and last data bits, a middle bit, and a bit of the stored check.
        for bit in [0usize, 4095, 2021, 4096 + 9] {
            let mut damaged = original.clone();
            damaged.flip_bit(bit);
            assert!(!crc::verify(&mut damaged).ok);

            let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
            assert_eq!(outcome, CorrectionOutcome::Corrected { flipped: vec![bit] });
            assert_eq!(damaged.data(), original.data());
            assert_eq!(damaged.crc_stored(), original.crc_stored());
            assert!(damaged.crc_ok());
            assert!(damaged.flags.contains(SectorFlags::CORRECTED));
            assert_eq!(damaged.read_count, 2);
            assert!((damaged.confidence() - 0.95).abs() < 1e-6);
        }
    }
}

#[test]
fn test_correction_single_bit_beyond_crc_period() {
    init();
    // A 4096 byte sector spans more than one period of the CRC-16 polynomial, so the last data bit
    // and the first data bit produce the same syndrome.
    let original = verified_sector_sized(CrcAlgorithm::Crc16CcittFalse, 4096);
    assert!(original.region_bits() > crc::CRC16_PERIOD_BITS);

    let mut damaged = original.clone();
    damaged.flip_bit(4095 * 8 + 7);
    let before = damaged.clone();
    let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
    assert!(matches!(outcome, CorrectionOutcome::Ambiguous { .. }), "{}", outcome);
    assert_eq!(damaged, before);
    assert!(!damaged.crc_ok());
    assert!(!damaged.flags.contains(SectorFlags::CORRECTED));

    let mut region = before.region();
    let outcome = correct_buffer(
        CrcAlgorithm::Crc16CcittFalse,
        &PREAMBLE,
        &mut region,
        &[],
        &CorrectionConfig::single_bit(),
    );
    assert!(matches!(outcome, CorrectionOutcome::Ambiguous { .. }), "{}", outcome);
    assert_eq!(region, before.region());

    // A bit with no alias a period away is still repaired.
    let mut damaged = original.clone();
    damaged.flip_bit(20000);
    let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
    assert_eq!(outcome, CorrectionOutcome::Corrected { flipped: vec![20000] });
    assert_eq!(damaged.data(), original.data());
    assert!(damaged.crc_ok());
}

#[test]
fn test_correction_double_bit_near_weak_byte() {
    init();
    let original = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    let mut damaged = original.clone();
    damaged.flip_bit(100 * 8 + 1);
    damaged.flip_bit(100 * 8 + 5);
    damaged.mark_weak(100);

    let config = CorrectionConfig {
        window_bytes: 2,
        ..CorrectionConfig::default()
    };
    let outcome = correct_sector(&mut damaged, &config);
    assert_eq!(outcome, CorrectionOutcome::Corrected { flipped: vec![801, 805] });
    assert_eq!(damaged.data(), original.data());
    assert!(damaged.crc_ok());
    assert!((damaged.confidence() - 0.90).abs() < 1e-6);
}

#[test]
fn test_correction_ambiguous_double_bit() {
    init();
    // Within a 16 byte window around byte 100 two different bit pairs produce this syndrome.
    let original = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    let mut damaged = original.clone();
    damaged.flip_bit(801);
    damaged.flip_bit(805);
    damaged.mark_weak(100);

    let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
    assert!(matches!(outcome, CorrectionOutcome::Ambiguous { .. }), "{}", outcome);
    assert!(!damaged.crc_ok());
    assert!(!damaged.flags.contains(SectorFlags::CORRECTED));
    assert_ne!(damaged.data(), original.data());
}

#[test]
fn test_correction_double_bit_needs_weak_markers() {
    init();
    let mut damaged = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    damaged.flip_bit(801);
    damaged.flip_bit(805);

    let before = damaged.clone();

    let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
    assert!(matches!(outcome, CorrectionOutcome::NotFound { .. }), "{}", outcome);
    assert!(!damaged.crc_ok());
    assert_eq!(damaged, before);

    // Errors too far apart for the window are not found either.
    let mut damaged = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    damaged.flip_bit(801);
    damaged.flip_bit(1605);
    damaged.mark_weak(100);
    damaged.mark_weak(200);
    let outcome = correct_sector(&mut damaged, &CorrectionConfig::default());
    assert!(matches!(outcome, CorrectionOutcome::NotFound { .. }), "{}", outcome);
}

#[test]
fn test_correction_budget() {
    init();
    let mut damaged = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    damaged.flip_bit(801);
    damaged.flip_bit(805);
    damaged.mark_weak(100);

    let config = CorrectionConfig {
        max_trials: 10,
        ..CorrectionConfig::default()
    };
    let outcome = correct_sector(&mut damaged, &config);
    assert!(matches!(outcome, CorrectionOutcome::BudgetExhausted { .. }), "{}", outcome);
    assert!(!damaged.crc_ok());

    // Single-bit mode never starts the double-bit search.
    let outcome = correct_sector(&mut damaged, &CorrectionConfig::single_bit());
    assert!(matches!(outcome, CorrectionOutcome::NotFound { .. }), "{}", outcome);

    let outcome = correct_sector(&mut damaged, &CorrectionConfig::disabled());
    assert_eq!(outcome, CorrectionOutcome::NotFound { trials: 0 });
}

#[test]
fn test_correction_leaves_valid_and_unsupported_alone() {
    init();
    let mut valid = verified_sector(CrcAlgorithm::Crc16CcittFalse);
    let before = valid.clone();
    assert_eq!(
        correct_sector(&mut valid, &CorrectionConfig::default()),
        CorrectionOutcome::AlreadyValid
    );
    assert_eq!(valid, before);

    let mut region = sector_data(257, 4);
    let copy = region.clone();
    assert_eq!(
        correct_buffer(CrcAlgorithm::Xor8, &[], &mut region, &[], &CorrectionConfig::default()),
        CorrectionOutcome::Unsupported
    );
    assert_eq!(region, copy);
}
