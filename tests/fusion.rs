mod common;

use common::*;
use fluxrecover::{crc, fusion::fuse, prelude::*};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const PREAMBLE: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];

fn read_of(algorithm: CrcAlgorithm, data: &[u8]) -> Sector {
    let stored = crc::compute(algorithm, &PREAMBLE, data);
    Sector::new(DiskChsn::new(2, 1, 5, 2), algorithm, PREAMBLE.to_vec(), data.to_vec(), stored).unwrap()
}

fn with_byte(sector: &Sector, index: usize, value: u8) -> Sector {
    let mut region = sector.region();
    region[index] = value;
    let mut damaged = sector.clone();
    damaged.set_region(&region).unwrap();
    damaged.mark_weak(index);
    damaged
}

#[test]
fn test_fusion_two_of_three_majority() {
    init();
    let good = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(512, 5));
    let reads = [
        with_byte(&good, 10, 0x00),
        with_byte(&good, 200, 0xFF),
        with_byte(&good, 300, 0x13),
    ];
    let votes: Vec<SectorRead> = reads.iter().map(|s| SectorRead::new(s, 1.0)).collect();
    let result = fuse(&votes, &FusionConfig::default()).unwrap();

    assert!(result.verified);
    assert!(!result.combination_used);
    assert!(result.weak_bytes.is_empty(), "2 of 3 agreement is not weak");
    assert_eq!(result.sector.data(), good.data());
    assert!(result.sector.crc_ok());
    assert!(result.sector.weak_bytes.is_empty());
    assert!(!result.sector.flags.contains(SectorFlags::WEAK));
    assert_eq!(result.reads, 3);

    // Confidence is the mean byte agreement: three bytes at 2/3, the rest unanimous.
    let expected = (514.0 - 1.0) / 514.0;
    assert!((result.sector.confidence() - expected).abs() < 1e-4);
    assert!(result.sector.confidence() < 1.0);
}

#[test]
fn test_fusion_three_way_split_is_weak() {
    init();
    let good = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(512, 6));
    let original = good.data()[20];
    let a = with_byte(&good, 20, original ^ 0x01);
    let b = with_byte(&good, 20, original ^ 0x80);

    // The correct value comes from the best read and wins the tie outright.
    let votes = [SectorRead::new(&a, 0.8), SectorRead::new(&b, 0.8), SectorRead::new(&good, 0.9)];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert_eq!(result.weak_bytes, vec![20]);
    assert!((result.byte_confidence[20] - 1.0 / 3.0).abs() < 1e-6);
    assert!(result.verified);
    assert!(!result.combination_used);
    assert_eq!(result.sector.weak_bytes, vec![20]);

    // A wrong value wins the tie; the combination search recovers the observed correct value.
    let votes = [SectorRead::new(&a, 0.9), SectorRead::new(&b, 0.8), SectorRead::new(&good, 0.8)];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert!(result.verified);
    assert!(result.combination_used);
    assert_eq!(result.sector.data(), good.data());

    // Without the budget to try it, the sector stays unverified.
    let config = FusionConfig {
        max_combinations: 0,
        ..FusionConfig::default()
    };
    let result = fuse(&votes, &config).unwrap();
    assert!(!result.verified);
    assert!(!result.sector.crc_ok());
    assert!(result.sector.confidence() <= 0.5);
}

#[test]
fn test_fusion_equal_quality_tie_prefers_earlier_read() {
    init();
    let good = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(256, 1));
    let bad = with_byte(&good, 7, 0x00);
    let votes = [SectorRead::new(&good, 0.5), SectorRead::new(&bad, 0.5)];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert_eq!(result.weak_bytes, vec![7]);
    assert!(result.verified);
    assert!(!result.combination_used);
}

#[test]
fn test_fusion_never_combines_xor_checks() {
    init();
    let good = read_of(CrcAlgorithm::Xor8, &sector_data(256, 2));
    let a = with_byte(&good, 30, 0x01);
    let b = with_byte(&good, 30, 0x02);
    let votes = [SectorRead::new(&a, 1.0), SectorRead::new(&b, 1.0), SectorRead::new(&good, 0.5)];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert!(!result.verified);
    assert!(!result.combination_used);
    assert_eq!(result.weak_bytes, vec![30]);
}

#[test]
fn test_fusion_agreeing_wrong_reads_stay_unverified() {
    init();
    let good = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(512, 8));
    let bad = with_byte(&with_byte(&good, 40, 0x00), 41, 0x00);
    let votes = [SectorRead::new(&bad, 1.0), SectorRead::new(&bad, 1.0)];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert!(!result.verified);
    assert!(result.weak_bytes.is_empty());
    // Unanimous but unverified: half confidence.
    assert!((result.sector.confidence() - 0.5).abs() < 1e-6);
    assert!(result.sector.is_suspect());
}

#[test]
fn test_fusion_ignores_reads_of_another_length() {
    init();
    let good = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(512, 9));
    let short = read_of(CrcAlgorithm::Crc16CcittFalse, &sector_data(128, 9));
    let votes = [
        SectorRead::new(&short, 1.0),
        SectorRead::new(&good, 0.7),
        SectorRead::new(&good, 0.7),
    ];
    let result = fuse(&votes, &FusionConfig::default()).unwrap();
    assert_eq!(result.reads, 2);
    assert_eq!(result.sector.len(), 512);
    assert!(result.verified);

    assert!(fuse(&[SectorRead::new(&short, 1.0), SectorRead::new(&good, 1.0)], &FusionConfig::default()).is_none());
}
