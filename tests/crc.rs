mod common;

use common::*;
use fluxrecover::{crc, prelude::*};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const MFM_DAM_PREAMBLE: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];

fn sector(algorithm: CrcAlgorithm, data: Vec<u8>) -> Sector {
    let stored = crc::compute(algorithm, &MFM_DAM_PREAMBLE, &data);
    Sector::new(DiskChsn::new(0, 0, 1, 2), algorithm, MFM_DAM_PREAMBLE.to_vec(), data, stored).unwrap()
}

#[test]
fn test_crc_ibm_reference_values() {
    init();
    // IDAM of C0 H0 R1 N2.
    assert_eq!(crc::compute(CrcAlgorithm::Crc16CcittFalse, &[0xA1, 0xA1, 0xA1, 0xFE], &[0, 0, 1, 2]), 0xCA6F);
    // A freshly formatted 512 byte sector.
    assert_eq!(
        crc::compute(CrcAlgorithm::Crc16CcittFalse, &MFM_DAM_PREAMBLE, &[0xE5; 512]),
        0xC40B
    );
    // FM headers have no A1 sync bytes in the preamble.
    assert_eq!(crc::compute(CrcAlgorithm::Crc16CcittFalse, &[0xFE], &[0, 0, 1, 0]), 0xD2C3);
}

#[test]
fn test_crc_verify_is_idempotent() {
    init();
    for algorithm in [CrcAlgorithm::Crc16CcittFalse, CrcAlgorithm::Crc16Arc] {
        let mut s = sector(algorithm, sector_data(512, 3));
        let first = crc::verify(&mut s);
        let second = crc::verify(&mut s);
        assert!(first.ok);
        assert_eq!(first, second);
        assert!(s.crc_ok());
        assert_eq!(s.crc_calculated(), s.crc_stored());

        // Any change to the payload invalidates the verification until it is repeated.
        s.flip_bit(1234);
        assert!(!s.crc_ok());
        let check = crc::verify(&mut s);
        assert!(!check.ok);
        assert_eq!(check, crc::verify(&mut s));
        assert!(s.confidence() < 1.0);
    }
}

#[test]
fn test_crc_arc_is_not_ccitt() {
    init();
    let data = sector_data(256, 7);
    let ccitt = sector(CrcAlgorithm::Crc16CcittFalse, data.clone());
    let mut as_arc = Sector::new(
        ccitt.id,
        CrcAlgorithm::Crc16Arc,
        MFM_DAM_PREAMBLE.to_vec(),
        data,
        ccitt.crc_stored(),
    )
    .unwrap();
    assert!(!crc::verify(&mut as_arc).ok);
}

#[test]
fn test_crc_stored_check_round_trip() {
    init();
    for algorithm in [CrcAlgorithm::Crc16CcittFalse, CrcAlgorithm::Crc16Arc] {
        let s = sector(algorithm, sector_data(128, 9));
        let region = s.region();
        assert_eq!(region.len(), 130);
        assert_eq!(crc::syndrome(algorithm, s.preamble(), &region), 0);
        assert_eq!(crc::bytes_to_stored(algorithm, &region[128..]), s.crc_stored());
    }

    let data = sector_data(256, 1);
    let stored = crc::compute(CrcAlgorithm::Xor8, &[], &data);
    assert_eq!(stored, crc::xor8(&data) as u32);
    let mut s = Sector::new(DiskChsn::new(1, 0, 0, 1), CrcAlgorithm::Xor8, Vec::new(), data, stored).unwrap();
    assert_eq!(s.region().len(), 257);
    assert!(crc::verify(&mut s).ok);

    let data = sector_data(512, 2);
    let stored = crc::compute(CrcAlgorithm::AmigaXor32, &[], &data);
    assert_eq!(stored, crc::amiga_checksum(&data));
    let mut s = Sector::new(DiskChsn::new(0, 0, 0, 2), CrcAlgorithm::AmigaXor32, Vec::new(), data, stored).unwrap();
    assert_eq!(s.region().len(), 516);
    assert_eq!(crc::syndrome(CrcAlgorithm::AmigaXor32, &[], &s.region()), 0);
    assert!(crc::verify(&mut s).ok);
    assert!(s.flip_bit(516 * 8 - 1));
    assert!(!crc::verify(&mut s).ok);
}

#[test]
fn test_crc_arc_override_on_track() {
    init();
    let ch = DiskCh::new(5, 1);
    let sectors = descriptors(TrackEncoding::Mfm, ch, 4);
    let params = FormatParams {
        crc: Some(CrcAlgorithm::Crc16Arc),
        ..FormatParams::default()
    };
    let track = TrackSchema::System34
        .format_track(TrackEncoding::Mfm, ch, &sectors, &params)
        .unwrap();

    let mut ctx = DecodeContext::new(TrackEncoding::Mfm);
    ctx.crc = CrcAlgorithm::Crc16Arc;
    for mut s in TrackSchema::System34.decode_track(&track, &ctx) {
        assert!(crc::verify(&mut s).ok, "sector {} failed ARC check", s.id);
    }

    // Read with the default check, every data field fails.
    let ctx = DecodeContext::new(TrackEncoding::Mfm);
    let decoded = TrackSchema::System34.decode_track(&track, &ctx);
    assert_eq!(decoded.len(), 4);
    for mut s in decoded {
        assert!(!crc::verify(&mut s).ok);
    }
}
