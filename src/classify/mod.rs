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

    src/classify/mod.rs

    Bayesian multi-evidence container format classifier.
*/

//! The classifier ranks candidate container formats for a byte buffer by combining independent
//! pieces of evidence. Each format starts from a uniform log prior; each evidence item adds a
//! log-likelihood ratio:
//!
//! * magic bytes at a fixed offset (strong; weaker for short signatures)
//! * an exact file size match (medium)
//! * boot sector or filesystem signatures (medium)
//! * recovered track geometry consistent with the format (medium)
//! * the file name extension (weak)
//!
//! Posterior probabilities are obtained by softmax normalization of the summed scores.
//!
//! Classification consumes recovered data but never influences recovery: the encoding used to
//! decode a track is always chosen by the caller.

use crate::types::{enums::TrackEncoding, track::Track};
use std::fmt::{self, Display, Formatter};
use strum::IntoEnumIterator;

const LLR_MAGIC_PER_BYTE: f64 = 2.0;
const LLR_MAGIC_MAX: f64 = 8.0;
const LLR_MAGIC_ABSENT: f64 = -4.0;
const LLR_SIZE_MATCH: f64 = 3.0;
const LLR_SIZE_MISMATCH: f64 = -2.0;
const LLR_CONTENT: f64 = 2.0;
const LLR_GEOMETRY_MATCH: f64 = 2.0;
const LLR_GEOMETRY_MISMATCH: f64 = -2.0;
const LLR_EXTENSION: f64 = 1.5;

/// Posterior below which a warning is raised for the best candidate.
const LOW_CONFIDENCE: f64 = 0.5;
/// Posterior at which a runner-up is reported as an ambiguity.
const AMBIGUOUS: f64 = 0.25;

/// Offset of track 18 sector 0 (the BAM) in a D64 image.
const D64_BAM_OFFSET: usize = 0x16500;
/// Nibble image track length, the span scanned for an Apple address prologue.
const NIB_TRACK_LEN: usize = 6656;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContainerFormat {
    SuperCardPro,
    Hfe,
    Ipf,
    Woz,
    A2r,
    TeleDisk,
    ImageDisk,
    Pasti,
    ExtendedDsk,
    CpcDsk,
    Dms,
    Msa,
    G64,
    D64,
    Adf,
    RawSector,
    AtariSt,
    AppleDos,
    AppleNib,
}

impl Display for ContainerFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl ContainerFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::SuperCardPro => "SuperCard Pro flux image",
            ContainerFormat::Hfe => "HxC Floppy Emulator image",
            ContainerFormat::Ipf => "Interchangeable Preservation Format",
            ContainerFormat::Woz => "WOZ Apple II flux image",
            ContainerFormat::A2r => "Applesauce A2R flux image",
            ContainerFormat::TeleDisk => "TeleDisk image",
            ContainerFormat::ImageDisk => "ImageDisk image",
            ContainerFormat::Pasti => "Pasti STX image",
            ContainerFormat::ExtendedDsk => "Extended CPC DSK image",
            ContainerFormat::CpcDsk => "CPC DSK image",
            ContainerFormat::Dms => "DiskMasher archive",
            ContainerFormat::Msa => "Magic Shadow Archiver image",
            ContainerFormat::G64 => "Commodore G64 GCR image",
            ContainerFormat::D64 => "Commodore D64 sector image",
            ContainerFormat::Adf => "Amiga Disk File",
            ContainerFormat::RawSector => "Raw PC sector image",
            ContainerFormat::AtariSt => "Atari ST sector image",
            ContainerFormat::AppleDos => "Apple DOS order sector image",
            ContainerFormat::AppleNib => "Apple nibble image",
        }
    }

    /// File extensions conventionally used for this format, lowercase.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ContainerFormat::SuperCardPro => &["scp"],
            ContainerFormat::Hfe => &["hfe"],
            ContainerFormat::Ipf => &["ipf"],
            ContainerFormat::Woz => &["woz"],
            ContainerFormat::A2r => &["a2r"],
            ContainerFormat::TeleDisk => &["td0"],
            ContainerFormat::ImageDisk => &["imd"],
            ContainerFormat::Pasti => &["stx"],
            ContainerFormat::ExtendedDsk | ContainerFormat::CpcDsk => &["dsk", "edsk"],
            ContainerFormat::Dms => &["dms"],
            ContainerFormat::Msa => &["msa"],
            ContainerFormat::G64 => &["g64"],
            ContainerFormat::D64 => &["d64"],
            ContainerFormat::Adf => &["adf"],
            ContainerFormat::RawSector => &["img", "ima", "vfd", "flp"],
            ContainerFormat::AtariSt => &["st"],
            ContainerFormat::AppleDos => &["do", "dsk", "po"],
            ContainerFormat::AppleNib => &["nib"],
        }
    }

    /// Signatures as (offset, bytes). Any one matching is sufficient.
    pub fn magic(&self) -> &'static [(usize, &'static [u8])] {
        match self {
            ContainerFormat::SuperCardPro => &[(0, b"SCP")],
            ContainerFormat::Hfe => &[(0, b"HXCPICFE"), (0, b"HXCHFEV3")],
            ContainerFormat::Ipf => &[(0, b"CAPS")],
            ContainerFormat::Woz => &[(0, b"WOZ1"), (0, b"WOZ2")],
            ContainerFormat::A2r => &[(0, b"A2R2"), (0, b"A2R3")],
            ContainerFormat::TeleDisk => &[(0, b"TD"), (0, b"td")],
            ContainerFormat::ImageDisk => &[(0, b"IMD ")],
            ContainerFormat::Pasti => &[(0, b"RSY\0")],
            ContainerFormat::ExtendedDsk => &[(0, b"EXTENDED CPC DSK")],
            ContainerFormat::CpcDsk => &[(0, b"MV - CPC")],
            ContainerFormat::Dms => &[(0, b"DMS!")],
            ContainerFormat::Msa => &[(0, &[0x0E, 0x0F])],
            ContainerFormat::G64 => &[(0, b"GCR-1541")],
            _ => &[],
        }
    }

    /// Exact file sizes of fixed-geometry sector images.
    pub fn sizes(&self) -> &'static [usize] {
        match self {
            ContainerFormat::D64 => &[174848, 175531, 196608, 197376],
            ContainerFormat::Adf => &[901120, 1802240],
            ContainerFormat::RawSector => &[163840, 184320, 327680, 368640, 737280, 1228800, 1474560, 2949120],
            ContainerFormat::AtariSt => &[368640, 737280, 819200],
            ContainerFormat::AppleDos => &[143360],
            ContainerFormat::AppleNib => &[232960],
            _ => &[],
        }
    }

    /// Whether recovered geometry is consistent with this format, or None if the format places no
    /// constraint on it (flux and bitstream containers of any platform).
    pub fn matches_geometry(&self, geometry: &GeometryEvidence) -> Option<bool> {
        let (encodings, size, sectors): (&[TrackEncoding], Option<usize>, (usize, usize)) = match self {
            ContainerFormat::SuperCardPro | ContainerFormat::Hfe | ContainerFormat::Ipf => return None,
            ContainerFormat::Woz | ContainerFormat::A2r | ContainerFormat::AppleNib | ContainerFormat::AppleDos => {
                (&[TrackEncoding::GcrApple], Some(256), (13, 16))
            }
            ContainerFormat::G64 | ContainerFormat::D64 => (&[TrackEncoding::GcrCommodore], Some(256), (17, 21)),
            ContainerFormat::TeleDisk | ContainerFormat::ImageDisk => {
                (&[TrackEncoding::Mfm, TrackEncoding::Fm], None, (1, 64))
            }
            ContainerFormat::ExtendedDsk | ContainerFormat::CpcDsk => (&[TrackEncoding::Mfm], None, (1, 29)),
            ContainerFormat::Adf | ContainerFormat::Dms => (&[TrackEncoding::Mfm], Some(512), (11, 22)),
            ContainerFormat::AtariSt | ContainerFormat::Msa | ContainerFormat::Pasti => {
                (&[TrackEncoding::Mfm], Some(512), (9, 11))
            }
            ContainerFormat::RawSector => (&[TrackEncoding::Mfm, TrackEncoding::Fm], Some(512), (8, 36)),
        };
        Some(
            encodings.contains(&geometry.encoding)
                && size.map_or(true, |s| s == geometry.sector_size)
                && (sectors.0..=sectors.1).contains(&geometry.sectors_per_track),
        )
    }
}

/// Geometry observed on a recovered track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeometryEvidence {
    pub encoding: TrackEncoding,
    pub sector_size: usize,
    pub sectors_per_track: usize,
}

impl GeometryEvidence {
    /// Derive geometry from a recovered track: its encoding, the most common sector size, and its
    /// sector count. Returns None for a track without sectors.
    pub fn from_track(track: &Track) -> Option<Self> {
        let mut sizes: Vec<usize> = track.sectors().map(|s| s.len()).collect();
        if sizes.is_empty() {
            return None;
        }
        sizes.sort_unstable();
        let mut best = (sizes[0], 0usize);
        for chunk in sizes.chunk_by(|a, b| a == b) {
            if chunk.len() > best.1 {
                best = (chunk[0], chunk.len());
            }
        }
        Some(Self {
            encoding: track.encoding,
            sector_size: best.0,
            sectors_per_track: track.sector_ct(),
        })
    }
}

/// Everything known about a buffer to be classified.
#[derive(Clone, Debug, Default)]
pub struct Evidence<'a> {
    pub data: &'a [u8],
    /// File name extension, without the dot; case is ignored.
    pub extension: Option<&'a str>,
    pub geometry: Option<GeometryEvidence>,
}

impl<'a> Evidence<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, extension: &'a str) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_geometry(mut self, geometry: GeometryEvidence) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

/// A ranked format candidate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Candidate {
    pub format: ContainerFormat,
    /// Posterior probability; the probabilities of all candidates sum to 1.
    pub probability: f64,
    /// Summed log score before normalization.
    pub score: f64,
    /// Names of the evidence items that contributed to this candidate's score.
    pub evidence: Vec<&'static str>,
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Classification {
    /// Every format, sorted by descending probability.
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<String>,
}

impl Classification {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

fn magic_llr(format: ContainerFormat, data: &[u8]) -> Option<(f64, &'static str)> {
    let signatures = format.magic();
    if signatures.is_empty() {
        return None;
    }
    let matched = signatures
        .iter()
        .filter(|(offset, magic)| data.get(*offset..*offset + magic.len()) == Some(*magic))
        .map(|(_, magic)| magic.len())
        .max();
    Some(match matched {
        Some(len) => ((len as f64 * LLR_MAGIC_PER_BYTE).min(LLR_MAGIC_MAX), "magic"),
        None => (LLR_MAGIC_ABSENT, "no magic"),
    })
}

fn size_llr(format: ContainerFormat, len: usize) -> Option<(f64, &'static str)> {
    let sizes = format.sizes();
    if sizes.is_empty() {
        return None;
    }
    Some(if sizes.contains(&len) {
        (LLR_SIZE_MATCH, "size")
    }
    else {
        (LLR_SIZE_MISMATCH, "size mismatch")
    })
}

/// Boot sector and filesystem signatures.
fn content_llr(format: ContainerFormat, data: &[u8]) -> Option<(f64, &'static str)> {
    let le16 = |offset: usize| data.get(offset..offset + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let matched = match format {
        ContainerFormat::RawSector => {
            data.get(510..512) == Some(&[0x55, 0xAA][..])
                && le16(11) == Some(512)
                && data.get(13).is_some_and(|&spc| spc > 0 && spc <= 8)
        }
        ContainerFormat::AtariSt => data.len() >= 512 && data[0] == 0x60 && le16(11) == Some(512),
        ContainerFormat::Adf => data.len() >= 1024 && data.starts_with(b"DOS"),
        ContainerFormat::D64 => data.get(D64_BAM_OFFSET) == Some(&0x12),
        ContainerFormat::AppleNib => data[..data.len().min(NIB_TRACK_LEN)]
            .windows(3)
            .any(|w| w == [0xD5, 0xAA, 0x96]),
        _ => false,
    };
    matched.then_some((LLR_CONTENT, "boot sector"))
}

fn extension_llr(format: ContainerFormat, extension: Option<&str>) -> Option<(f64, &'static str)> {
    let extension = extension?.trim_start_matches('.').to_ascii_lowercase();
    format
        .extensions()
        .contains(&extension.as_str())
        .then_some((LLR_EXTENSION, "extension"))
}

fn geometry_llr(format: ContainerFormat, geometry: Option<&GeometryEvidence>) -> Option<(f64, &'static str)> {
    format.matches_geometry(geometry?).map(|matched| {
        if matched {
            (LLR_GEOMETRY_MATCH, "geometry")
        }
        else {
            (LLR_GEOMETRY_MISMATCH, "geometry mismatch")
        }
    })
}

/// Rank every known container format for the given evidence.
pub fn classify(evidence: &Evidence) -> Classification {
    let format_ct = ContainerFormat::iter().count() as f64;
    let log_prior = -format_ct.ln();

    let mut candidates: Vec<Candidate> = ContainerFormat::iter()
        .map(|format| {
            let items = [
                magic_llr(format, evidence.data),
                size_llr(format, evidence.data.len()),
                content_llr(format, evidence.data),
                geometry_llr(format, evidence.geometry.as_ref()),
                extension_llr(format, evidence.extension),
            ];
            let mut score = log_prior;
            let mut names = Vec::new();
            for (llr, name) in items.into_iter().flatten() {
                score += llr;
                names.push(name);
            }
            Candidate {
                format,
                probability: 0.0,
                score,
                evidence: names,
            }
        })
        .collect();

    // Softmax, shifted by the maximum score for numerical stability.
    let max = candidates.iter().map(|c| c.score).fold(f64::NEG_INFINITY, f64::max);
    let total: f64 = candidates.iter().map(|c| (c.score - max).exp()).sum();
    for candidate in candidates.iter_mut() {
        candidate.probability = (candidate.score - max).exp() / total;
    }
    candidates.sort_by(|a, b| b.probability.total_cmp(&a.probability).then_with(|| a.format.cmp(&b.format)));

    let mut warnings = Vec::new();
    if let Some(best) = candidates.first() {
        if best.probability < LOW_CONFIDENCE {
            warnings.push(format!(
                "Low confidence detection ({:.0}%), manual verification recommended",
                best.probability * 100.0
            ));
        }
        if let Some(second) = candidates.get(1).filter(|c| c.probability >= AMBIGUOUS) {
            warnings.push(format!("Multiple possible formats: {}, {}", best.format, second.format));
        }
        log::debug!(
            "classify(): best candidate {} ({:.3}) from {} bytes",
            best.format,
            best.probability,
            evidence.data.len()
        );
    }

    Classification { candidates, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_one() {
        let result = classify(&Evidence::new(&[]));
        let total: f64 = result.candidates.iter().map(|c| c.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(result.candidates.len(), ContainerFormat::iter().count());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn magic_dominates() {
        let mut data = b"SCP".to_vec();
        data.resize(4096, 0);
        let result = classify(&Evidence::new(&data).with_extension("img"));
        assert_eq!(result.best().unwrap().format, ContainerFormat::SuperCardPro);
        assert!(result.best().unwrap().probability > 0.9);
    }

    #[test]
    fn short_magic_is_weaker() {
        assert_eq!(magic_llr(ContainerFormat::TeleDisk, b"TD\0\0").unwrap().0, 4.0);
        assert_eq!(magic_llr(ContainerFormat::Ipf, b"CAPS").unwrap().0, LLR_MAGIC_MAX);
        assert_eq!(magic_llr(ContainerFormat::Ipf, b"CA").unwrap().0, LLR_MAGIC_ABSENT);
        assert!(magic_llr(ContainerFormat::RawSector, b"CAPS").is_none());
    }

    #[test]
    fn extension_breaks_size_tie() {
        let data = vec![0u8; 368640];
        let result = classify(&Evidence::new(&data).with_extension("ST"));
        assert_eq!(result.best().unwrap().format, ContainerFormat::AtariSt);
        let result = classify(&Evidence::new(&data).with_extension("ima"));
        assert_eq!(result.best().unwrap().format, ContainerFormat::RawSector);
    }

    #[test]
    fn geometry_evidence() {
        let data = vec![0u8; 143360];
        let geometry = GeometryEvidence {
            encoding: TrackEncoding::GcrApple,
            sector_size: 256,
            sectors_per_track: 16,
        };
        let result = classify(&Evidence::new(&data).with_geometry(geometry));
        assert_eq!(result.best().unwrap().format, ContainerFormat::AppleDos);
        assert!(result.best().unwrap().evidence.contains(&"geometry"));
    }
}
