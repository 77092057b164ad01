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

    src/types/enums.rs

    Defines common enum types
*/

use std::fmt::{self, Display, Formatter};

/// The channel encoding of a track. The encoding selects the PLL profile, the sync patterns
/// and the [TrackSchema](crate::track_schema::TrackSchema) used to decode sectors.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackEncoding {
    /// Frequency Modulation, used by single-density IBM 3740 style disks.
    Fm,
    /// Modified Frequency Modulation, used by IBM System 34 style double and high density disks.
    #[default]
    Mfm,
    /// Commodore 1541 4-to-5 Group Code Recording.
    GcrCommodore,
    /// Apple II DOS 3.3 6-and-2 Group Code Recording.
    GcrApple,
}

impl Display for TrackEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TrackEncoding::Fm => write!(f, "FM"),
            TrackEncoding::Mfm => write!(f, "MFM"),
            TrackEncoding::GcrCommodore => write!(f, "GCR (Commodore)"),
            TrackEncoding::GcrApple => write!(f, "GCR (Apple 6&2)"),
        }
    }
}

impl TrackEncoding {
    /// Returns true if the encoding is not self-clocking and must be aligned by searching
    /// codeword boundaries.
    pub fn is_gcr(&self) -> bool {
        matches!(self, TrackEncoding::GcrCommodore | TrackEncoding::GcrApple)
    }

    /// Return the data check conventionally used by sectors of this encoding.
    pub fn default_crc(&self) -> CrcAlgorithm {
        match self {
            TrackEncoding::Fm | TrackEncoding::Mfm => CrcAlgorithm::Crc16CcittFalse,
            TrackEncoding::GcrCommodore => CrcAlgorithm::Xor8,
            TrackEncoding::GcrApple => CrcAlgorithm::AppleChain,
        }
    }

    /// Return the default Hamming distance tolerated when searching for this encoding's sync
    /// patterns. Short GCR sync runs are matched exactly.
    pub fn default_sync_distance(&self) -> u32 {
        match self {
            TrackEncoding::Mfm => 2,
            TrackEncoding::Fm => 1,
            TrackEncoding::GcrCommodore => 0,
            TrackEncoding::GcrApple => 1,
        }
    }
}

/// The algorithm used to check a sector's data field.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrcAlgorithm {
    /// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xorout. Stored big-endian.
    Crc16CcittFalse,
    /// CRC-16/ARC: reflected poly 0xA001, init 0x0000, no xorout. Stored little-endian.
    Crc16Arc,
    /// 8-bit XOR of all data bytes, as used by Commodore GCR sectors.
    Xor8,
    /// The final value of the Apple 6-and-2 running XOR chain.
    AppleChain,
    /// Amiga trackdisk checksum: the XOR of every data long's odd and even bit halves, masked to
    /// the data bit positions of an MFM long. Stored big-endian.
    AmigaXor32,
}

impl Display for CrcAlgorithm {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CrcAlgorithm::Crc16CcittFalse => write!(f, "CRC-16/CCITT-FALSE"),
            CrcAlgorithm::Crc16Arc => write!(f, "CRC-16/ARC"),
            CrcAlgorithm::Xor8 => write!(f, "XOR-8"),
            CrcAlgorithm::AppleChain => write!(f, "Apple 6&2 chain"),
            CrcAlgorithm::AmigaXor32 => write!(f, "Amiga XOR-32"),
        }
    }
}

impl CrcAlgorithm {
    /// Number of bytes the stored check occupies on disk.
    pub fn stored_len(&self) -> usize {
        match self {
            CrcAlgorithm::Crc16CcittFalse | CrcAlgorithm::Crc16Arc => 2,
            CrcAlgorithm::Xor8 | CrcAlgorithm::AppleChain => 1,
            CrcAlgorithm::AmigaXor32 => 4,
        }
    }

    /// Returns true if a single bit error can produce a syndrome unique to its position, so that the
    /// location of the error can be recovered from the check. For the CRC-16 variants this holds
    /// only within regions shorter than [CRC16_PERIOD_BITS](crate::crc::CRC16_PERIOD_BITS) bits;
    /// beyond that, positions a period apart share a syndrome and the correction search reports the
    /// match as ambiguous. XOR style checks cannot localize errors at all: flipping any bit in the
    /// same column produces the same mismatch.
    pub fn can_localize(&self) -> bool {
        matches!(self, CrcAlgorithm::Crc16CcittFalse | CrcAlgorithm::Crc16Arc)
    }
}

/// The states of the recovery state machine, in the order they may be visited.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecoveryStage {
    PllDecode,
    SyncSearch,
    ChannelDecode,
    CrcCheck,
    Correction,
    Fusion,
    /// Terminal: the sector passed its check.
    Verified,
    /// Terminal: every stage was attempted without producing a verified sector.
    Exhausted,
}

impl Display for RecoveryStage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            RecoveryStage::PllDecode => write!(f, "PLL_DECODE"),
            RecoveryStage::SyncSearch => write!(f, "SYNC_SEARCH"),
            RecoveryStage::ChannelDecode => write!(f, "CHANNEL_DECODE"),
            RecoveryStage::CrcCheck => write!(f, "CRC_CHECK"),
            RecoveryStage::Correction => write!(f, "CORRECTION"),
            RecoveryStage::Fusion => write!(f, "FUSION"),
            RecoveryStage::Verified => write!(f, "VERIFIED"),
            RecoveryStage::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

impl RecoveryStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryStage::Verified | RecoveryStage::Exhausted)
    }
}
