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

    src/lib.rs

    Crate root. Declares the recovery pipeline modules and the crate error type.
*/

//! # FluxRecover
//!
//! FluxRecover is a library crate that turns raw floppy disk flux captures into verified sector
//! data. A capture is a list of flux transition timestamps for each revolution of a track. The
//! pipeline runs in the following order:
//!
//! 1. [flux::pll] recovers a bitstream from transition timings, tracking cell-time drift.
//! 2. [sync] locates address marks in the bitstream, tolerating a few bit errors.
//! 3. [bitstream_codec] and [track_schema] demodulate MFM, FM and GCR sector fields. GCR fields
//!    are aligned with a Viterbi search so that a single bit-slip does not corrupt the whole sector.
//! 4. [crc] verifies headers and data against their stored checks.
//! 5. [correction] attempts one- and two-bit repairs when a check fails.
//! 6. [fusion] votes across revolutions to resolve weak bits.
//! 7. [recovery] sequences all of the above and reports how each sector was recovered.
//!
//! [classify] is a separate Bayesian classifier that ranks candidate container formats for a
//! byte buffer. It consumes recovered data but never influences the recovery pipeline.

pub mod bitstream;
pub mod bitstream_codec;
pub mod classify;
pub mod correction;
pub mod crc;
pub mod flux;
pub mod fusion;
mod parallel;
pub mod recovery;
pub mod sync;
pub mod track_schema;
pub mod types;

use thiserror::Error;

/// The largest sector payload any supported schema can describe (size code 6).
pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;
/// The largest valid IBM sector size code.
pub const MAXIMUM_SIZE_CODE: u8 = 6;

/// Errors returned by the library. These represent contract violations by the caller, such as an
/// invalid PLL profile or an empty sector buffer. Expected decoding failures (missing sync, CRC
/// mismatch, exhausted correction budget) are never reported as errors; they are part of the
/// result types of the individual stages.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PipelineError {
    #[error("Invalid PLL profile: {0}")]
    InvalidProfile(String),
    #[error("Invalid sync pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid sector size code: {0}")]
    InvalidSizeCode(u8),
    #[error("Sector buffer is empty")]
    EmptyBuffer,
    #[error("Sector buffer of {0} bytes exceeds the maximum sector size")]
    BufferTooLarge(usize),
    #[error("The requested encoding is not supported by this operation: {0}")]
    UnsupportedEncoding(TrackEncoding),
    #[error("Invalid parameters were specified to a library function: {0}")]
    ParameterError(String),
}

pub use crate::{
    bitstream::Bitstream,
    flux::{pll::PllProfile, FluxSample},
    recovery::{Recovery, RecoveryConfig, RecoveryResult},
    types::{
        chs::{DiskCh, DiskChsn},
        enums::{CrcAlgorithm, RecoveryStage, TrackEncoding},
        flags::SectorFlags,
        sector::Sector,
        track::Track,
    },
};

pub mod prelude {
    pub use crate::{
        bitstream::Bitstream,
        correction::{CorrectionConfig, CorrectionOutcome},
        crc::{amiga_checksum, crc16_arc, crc16_ccitt_false, CrcCheck},
        flux::{
            pll::{Pll, PllDecodeResult, PllProfile},
            FluxSample,
        },
        fusion::{FusionConfig, FusionResult, SectorRead},
        recovery::{Recovery, RecoveryConfig, RecoveryMethod, RecoveryResult, StageRecord, TrackRecovery},
        sync::{SyncMatch, SyncPattern},
        track_schema::{DecodeContext, FormatParams, SectorDescriptor, TrackSchema, TrackSchemaTrait},
        types::{
            chs::{DiskCh, DiskChsn},
            enums::{CrcAlgorithm, RecoveryStage, TrackEncoding},
            flags::SectorFlags,
            sector::Sector,
            track::Track,
        },
        PipelineError,
    };
}
