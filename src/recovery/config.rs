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

    src/recovery/config.rs

    Recovery configuration and named presets.
*/

use crate::{
    bitstream_codec::gcr::ViterbiConfig,
    correction::CorrectionConfig,
    flux::pll::PllProfile,
    fusion::FusionConfig,
    track_schema::{DecodeContext, TrackSchema},
    types::enums::{CrcAlgorithm, TrackEncoding},
    PipelineError,
};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Upper bound on PLL re-attempts; each retry re-decodes every revolution.
pub const MAX_RETRIES_LIMIT: u32 = 32;

/// Parameters for a [Recovery](super::Recovery) run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecoveryConfig {
    pub encoding: TrackEncoding,
    /// Sector layout. Defaults to the usual schema for the encoding; MFM tracks may instead be
    /// Amiga trackdisk.
    pub schema: TrackSchema,
    pub profile: PllProfile,
    /// Data field check override for System 34 tracks. Other schemas always use their own check.
    pub crc: Option<CrcAlgorithm>,
    /// Largest Hamming distance tolerated when matching sync patterns.
    pub sync_max_distance: u32,
    /// PLL re-attempts with perturbed profiles after the first decode finds nothing.
    pub max_retries: u32,
    pub correction: CorrectionConfig,
    pub fusion: FusionConfig,
    pub viterbi: ViterbiConfig,
    /// Decode revolutions and sectors on the rayon thread pool, if the `parallel` feature is
    /// enabled.
    pub parallel: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::mfm_dd()
    }
}

impl RecoveryConfig {
    /// Defaults for `encoding` using the given PLL profile.
    fn with_profile(encoding: TrackEncoding, profile: PllProfile) -> Self {
        Self {
            encoding,
            schema: TrackSchema::from(encoding),
            profile,
            crc: None,
            sync_max_distance: encoding.default_sync_distance(),
            max_retries: DEFAULT_MAX_RETRIES,
            correction: CorrectionConfig::default(),
            fusion: FusionConfig::default(),
            viterbi: ViterbiConfig::default(),
            parallel: true,
        }
    }

    /// Double density MFM (250 kbps, 2 µs cells).
    pub fn mfm_dd() -> Self {
        Self::with_profile(TrackEncoding::Mfm, PllProfile::MFM_DD)
    }

    /// High density MFM (500 kbps, 1 µs cells).
    pub fn mfm_hd() -> Self {
        Self::with_profile(TrackEncoding::Mfm, PllProfile::MFM_HD)
    }

    /// Single density FM (125 kbps, 4 µs cells).
    pub fn fm_sd() -> Self {
        Self::with_profile(TrackEncoding::Fm, PllProfile::FM_SD)
    }

    /// Amiga trackdisk, double density (11 sectors per track).
    pub fn amiga_dd() -> Self {
        Self {
            schema: TrackSchema::Amiga,
            ..Self::mfm_dd()
        }
    }

    /// Amiga trackdisk, high density (22 sectors per track).
    pub fn amiga_hd() -> Self {
        Self {
            schema: TrackSchema::Amiga,
            ..Self::mfm_hd()
        }
    }

    /// Commodore 1541 GCR, speed zone 3 (tracks 1-17).
    pub fn c1541() -> Self {
        Self::with_profile(TrackEncoding::GcrCommodore, PllProfile::GCR_C1541)
    }

    /// Apple DOS 3.3 6-and-2 GCR.
    pub fn apple_dos33() -> Self {
        Self::with_profile(TrackEncoding::GcrApple, PllProfile::GCR_APPLE)
    }

    /// Forensic settings for double density MFM: a stricter GCR alignment threshold, stricter weak
    /// byte flagging, more PLL retries and a much larger correction budget.
    pub fn paranoid() -> Self {
        let mut config = Self::mfm_dd();
        config.max_retries = 10;
        config.correction = CorrectionConfig::paranoid();
        config.fusion.weak_threshold = 0.75;
        config.fusion.max_combinations = 1024;
        config.viterbi.min_score = 0.85;
        config
    }

    /// The default preset for an encoding.
    pub fn for_encoding(encoding: TrackEncoding) -> Self {
        match encoding {
            TrackEncoding::Mfm => Self::mfm_dd(),
            TrackEncoding::Fm => Self::fm_sd(),
            TrackEncoding::GcrCommodore => Self::c1541(),
            TrackEncoding::GcrApple => Self::apple_dos33(),
        }
    }

    pub fn with_crc(mut self, crc: CrcAlgorithm) -> Self {
        self.crc = Some(crc);
        self
    }

    /// Check the configuration for contradictory or out-of-range parameters.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.schema.supports(self.encoding) {
            return Err(PipelineError::ParameterError(format!(
                "{} tracks cannot be {} encoded",
                self.schema, self.encoding
            )));
        }
        if let Some(crc) = self.crc {
            if self.schema != TrackSchema::System34 {
                return Err(PipelineError::ParameterError(format!(
                    "check override {} is not supported for {} tracks",
                    crc, self.schema
                )));
            }
            if !matches!(crc, CrcAlgorithm::Crc16CcittFalse | CrcAlgorithm::Crc16Arc) {
                return Err(PipelineError::ParameterError(format!(
                    "{} is not a System 34 data check",
                    crc
                )));
            }
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(PipelineError::ParameterError(format!(
                "max_retries {} exceeds limit of {}",
                self.max_retries, MAX_RETRIES_LIMIT
            )));
        }
        if self.sync_max_distance > 8 {
            return Err(PipelineError::ParameterError(format!(
                "sync distance {} is too large to be meaningful",
                self.sync_max_distance
            )));
        }
        if self.correction.max_bits > 2 {
            return Err(PipelineError::ParameterError(format!(
                "correction of {} bits is not supported",
                self.correction.max_bits
            )));
        }
        self.viterbi.validate()?;
        self.fusion.validate()
    }

    /// The data field check in effect.
    pub fn crc_algorithm(&self) -> CrcAlgorithm {
        match self.crc {
            Some(crc) if self.schema == TrackSchema::System34 => crc,
            _ => self.schema.default_crc(self.encoding),
        }
    }

    pub fn schema(&self) -> TrackSchema {
        self.schema
    }

    pub(crate) fn decode_context(&self, head: u8) -> DecodeContext {
        DecodeContext {
            encoding: self.encoding,
            crc: self.crc_algorithm(),
            sync_max_distance: self.sync_max_distance,
            viterbi: self.viterbi,
            head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for config in [
            RecoveryConfig::mfm_dd(),
            RecoveryConfig::mfm_hd(),
            RecoveryConfig::fm_sd(),
            RecoveryConfig::amiga_dd(),
            RecoveryConfig::amiga_hd(),
            RecoveryConfig::c1541(),
            RecoveryConfig::apple_dos33(),
            RecoveryConfig::paranoid(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config.encoding);
        }
        assert_eq!(RecoveryConfig::default().max_retries, 5);
    }

    #[test]
    fn crc_override() {
        let config = RecoveryConfig::mfm_dd().with_crc(CrcAlgorithm::Crc16Arc);
        assert!(config.validate().is_ok());
        assert_eq!(config.crc_algorithm(), CrcAlgorithm::Crc16Arc);

        let config = RecoveryConfig::c1541().with_crc(CrcAlgorithm::Crc16Arc);
        assert!(config.validate().is_err());
        assert_eq!(config.crc_algorithm(), CrcAlgorithm::Xor8);

        let config = RecoveryConfig::amiga_dd();
        assert_eq!(config.crc_algorithm(), CrcAlgorithm::AmigaXor32);
        assert!(config.clone().with_crc(CrcAlgorithm::Crc16Arc).validate().is_err());
    }

    #[test]
    fn schema_must_match_encoding() {
        let mut config = RecoveryConfig::amiga_dd();
        config.encoding = TrackEncoding::Fm;
        assert!(config.validate().is_err());

        let mut config = RecoveryConfig::mfm_dd();
        config.schema = TrackSchema::Commodore;
        assert!(config.validate().is_err());
    }

    #[test]
    fn limits() {
        let mut config = RecoveryConfig::mfm_dd();
        config.max_retries = 1000;
        assert!(config.validate().is_err());

        let mut config = RecoveryConfig::apple_dos33();
        config.viterbi.max_drift = 200;
        assert!(config.validate().is_err());
    }
}
