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

    src/track_schema/dispatch.rs

    Enum dispatch for TrackSchemaTrait
*/
use crate::{
    bitstream::Bitstream,
    sync::SyncMatch,
    track_schema::{
        amiga::AmigaSchema,
        apple::AppleSchema,
        commodore::CommodoreSchema,
        system34::System34Schema,
        DecodeContext,
        FormatParams,
        SectorDescriptor,
        TrackSchema,
        TrackSchemaTrait,
    },
    types::{chs::DiskCh, enums::TrackEncoding, sector::Sector},
    PipelineError,
};

impl TrackSchemaTrait for TrackSchema {
    fn find_headers(&self, stream: &Bitstream, ctx: &DecodeContext) -> Vec<SyncMatch> {
        match self {
            TrackSchema::System34 => System34Schema::find_headers(stream, ctx),
            TrackSchema::Amiga => AmigaSchema::find_headers(stream, ctx),
            TrackSchema::Commodore => CommodoreSchema::find_headers(stream, ctx),
            TrackSchema::Apple => AppleSchema::find_headers(stream, ctx),
        }
    }

    fn decode_sector(&self, stream: &Bitstream, header: &SyncMatch, ctx: &DecodeContext) -> Option<Sector> {
        match self {
            TrackSchema::System34 => System34Schema::decode_sector(stream, header, ctx),
            TrackSchema::Amiga => AmigaSchema::decode_sector(stream, header, ctx),
            TrackSchema::Commodore => CommodoreSchema::decode_sector(stream, header, ctx),
            TrackSchema::Apple => AppleSchema::decode_sector(stream, header, ctx),
        }
    }

    fn format_track(
        &self,
        encoding: TrackEncoding,
        ch: DiskCh,
        sectors: &[SectorDescriptor],
        params: &FormatParams,
    ) -> Result<Bitstream, PipelineError> {
        match self {
            TrackSchema::System34 => System34Schema::format_track(encoding, ch, sectors, params),
            TrackSchema::Amiga => AmigaSchema::format_track(encoding, ch, sectors, params),
            TrackSchema::Commodore => CommodoreSchema::format_track(encoding, ch, sectors, params),
            TrackSchema::Apple => AppleSchema::format_track(encoding, ch, sectors, params),
        }
    }
}
