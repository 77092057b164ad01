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

    src/types/flags.rs

    Defines common bitflags
*/

use bitflags::bitflags;

bitflags! {
    /// Bit flags describing the state and provenance of a decoded sector.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[rustfmt::skip]
    pub struct SectorFlags: u32 {
        #[doc = "Sector was written with a deleted data address mark"]
        const DELETED           = 0b0000_0000_0000_0001;
        #[doc = "Sector contains bytes that disagree between revolutions or contain encoding errors"]
        const WEAK              = 0b0000_0000_0000_0010;
        #[doc = "Sector data was repaired by bit-flip correction"]
        const CORRECTED         = 0b0000_0000_0000_0100;
        #[doc = "Sector data was produced by multi-revolution fusion"]
        const FUSED             = 0b0000_0000_0000_1000;
        #[doc = "Sector header was repaired by bit-flip correction"]
        const HEADER_CORRECTED  = 0b0000_0000_0001_0000;
        #[doc = "Decoding encountered clock violations or illegal GCR codewords"]
        const ENCODING_ERROR    = 0b0000_0000_0010_0000;
        #[doc = "GCR decoding realigned symbol boundaries after a bit-slip"]
        const BIT_SLIP          = 0b0000_0000_0100_0000;
    }
}
