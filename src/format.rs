//! Sample formats and the constant format table.
//!
//! Physical width, signedness, endianness, the 64-bit silence pattern and
//! the external names all derive from one table so they cannot drift.

use super::error::{Error, Result};

name_enum!(
    /// PCM sample format.
    Format, ALL_FORMATS [26],
    S8 = "S8",
    U8 = "U8",
    S16LE = "S16_LE",
    S16BE = "S16_BE",
    U16LE = "U16_LE",
    U16BE = "U16_BE",
    S24LE = "S24_LE",
    S24BE = "S24_BE",
    U24LE = "U24_LE",
    U24BE = "U24_BE",
    S32LE = "S32_LE",
    S32BE = "S32_BE",
    U32LE = "U32_LE",
    U32BE = "U32_BE",
    FloatLE = "FLOAT_LE",
    FloatBE = "FLOAT_BE",
    Float64LE = "FLOAT64_LE",
    Float64BE = "FLOAT64_BE",
    Iec958SubframeLE = "IEC958_SUBFRAME_LE",
    Iec958SubframeBE = "IEC958_SUBFRAME_BE",
    MuLaw = "MU_LAW",
    ALaw = "A_LAW",
    ImaAdpcm = "IMA_ADPCM",
    Mpeg = "MPEG",
    Gsm = "GSM",
    Special = "SPECIAL",
);

name_enum!(
    /// PCM sample subformat.
    Subformat, ALL_SUBFORMATS [1],
    Std = "STD",
);

impl Subformat {
    pub fn description(self) -> &'static str { "Standard" }
}

struct Entry {
    /// Significant bits of one sample; 0 when undefined for the format.
    width: u32,
    /// Width of one sample in the stream, in bits; 0 when undefined.
    phys: u32,
    /// 1 signed, 0 unsigned, -1 not a linear format.
    signd: i8,
    /// 1 little endian, 0 big endian, -1 byte order does not apply.
    le: i8,
    /// Mute pattern replicated to 64 bits. The little-endian byte
    /// serialization of this value is the in-memory byte sequence.
    silence: u64,
    desc: &'static str,
}

const fn def(width: u32, phys: u32, signd: i8, le: i8, silence: u64, desc: &'static str) -> Entry {
    Entry { width, phys, signd, le, silence, desc }
}

static TABLE: [Entry; 26] = [
    def(8, 8, 1, -1, 0, "Signed 8 bit"),
    def(8, 8, 0, -1, 0x8080_8080_8080_8080, "Unsigned 8 bit"),
    def(16, 16, 1, 1, 0, "Signed 16 bit Little Endian"),
    def(16, 16, 1, 0, 0, "Signed 16 bit Big Endian"),
    def(16, 16, 0, 1, 0x8000_8000_8000_8000, "Unsigned 16 bit Little Endian"),
    def(16, 16, 0, 0, 0x0080_0080_0080_0080, "Unsigned 16 bit Big Endian"),
    def(24, 32, 1, 1, 0, "Signed 24 bit Little Endian"),
    def(24, 32, 1, 0, 0, "Signed 24 bit Big Endian"),
    def(24, 32, 0, 1, 0x0080_0000_0080_0000, "Unsigned 24 bit Little Endian"),
    def(24, 32, 0, 0, 0x0000_8000_0000_8000, "Unsigned 24 bit Big Endian"),
    def(32, 32, 1, 1, 0, "Signed 32 bit Little Endian"),
    def(32, 32, 1, 0, 0, "Signed 32 bit Big Endian"),
    def(32, 32, 0, 1, 0x8000_0000_8000_0000, "Unsigned 32 bit Little Endian"),
    def(32, 32, 0, 0, 0x0000_0080_0000_0080, "Unsigned 32 bit Big Endian"),
    def(32, 32, -1, 1, 0, "Float 32 bit Little Endian"),
    def(32, 32, -1, 0, 0, "Float 32 bit Big Endian"),
    def(64, 64, -1, 1, 0, "Float 64 bit Little Endian"),
    def(64, 64, -1, 0, 0, "Float 64 bit Big Endian"),
    def(32, 32, -1, 1, 0, "IEC-958 Little Endian"),
    def(32, 32, -1, 0, 0, "IEC-958 Big Endian"),
    def(8, 8, -1, -1, 0x7f7f_7f7f_7f7f_7f7f, "Mu-Law"),
    def(8, 8, -1, -1, 0x5555_5555_5555_5555, "A-Law"),
    def(4, 4, -1, -1, 0, "Ima-ADPCM"),
    def(0, 0, -1, -1, 0, "MPEG"),
    def(0, 0, -1, -1, 0, "GSM"),
    def(0, 0, -1, -1, 0, "Special"),
];

impl Format {
    #[inline]
    fn entry(self) -> &'static Entry { &TABLE[self as usize] }

    /// Significant bits of one sample (24 for the 24-in-32 formats).
    pub fn width(self) -> Result<u32> {
        match self.entry().width {
            0 => Err(Error::bad_value("format width")),
            w => Ok(w),
        }
    }

    /// Width of one sample in the stream, in bits. May be 4 for the
    /// nibble-packed formats.
    pub fn physical_width(self) -> Result<u32> {
        match self.entry().phys {
            0 => Err(Error::bad_value("format physical width")),
            w => Ok(w),
        }
    }

    /// Whether the linear format is signed; `Err` for non-linear formats.
    pub fn signed(self) -> Result<bool> {
        match self.entry().signd {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(Error::bad_value("format signedness")),
        }
    }

    /// Whether the format is little endian; `Err` where byte order does
    /// not apply.
    pub fn little_endian(self) -> Result<bool> {
        match self.entry().le {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(Error::bad_value("format endianness")),
        }
    }

    pub fn linear(self) -> bool { self.entry().signd >= 0 }

    /// The mute sample replicated to 64 bits; write the little-endian
    /// bytes of this value to silence sample memory.
    pub fn silence_64(self) -> u64 { self.entry().silence }

    pub fn description(self) -> &'static str { self.entry().desc }

    /// Look a format up by its external name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Format> {
        Format::all().iter().find(|f| f.name().eq_ignore_ascii_case(name)).copied()
    }
}

/// Bits per frame for `channels` channels of `format`.
pub fn frame_bits(format: Format, channels: u32) -> Result<u32> {
    Ok(format.physical_width()? * channels)
}
