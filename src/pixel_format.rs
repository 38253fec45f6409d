// SPDX-License-Identifier: GPL-3.0-only
//! Canonical FOURCC pixel formats (spec.md §6.3).

use std::fmt;

/// A 32-bit four-character-code pixel format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl serde::Serialize for Fourcc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

const fn fourcc(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

impl Fourcc {
    pub const NV12: Fourcc = Fourcc(fourcc(*b"NV12"));
    pub const I420: Fourcc = Fourcc(fourcc(*b"I420"));
    pub const RGBA: Fourcc = Fourcc(fourcc(*b"RGBA"));
    pub const JPEG: Fourcc = Fourcc(fourcc(*b"JPEG"));
    pub const RAW: Fourcc = Fourcc(fourcc(*b"RAW "));

    /// Raw-only formats permitted for streams (spec.md §6.3: "Streams:
    /// raw-only").
    pub const STREAM_FORMATS: &'static [Fourcc] = &[Fourcc::NV12, Fourcc::I420, Fourcc::RGBA];

    /// Formats permitted for still captures (spec.md §6.3: "Stills: may
    /// include 'JPEG', 'RAW '"), in addition to any raw stream format.
    pub const STILL_FORMATS: &'static [Fourcc] = &[
        Fourcc::NV12,
        Fourcc::I420,
        Fourcc::RGBA,
        Fourcc::JPEG,
        Fourcc::RAW,
    ];

    pub fn is_valid_for_stream(self) -> bool {
        Self::STREAM_FORMATS.contains(&self)
    }

    pub fn is_valid_for_still(self) -> bool {
        Self::STILL_FORMATS.contains(&self)
    }

    /// Decode the four ASCII characters, for diagnostics.
    pub fn as_chars(self) -> [char; 4] {
        let b = self.0.to_le_bytes();
        [b[0] as char, b[1] as char, b[2] as char, b[3] as char]
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chars = self.as_chars();
        write!(f, "{}{}{}{}", chars[0], chars[1], chars[2], chars[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_ascii() {
        assert_eq!(Fourcc::NV12.to_string(), "NV12");
        assert_eq!(Fourcc::RAW.to_string(), "RAW ");
    }

    #[test]
    fn stream_formats_are_raw_only() {
        assert!(Fourcc::NV12.is_valid_for_stream());
        assert!(!Fourcc::JPEG.is_valid_for_stream());
    }

    #[test]
    fn still_formats_include_jpeg_and_raw() {
        assert!(Fourcc::JPEG.is_valid_for_still());
        assert!(Fourcc::RAW.is_valid_for_still());
        assert!(Fourcc::NV12.is_valid_for_still());
    }
}
