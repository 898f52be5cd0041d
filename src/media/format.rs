//! Format/codec boundary shared by the image and video pipelines.

use serde::{Deserialize, Serialize};

/// On-disk/on-wire encoding for a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpg,
    Png,
    /// Tiled raw storage: an array over the (height, width) domain with
    /// channels as an attribute rather than an interleaved byte layout.
    Tdb,
    /// Untiled raw binary dump, no codec framing at all.
    Bin,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Format::Jpg),
            "png" => Some(Format::Png),
            "tdb" => Some(Format::Tdb),
            "bin" => Some(Format::Bin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Tdb => "tdb",
            Format::Bin => "bin",
        }
    }

    /// Whether this format is backed by the tiled raw store rather than an
    /// `image`-crate-decodable byte stream.
    pub fn is_tiled(self) -> bool {
        matches!(self, Format::Tdb)
    }
}

/// Elementary numeric type of one pixel channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    U8,
    U16,
    F32,
}

/// Elementary type plus channel count (e.g. 3-channel u8 for RGB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelType {
    pub element: ElementType,
    pub channels: u8,
}

impl PixelType {
    pub fn rgb8() -> Self {
        PixelType { element: ElementType::U8, channels: 3 }
    }

    pub fn gray8() -> Self {
        PixelType { element: ElementType::U8, channels: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub height: u32,
    pub width: u32,
}

impl Dimensions {
    pub fn new(height: u32, width: u32) -> Self {
        Dimensions { height, width }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_aliases() {
        assert_eq!(Format::parse("JPG"), Some(Format::Jpg));
        assert_eq!(Format::parse("jpeg"), Some(Format::Jpg));
        assert_eq!(Format::parse("png"), Some(Format::Png));
        assert_eq!(Format::parse("unknown"), None);
    }

    #[test]
    fn only_tdb_is_tiled() {
        assert!(Format::Tdb.is_tiled());
        assert!(!Format::Png.is_tiled());
    }
}
