//! Raw pixel formats accepted as input and requested from encoders.

use std::fmt;
use std::str::FromStr;

use crate::{ErrorCode, MediaError};

/// Raw pixel layouts the engine knows how to size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// Planar Y followed by interleaved V/U at quarter resolution
    /// (the usual camera preview format).
    #[default]
    Nv21,
    /// Planar Y followed by interleaved U/V at quarter resolution.
    Nv12,
    /// Three planes, chroma at quarter resolution.
    Yuv420p,
    /// Packed Y0 U Y1 V.
    Yuyv422,
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// Packed 8-bit R, G, B, A.
    Rgba,
    /// Packed 8-bit B, G, R, A.
    Bgra,
}

impl PixelFormat {
    /// Every supported format.
    pub const ALL: [Self; 8] = [
        Self::Nv21,
        Self::Nv12,
        Self::Yuv420p,
        Self::Yuyv422,
        Self::Rgb24,
        Self::Bgr24,
        Self::Rgba,
        Self::Bgra,
    ];

    /// Conventional lowercase name (`"nv21"`, `"yuv420p"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Nv21 => "nv21",
            Self::Nv12 => "nv12",
            Self::Yuv420p => "yuv420p",
            Self::Yuyv422 => "yuyv422",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        }
    }

    /// Looks a format up by its [`name()`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Bytes needed to hold one `width` x `height` image.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        match self {
            Self::Nv21 | Self::Nv12 | Self::Yuv420p => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                w * h + 2 * chroma
            }
            Self::Yuyv422 => w.div_ceil(2) * 4 * h,
            Self::Rgb24 | Self::Bgr24 => w * h * 3,
            Self::Rgba | Self::Bgra => w * h * 4,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            MediaError::new(
                ErrorCode::InvalidArgument,
                format!("unknown pixel format {s:?}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for format in PixelFormat::ALL {
            assert_eq!(format.name().parse::<PixelFormat>().unwrap(), format);
        }
        assert!("yuv444p".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Nv21.frame_size(640, 480), 460_800);
        assert_eq!(PixelFormat::Yuv420p.frame_size(3, 3), 9 + 2 * 4);
        assert_eq!(PixelFormat::Yuyv422.frame_size(4, 2), 16);
        assert_eq!(PixelFormat::Rgb24.frame_size(2, 2), 12);
        assert_eq!(PixelFormat::Bgra.frame_size(2, 2), 16);
    }
}
