use std::fmt;

/// Maximum number of planes a native frame can carry.
pub const MAX_PLANES: usize = 8;

/// Pixel format of a captured frame.
///
/// Discriminants follow the capture layer's `video_format` enumeration so raw
/// values can cross the boundary unchanged. Values outside the known range are
/// kept as [`PixelFormat::Unknown`] rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    None,
    /// Planar YUV 4:2:0, three planes.
    I420,
    /// Semi-planar YUV 4:2:0: luma plane plus interleaved UV plane.
    Nv12,
    /// Packed YUV 4:2:2, `Y0 V Y1 U`.
    Yvyu,
    /// Packed YUV 4:2:2, `Y0 U Y1 V`.
    Yuy2,
    /// Packed YUV 4:2:2, `U Y0 V Y1`.
    Uyvy,
    Rgba,
    Bgra,
    /// BGRA layout with an undefined fourth byte.
    Bgrx,
    /// 8-bit grayscale.
    Y800,
    /// Planar YUV 4:4:4, three full-resolution planes.
    I444,
    Unknown(u32),
}

impl PixelFormat {
    /// Map a raw capture-layer value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::I420,
            2 => Self::Nv12,
            3 => Self::Yvyu,
            4 => Self::Yuy2,
            5 => Self::Uyvy,
            6 => Self::Rgba,
            7 => Self::Bgra,
            8 => Self::Bgrx,
            9 => Self::Y800,
            10 => Self::I444,
            other => Self::Unknown(other),
        }
    }

    /// The raw capture-layer value.
    pub fn raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::I420 => 1,
            Self::Nv12 => 2,
            Self::Yvyu => 3,
            Self::Yuy2 => 4,
            Self::Uyvy => 5,
            Self::Rgba => 6,
            Self::Bgra => 7,
            Self::Bgrx => 8,
            Self::Y800 => 9,
            Self::I444 => 10,
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the format stores luma/chroma rather than red/green/blue.
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::I420 | Self::Nv12 | Self::Yvyu | Self::Yuy2 | Self::Uyvy | Self::I444
        )
    }

    /// Number of planes a frame of this format populates.
    pub fn plane_count(self) -> usize {
        match self {
            Self::I420 | Self::I444 => 3,
            Self::Nv12 => 2,
            Self::Yvyu | Self::Yuy2 | Self::Uyvy | Self::Rgba | Self::Bgra | Self::Bgrx => 1,
            Self::Y800 => 1,
            Self::None | Self::Unknown(_) => 0,
        }
    }

    /// Rows stored in `plane` for a frame `height` pixels tall.
    ///
    /// 4:2:0 chroma planes hold half the rows, rounded up for odd heights.
    pub fn plane_rows(self, plane: usize, height: u32) -> usize {
        let height = height as usize;
        if plane >= self.plane_count() {
            return 0;
        }
        match self {
            Self::I420 | Self::Nv12 if plane > 0 => height.div_ceil(2),
            _ => height,
        }
    }

    /// Minimum bytes one row of `plane` occupies for a frame `width` pixels wide.
    ///
    /// A stride below this value cannot describe the plane.
    pub fn min_row_bytes(self, plane: usize, width: u32) -> usize {
        let width = width as usize;
        if plane >= self.plane_count() {
            return 0;
        }
        match self {
            Self::I420 if plane > 0 => width.div_ceil(2),
            Self::Nv12 if plane > 0 => width.div_ceil(2) * 2,
            Self::I420 | Self::Nv12 | Self::I444 | Self::Y800 => width,
            Self::Yvyu | Self::Yuy2 | Self::Uyvy => width.div_ceil(2) * 4,
            Self::Rgba | Self::Bgra | Self::Bgrx => width * 4,
            Self::None | Self::Unknown(_) => 0,
        }
    }

    /// Short human-readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::Yvyu => "YVYU",
            Self::Yuy2 => "YUY2",
            Self::Uyvy => "UYVY",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::Bgrx => "BGRX",
            Self::Y800 => "Y800",
            Self::I444 => "I444",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "Unknown({raw})"),
            other => write!(f, "{}", other.name()),
        }
    }
}
