use std::fmt;

use keyer_frame::{NativeFrame, PixelFormat};

/// Geometry and pixel format of an observed frame.
///
/// A processing graph is valid only for the descriptor it was built from;
/// any difference in width, height or format forces a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Descriptor of a native frame.
    pub fn of(frame: &NativeFrame<'_>) -> Self {
        Self::new(frame.width, frame.height, frame.format)
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

/// Keying algorithm applied by the filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Match against a reference colour in the U/V chroma plane.
    ChromaKey,
    /// Match against a reference colour in red/green/blue.
    ColorKey,
}

impl KeyType {
    /// libavfilter filter name, also used as the key node's instance name.
    pub fn filter_name(self) -> &'static str {
        match self {
            Self::ChromaKey => "chromakey",
            Self::ColorKey => "colorkey",
        }
    }
}

/// 24-bit RGB reference colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyColor {
    pub const fn from_rgb(rgb: u32) -> Self {
        Self {
            r: (rgb >> 16) as u8,
            g: (rgb >> 8) as u8,
            b: rgb as u8,
        }
    }

    /// BT.601 chroma of this colour as `(u, v)`, centred on 128.
    pub fn chroma(self) -> (f64, f64) {
        let (r, g, b) = (f64::from(self.r), f64::from(self.g), f64::from(self.b));
        let u = -0.16874 * r - 0.33126 * g + 0.5 * b + 128.0;
        let v = 0.5 * r - 0.41869 * g - 0.08131 * b + 128.0;
        (u, v)
    }
}

/// Formats as the `0xRRGGBB` literal libavfilter expects.
impl fmt::Display for KeyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Green used for YUV sources.
pub const YUV_KEY_COLOR: KeyColor = KeyColor::from_rgb(0x70de77);
/// Key green used for RGB and gray sources.
pub const RGB_KEY_COLOR: KeyColor = KeyColor::from_rgb(0x00fa00);

/// Parameters of the keying filter.
///
/// A pure function of the source colour family, recomputed on every graph
/// build and never adjusted on their own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyParameters {
    pub key_type: KeyType,
    pub color: KeyColor,
    /// Matching tolerance, in (0, 1].
    pub similarity: f64,
    /// Edge softening, in [0, 1]. Values at or below 0.0001 give a hard key.
    pub blend: f64,
}

impl KeyParameters {
    /// Parameters for frames of `format`.
    pub fn for_format(format: PixelFormat) -> Self {
        if format.is_yuv() {
            Self {
                key_type: KeyType::ChromaKey,
                color: YUV_KEY_COLOR,
                similarity: 0.12,
                blend: 0.05,
            }
        } else {
            Self {
                key_type: KeyType::ColorKey,
                color: RGB_KEY_COLOR,
                similarity: 0.73,
                blend: 0.02,
            }
        }
    }

    /// Option string for the libavfilter key filter.
    pub fn filter_args(&self) -> String {
        format!(
            "color={}:similarity={:.6}:blend={:.6}",
            self.color, self.similarity, self.blend
        )
    }

    /// Map a colour distance in `[0, ..)` to an alpha value.
    ///
    /// 0 means fully keyed out, 255 fully kept.
    pub fn alpha_for_distance(&self, diff: f64) -> u8 {
        if self.blend > 0.0001 {
            let a = ((diff - self.similarity) / self.blend).clamp(0.0, 1.0);
            (a * 255.0).round() as u8
        } else if diff > self.similarity {
            255
        } else {
            0
        }
    }
}
