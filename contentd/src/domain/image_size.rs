//! Image dimensions and the generation-time pixel floor

use serde::{Deserialize, Serialize};

/// Minimum pixel count the image backend accepts
pub const MIN_PIXELS: u64 = 3_686_400;

/// Presets a too-small size snaps to: landscape, portrait, square
const PRESETS: [ImageSize; 3] = [
    ImageSize { width: 2560, height: 1440 },
    ImageSize { width: 1440, height: 2560 },
    ImageSize { width: 1920, height: 1920 },
];

/// Image dimensions as "WIDTHxHEIGHT"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Snap to the closest preset (by aspect ratio) when below the pixel
    /// floor; sizes at or above the floor pass through unchanged.
    pub fn adjusted(&self) -> Self {
        if self.pixel_count() >= MIN_PIXELS {
            return *self;
        }

        let aspect = (self.width as f64 / self.height as f64).ln();
        *PRESETS
            .iter()
            .min_by(|a, b| {
                let da = (aspect - (a.width as f64 / a.height as f64).ln()).abs();
                let db = (aspect - (b.width as f64 / b.height as f64).ln()).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(&PRESETS[0])
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        PRESETS[0]
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid image size '{}': expected WIDTHxHEIGHT", s))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("Invalid image width '{}'", w))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("Invalid image height '{}'", h))?;
        if width == 0 || height == 0 {
            return Err(format!("Image dimensions must be positive: {}", s));
        }
        Ok(Self { width, height })
    }
}
