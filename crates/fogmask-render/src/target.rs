#![forbid(unsafe_code)]

//! Single-channel mask raster.
//!
//! A [`MaskTarget`] covers a logical `width × height` canvas but stores only
//! `ceil(width·r) × ceil(height·r)` bytes, where `r` is the resolution factor.
//! Large scenes are stored at reduced resolution to bound memory.

/// Area above which the mask is stored at quarter resolution.
const QUARTER_RES_AREA: f64 = 16000.0 * 16000.0;
/// Area above which the mask is stored at half resolution.
const HALF_RES_AREA: f64 = 8000.0 * 8000.0;

/// Resolution factor for a canvas of the given logical size.
#[must_use]
pub fn resolution_for(width: f32, height: f32) -> f32 {
    let area = f64::from(width) * f64::from(height);
    if area > QUARTER_RES_AREA {
        0.25
    } else if area > HALF_RES_AREA {
        0.5
    } else {
        1.0
    }
}

fn sanitize_extent(v: f32) -> f32 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

/// A greyscale mask in which 255 reveals and 0 hides.
#[derive(Clone, PartialEq)]
pub struct MaskTarget {
    width: f32,
    height: f32,
    resolution: f32,
    pixel_width: usize,
    pixel_height: usize,
    data: Vec<u8>,
}

impl std::fmt::Debug for MaskTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskTarget")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("resolution", &self.resolution)
            .field("pixel_width", &self.pixel_width)
            .field("pixel_height", &self.pixel_height)
            .finish_non_exhaustive()
    }
}

impl MaskTarget {
    /// Create a zeroed (fully hidden) target.
    ///
    /// Non-finite or negative extents become zero; a non-positive resolution
    /// becomes 1.
    #[must_use]
    pub fn new(width: f32, height: f32, resolution: f32) -> Self {
        let width = sanitize_extent(width);
        let height = sanitize_extent(height);
        let resolution = if resolution.is_finite() && resolution > 0.0 {
            resolution
        } else {
            1.0
        };
        let pixel_width = (width * resolution).ceil() as usize;
        let pixel_height = (height * resolution).ceil() as usize;
        Self {
            width,
            height,
            resolution,
            pixel_width,
            pixel_height,
            data: vec![0; pixel_width * pixel_height],
        }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height
    }

    #[inline]
    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    /// Physical `(columns, rows)`.
    #[inline]
    pub fn pixel_size(&self) -> (usize, usize) {
        (self.pixel_width, self.pixel_height)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set every pixel to `value`.
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Physical pixel at `(col, row)`.
    #[inline]
    pub fn pixel(&self, col: usize, row: usize) -> Option<u8> {
        if col >= self.pixel_width || row >= self.pixel_height {
            return None;
        }
        self.data.get(row * self.pixel_width + col).copied()
    }

    /// Pixel covering the logical point `(x, y)`.
    pub fn read_pixel(&self, x: f32, y: f32) -> Option<u8> {
        if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
            return None;
        }
        let col = (x * self.resolution).floor() as usize;
        let row = (y * self.resolution).floor() as usize;
        self.pixel(col, row)
    }

    /// Number of pixels equal to `value`.
    #[must_use]
    pub fn count(&self, value: u8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_thresholds() {
        assert_eq!(resolution_for(4000.0, 4000.0), 1.0);
        assert_eq!(resolution_for(8000.0, 8000.0), 1.0);
        assert_eq!(resolution_for(8001.0, 8000.0), 0.5);
        assert_eq!(resolution_for(16000.0, 16000.0), 0.5);
        assert_eq!(resolution_for(16001.0, 16000.0), 0.25);
    }

    #[test]
    fn physical_size_rounds_up() {
        let t = MaskTarget::new(101.0, 50.0, 0.5);
        assert_eq!(t.pixel_size(), (51, 25));
        assert_eq!(t.data().len(), 51 * 25);
    }

    #[test]
    fn read_pixel_scales_coordinates() {
        let mut t = MaskTarget::new(100.0, 100.0, 0.25);
        t.fill(7);
        assert_eq!(t.read_pixel(99.0, 99.0), Some(7));
        assert_eq!(t.read_pixel(100.0, 0.0), None);
        assert_eq!(t.read_pixel(-1.0, 0.0), None);
    }

    #[test]
    fn degenerate_inputs_are_sanitized() {
        let t = MaskTarget::new(f32::NAN, -5.0, 0.0);
        assert_eq!(t.pixel_size(), (0, 0));
        assert_eq!(t.resolution(), 1.0);
        assert_eq!(t.read_pixel(0.0, 0.0), None);
    }

    #[test]
    fn count_pixels() {
        let mut t = MaskTarget::new(4.0, 4.0, 1.0);
        t.fill(255);
        assert_eq!(t.count(255), 16);
        assert_eq!(t.count(0), 0);
    }
}
