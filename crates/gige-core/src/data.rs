//! Image Data Types
//!
//! [`Roi`] describes a crop of the camera frame, [`ImageBuffer`] holds the
//! host-side copy that `get_image_buffer` returns, and [`Frame`] is one image
//! delivered by a sequence acquisition together with its metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rectangular region of interest in image coordinates.
///
/// A rectangle with zero width or height means "no region": the full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    /// X-coordinate of top-left corner in pixels
    pub x: u32,
    /// Y-coordinate of top-left corner in pixels
    pub y: u32,
    /// Width of ROI in pixels
    pub width: u32,
    /// Height of ROI in pixels
    pub height: u32,
}

impl Roi {
    /// Create a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `width` x `height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Whether the region has zero extent.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        right <= u64::from(width) && bottom <= u64::from(height)
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Host-visible image buffer.
///
/// Holds the most recent frame read back from the hardware buffer, cropped to
/// the active ROI. Its dimensions always describe the data it holds.
#[derive(Debug, Clone, Default)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Create a zero-filled buffer.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let mut buffer = Self::default();
        buffer.resize(width, height, bytes_per_pixel);
        buffer
    }

    /// Change dimensions and pixel depth, zero-filling the contents.
    pub fn resize(&mut self, width: u32, height: u32, bytes_per_pixel: u32) {
        self.width = width;
        self.height = height;
        self.bytes_per_pixel = bytes_per_pixel;
        let len = width as usize * height as usize * bytes_per_pixel as usize;
        self.pixels.clear();
        self.pixels.resize(len, 0);
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Size of the pixel data in bytes.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the buffer holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Pixel data, row-major, little-endian for multi-byte pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel data for readback.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Represents a single image frame delivered by a sequence acquisition.
///
/// # Storage
/// Data is stored as a raw byte vector (`Vec<u8>`).
/// - 8-bit images: 1 byte per pixel.
/// - 10-bit images: 2 bytes per pixel, Little Endian.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Significant bits per pixel (8 or 10)
    pub bit_depth: u32,

    /// Raw pixel data
    pub data: Vec<u8>,

    /// Position of this frame within its sequence, starting at 0
    pub frame_number: u64,

    /// Host time at which the frame was read back
    pub timestamp: DateTime<Utc>,

    /// Region of the binned sensor image this frame covers
    pub roi: Roi,
}

impl Frame {
    /// Create a frame from raw byte data with explicit bit depth.
    ///
    /// The caller must ensure the buffer length matches the expected size for the bit depth.
    pub fn from_bytes(width: u32, height: u32, bit_depth: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth,
            data,
            frame_number: 0,
            timestamp: Utc::now(),
            roi: Roi::full(width, height),
        }
    }

    /// Attach sequence metadata.
    pub fn with_sequence(mut self, frame_number: u64, roi: Roi) -> Self {
        self.frame_number = frame_number;
        self.roi = roi;
        self
    }

    /// Bytes per pixel for this frame's bit depth.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bit_depth.div_ceil(8)
    }

    /// Get pixel value at (x, y) as u32 (handling bit depth conversion).
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let idx = y as usize * self.width as usize + x as usize;
        match self.bytes_per_pixel() {
            1 => self.data.get(idx).map(|&v| u32::from(v)),
            2 => {
                let offset = idx * 2;
                let bytes = self.data.get(offset..offset + 2)?;
                Some(u32::from(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
            _ => None,
        }
    }

    /// Mean pixel value, 0.0 for an empty frame.
    pub fn mean(&self) -> f64 {
        let count = self.width as usize * self.height as usize;
        if count == 0 {
            return 0.0;
        }
        let sum: u64 = match self.bytes_per_pixel() {
            1 => self.data.iter().map(|&v| u64::from(v)).sum(),
            2 => self
                .data
                .chunks_exact(2)
                .map(|c| u64::from(u16::from_le_bytes([c[0], c[1]])))
                .sum(),
            _ => return 0.0,
        };
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roi_means_full_frame() {
        assert!(Roi::new(0, 0, 0, 0).is_empty());
        assert!(Roi::new(10, 10, 0, 5).is_empty());
        assert!(!Roi::new(0, 0, 1, 1).is_empty());
    }

    #[test]
    fn roi_bounds() {
        assert!(Roi::new(0, 0, 640, 480).fits_within(640, 480));
        assert!(Roi::new(600, 0, 40, 10).fits_within(640, 480));
        assert!(!Roi::new(601, 0, 40, 10).fits_within(640, 480));
        assert!(!Roi::new(u32::MAX, 0, 2, 1).fits_within(640, 480));
    }

    #[test]
    fn image_buffer_resize_tracks_size() {
        let mut img = ImageBuffer::new(4, 3, 1);
        assert_eq!(img.len(), 12);
        img.resize(2, 2, 2);
        assert_eq!((img.width(), img.height(), img.bytes_per_pixel()), (2, 2, 2));
        assert_eq!(img.len(), 8);
        assert!(img.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn frame_reads_ten_bit_pixels() {
        let mut data = Vec::new();
        for v in [100u16, 1023, 0, 512] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let frame = Frame::from_bytes(2, 2, 10, data);
        assert_eq!(frame.bytes_per_pixel(), 2);
        assert_eq!(frame.get(1, 0), Some(1023));
        assert_eq!(frame.get(1, 1), Some(512));
        assert_eq!(frame.get(2, 0), None);
        assert!((frame.mean() - 408.75).abs() < 1e-9);
    }
}
