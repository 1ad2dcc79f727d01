//! Single-Frame Acquisition
//!
//! Owns the host-visible image: its geometry (sensor size, binning, pixel
//! type), the software ROI, and readback from the hardware buffer.
//!
//! The ROI is a software crop. The hardware always captures the full binned
//! frame and [`SaperaAcquisition::read_image`] copies the ROI rectangle out of
//! it.

use crate::components::features::PixelType;
use crate::components::resources::ResourceTriple;
use crate::components::sdk::BufferSpec;
use gige_core::data::{ImageBuffer, Roi};
use gige_core::error::{AdapterError, AdapterResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hardware resources shared between the foreground device and the sequence worker.
pub type SharedResources = Arc<Mutex<Option<ResourceTriple>>>;

/// Host image state and single-frame capture.
pub struct SaperaAcquisition {
    image: ImageBuffer,
    roi_offset: (u32, u32),
    sensor: (u32, u32),
    binning: u32,
    pixel_type: PixelType,
    capturing: Arc<AtomicBool>,
}

impl SaperaAcquisition {
    /// `capturing` is the flag the sequence worker raises while it streams.
    pub fn new(capturing: Arc<AtomicBool>) -> Self {
        Self {
            image: ImageBuffer::default(),
            roi_offset: (0, 0),
            sensor: (0, 0),
            binning: 1,
            pixel_type: PixelType::Mono8,
            capturing,
        }
    }

    /// Set the full geometry at once and resize the image to the full frame.
    pub fn configure(&mut self, sensor: (u32, u32), binning: u32, pixel_type: PixelType) {
        self.sensor = sensor;
        self.binning = binning.max(1);
        self.pixel_type = pixel_type;
        self.resize_image_buffer();
    }

    /// Size of the binned frame the hardware delivers.
    pub fn frame_size(&self) -> (u32, u32) {
        (self.sensor.0 / self.binning, self.sensor.1 / self.binning)
    }

    /// Resize the image to the full binned frame. Clears the ROI.
    pub fn resize_image_buffer(&mut self) {
        let (width, height) = self.frame_size();
        self.roi_offset = (0, 0);
        self.image
            .resize(width, height, self.pixel_type.bytes_per_pixel());
        tracing::debug!(
            width,
            height,
            bytes_per_pixel = self.pixel_type.bytes_per_pixel(),
            "Image buffer resized"
        );
    }

    /// Record a new binning factor and resize.
    pub fn set_binning(&mut self, binning: u32) {
        self.binning = binning.max(1);
        self.resize_image_buffer();
    }

    /// Record a new pixel type. The ROI is kept; only the pixel depth changes.
    pub fn set_pixel_type(&mut self, pixel_type: PixelType) {
        self.pixel_type = pixel_type;
        let (width, height) = (self.image.width(), self.image.height());
        self.image.resize(width, height, pixel_type.bytes_per_pixel());
    }

    /// Current binning factor.
    pub fn binning(&self) -> u32 {
        self.binning
    }

    /// Current pixel type.
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Host image buffer sized to the ROI.
    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }

    /// Layout of the hardware buffer for the current geometry.
    pub fn buffer_spec(&self, count: usize) -> BufferSpec {
        self.buffer_spec_for(self.binning, self.pixel_type, count)
    }

    /// Layout of the hardware buffer for a prospective geometry.
    pub fn buffer_spec_for(&self, binning: u32, pixel_type: PixelType, count: usize) -> BufferSpec {
        let binning = binning.max(1);
        BufferSpec {
            count,
            format: pixel_type.buffer_format(),
            width: self.sensor.0 / binning,
            height: self.sensor.1 / binning,
            with_trash: true,
        }
    }

    /// Whether a sequence is running.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Fail with [`AdapterError::Busy`] while a sequence is running.
    pub fn ensure_idle(&self) -> AdapterResult<()> {
        if self.is_capturing() {
            return Err(AdapterError::Busy);
        }
        Ok(())
    }

    /// Capture one frame. Blocks for up to `timeout`.
    pub fn snap_blocking(resources: &SharedResources, timeout: Duration) -> AdapterResult<()> {
        let mut guard = resources.lock();
        let triple = guard.as_mut().ok_or(AdapterError::NotInitialized)?;
        triple.snap(timeout)
    }

    /// Rectangle of the hardware frame that backs the host image.
    pub fn readback_rect(&self) -> Roi {
        Roi::new(
            self.roi_offset.0,
            self.roi_offset.1,
            self.image.width(),
            self.image.height(),
        )
    }

    /// Copy the last captured frame, cropped to the ROI, into the host image.
    pub fn read_image(&mut self, resources: &SharedResources) -> AdapterResult<&[u8]> {
        let rect = self.readback_rect();
        {
            let guard = resources.lock();
            let triple = guard.as_ref().ok_or(AdapterError::NotInitialized)?;
            triple.read_rect(rect, self.image.pixels_mut())?;
        }
        Ok(self.image.pixels())
    }

    /// Restrict readback to `roi`. A zero-sized rectangle restores the full frame.
    pub fn set_roi(&mut self, roi: Roi) -> AdapterResult<()> {
        self.ensure_idle()?;
        if roi.is_empty() {
            self.resize_image_buffer();
            return Ok(());
        }
        let (width, height) = self.frame_size();
        if !roi.fits_within(width, height) {
            return Err(AdapterError::InvalidRoi(format!(
                "{}x{} at ({}, {}) does not fit a {}x{} frame",
                roi.width, roi.height, roi.x, roi.y, width, height
            )));
        }
        self.image
            .resize(roi.width, roi.height, self.pixel_type.bytes_per_pixel());
        self.roi_offset = (roi.x, roi.y);
        tracing::debug!(x = roi.x, y = roi.y, width = roi.width, height = roi.height, "ROI set");
        Ok(())
    }

    /// Current ROI: offset plus host image size.
    pub fn roi(&self) -> Roi {
        self.readback_rect()
    }
}
