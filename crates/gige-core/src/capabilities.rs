//! Camera Capabilities
//!
//! Fine-grained capability traits a camera adapter implements. Hosts program
//! against the traits rather than a concrete adapter:
//!
//! - [`Device`]: initialize and shut down the hardware resources
//! - [`ImageSource`]: single-frame capture, readback and ROI
//! - [`ExposureControl`]: exposure and binning
//! - [`SequenceAcquisition`]: continuous streaming on a worker
//! - [`Parameterized`]: named property access
//!
//! Operations that wait on hardware are async. Operations that mutate device
//! state take `&mut self`, so a host holds at most one in-flight mutation.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn grab_one<C: Camera>(camera: &mut C) -> AdapterResult<Vec<u8>> {
//!     camera.initialize().await?;
//!     camera.snap_image().await?;
//!     Ok(camera.get_image_buffer()?.to_vec())
//! }
//! ```

use crate::data::{Frame, Roi};
use crate::error::{AdapterError, AdapterResult};
use crate::property::{PropertySet, PropertyValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle of a device's hardware resources.
#[async_trait]
pub trait Device: Send + Sync {
    /// Device name reported to hosts.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Discover the hardware and create every resource needed to acquire.
    ///
    /// On failure nothing remains allocated. Calling this on an initialized
    /// device is a no-op.
    async fn initialize(&mut self) -> AdapterResult<()>;

    /// Stop any acquisition and release every hardware resource.
    ///
    /// Calling this on an uninitialized device is a no-op.
    async fn shutdown(&mut self) -> AdapterResult<()>;

    /// Whether the device currently holds its hardware resources.
    fn is_initialized(&self) -> bool;
}

/// Single-frame capture and readback.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Capture one frame into the hardware buffer.
    ///
    /// Refused with `Busy` while a sequence is running.
    async fn snap_image(&mut self) -> AdapterResult<()>;

    /// Read the last captured frame, cropped to the active ROI.
    fn get_image_buffer(&mut self) -> AdapterResult<&[u8]>;

    /// Width of the host image in pixels.
    fn image_width(&self) -> u32;

    /// Height of the host image in pixels.
    fn image_height(&self) -> u32;

    /// Bytes per pixel of the host image.
    fn image_bytes_per_pixel(&self) -> u32;

    /// Significant bits per pixel.
    fn bit_depth(&self) -> u32;

    /// Size of the host image in bytes.
    fn image_buffer_size(&self) -> usize {
        self.image_width() as usize
            * self.image_height() as usize
            * self.image_bytes_per_pixel() as usize
    }

    /// Restrict readback to a window. A zero-sized window restores the full frame.
    fn set_roi(&mut self, roi: Roi) -> AdapterResult<()>;

    /// Current window as (offset, size of the host image).
    fn roi(&self) -> Roi;

    /// Restore the full frame.
    fn clear_roi(&mut self) -> AdapterResult<()> {
        self.set_roi(Roi::default())
    }
}

/// Exposure and binning controls.
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set the exposure time in milliseconds.
    async fn set_exposure(&mut self, exposure_ms: f64) -> AdapterResult<()>;

    /// Exposure time in milliseconds, read back from the hardware.
    async fn exposure(&self) -> AdapterResult<f64>;

    /// Set symmetric binning.
    async fn set_binning(&mut self, binning: u32) -> AdapterResult<()>;

    /// Current binning factor.
    fn binning(&self) -> u32;
}

/// Settings for a sequence acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSettings {
    /// Stop after this many frames; run until stopped when `None`.
    pub num_images: Option<u64>,
    /// Minimum delay between frames in milliseconds.
    #[serde(default)]
    pub interval_ms: f64,
    /// End the sequence instead of waiting when the host falls behind.
    #[serde(default)]
    pub stop_on_overflow: bool,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            num_images: None,
            interval_ms: 0.0,
            stop_on_overflow: false,
        }
    }
}

impl SequenceSettings {
    /// Settings for a fixed number of frames.
    pub fn frames(count: u64) -> Self {
        Self {
            num_images: Some(count),
            ..Default::default()
        }
    }

    /// The inter-frame delay as a [`Duration`].
    ///
    /// Negative, non-finite and unrepresentable intervals are rejected.
    pub fn interval(&self) -> AdapterResult<Duration> {
        Duration::try_from_secs_f64(self.interval_ms / 1000.0).map_err(|_| {
            AdapterError::invalid_value(
                "interval_ms",
                format!("{} is not a usable delay", self.interval_ms),
            )
        })
    }
}

/// Continuous acquisition driven by a background worker.
#[async_trait]
pub trait SequenceAcquisition: Send + Sync {
    /// Start streaming. Frames arrive on the returned bounded channel.
    async fn start_sequence_acquisition(
        &mut self,
        settings: SequenceSettings,
    ) -> AdapterResult<mpsc::Receiver<Arc<Frame>>>;

    /// Stop streaming and wait for the worker to leave the device idle.
    async fn stop_sequence_acquisition(&mut self) -> AdapterResult<()>;

    /// Whether a sequence is running.
    fn is_capturing(&self) -> bool;
}

/// Named property access.
#[async_trait]
pub trait Parameterized: Send + Sync {
    /// All properties of the device.
    fn properties(&self) -> &PropertySet;

    /// Read a property, refreshing hardware-backed values first.
    async fn get_property(&self, name: &str) -> AdapterResult<PropertyValue>;

    /// Validate and write a property, pushing it to the hardware when bound.
    async fn set_property(&mut self, name: &str, value: PropertyValue) -> AdapterResult<()>;
}

/// Marker trait for a full camera adapter.
pub trait Camera:
    Device + ImageSource + ExposureControl + SequenceAcquisition + Parameterized
{
}

impl<T> Camera for T where
    T: Device + ImageSource + ExposureControl + SequenceAcquisition + Parameterized
{
}
