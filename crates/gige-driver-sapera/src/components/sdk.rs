//! Frame-Grabber SDK Boundary
//!
//! Everything the driver needs from the vendor acquisition SDK, expressed as
//! two traits over opaque integer handles:
//!
//! - [`FeatureStore`]: named GenICam-style features on an acquisition device
//! - [`AcquisitionSdk`]: server discovery, device/buffer/transfer objects and
//!   the transfer engine (snap, grab, freeze, abort, wait, readback)
//!
//! Handles are plain values here. Ownership and teardown order live one level
//! up, in [`crate::components::resources`].

use gige_core::data::Roi;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Handle to an acquisition device object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Handle to a buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Handle to a transfer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub u32);

/// Errors reported by the SDK.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    /// Feature is not implemented by this device.
    #[error("feature '{0}' is not available")]
    FeatureUnavailable(String),

    /// Device refused a feature write.
    #[error("feature '{name}' rejected the value: {reason}")]
    Rejected {
        /// Feature name.
        name: String,
        /// Reason reported by the device.
        reason: String,
    },

    /// Handle does not refer to a live object.
    #[error("invalid {kind} handle {id}")]
    InvalidHandle {
        /// Object kind ("device", "buffer", "transfer").
        kind: &'static str,
        /// Raw handle value.
        id: u32,
    },

    /// Object could not be created.
    #[error("{0}")]
    CreateFailed(String),

    /// Any other SDK failure.
    #[error("{0}")]
    Failed(String),
}

/// Convenience alias for SDK results.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// A feature value as exchanged with the device.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    /// Text or enumeration entry.
    String(String),
    /// Integer feature.
    Integer(i64),
    /// Floating-point feature.
    Float(f64),
}

impl FeatureValue {
    /// Numeric view. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Integer(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::String(_) => None,
        }
    }

    /// Integer view. Floats convert only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Integer(v) => Some(*v),
            FeatureValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::String(s) => write!(f, "{}", s),
            FeatureValue::Integer(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Static description of a numeric feature.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureInfo {
    /// Lowest accepted value.
    pub min: Option<f64>,
    /// Highest accepted value.
    pub max: Option<f64>,
    /// Whether the feature accepts writes.
    pub writable: bool,
}

/// A frame-grabber server found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name used to open devices.
    pub name: String,
    /// Number of acquisition-device resources the server exposes.
    pub acq_device_count: usize,
}

/// Pixel storage format of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// One byte per pixel.
    Mono8,
    /// Two bytes per pixel, little-endian. Holds 10-bit data.
    Mono16,
}

impl BufferFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            BufferFormat::Mono8 => 1,
            BufferFormat::Mono16 => 2,
        }
    }
}

/// Layout of a buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    /// Number of frame slots.
    pub count: usize,
    /// Pixel storage format.
    pub format: BufferFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Keep a spare trash slot so a slow reader never blocks the transfer.
    pub with_trash: bool,
}

impl BufferSpec {
    /// Bytes in one frame slot.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() as usize
    }
}

/// Named features of an acquisition device.
pub trait FeatureStore: Send + Sync {
    /// Whether the device implements a feature.
    fn is_feature_available(&self, device: DeviceId, name: &str) -> SdkResult<bool>;

    /// Read a feature.
    fn get_feature(&self, device: DeviceId, name: &str) -> SdkResult<FeatureValue>;

    /// Write a feature.
    fn set_feature(&self, device: DeviceId, name: &str, value: FeatureValue) -> SdkResult<()>;

    /// Range and access information of a feature.
    fn feature_info(&self, device: DeviceId, name: &str) -> SdkResult<FeatureInfo>;
}

/// Acquisition objects and the transfer engine.
///
/// Every blocking call takes an explicit timeout; none waits forever.
pub trait AcquisitionSdk: FeatureStore {
    /// Enumerate frame-grabber servers.
    fn detect_servers(&self) -> SdkResult<Vec<ServerInfo>>;

    /// Open the acquisition device of a server.
    fn create_device(&self, server: &str) -> SdkResult<DeviceId>;

    /// Release a device. Fails while buffers still reference it.
    fn destroy_device(&self, device: DeviceId) -> SdkResult<()>;

    /// Allocate a buffer for frames from `device`.
    fn create_buffer(&self, device: DeviceId, spec: &BufferSpec) -> SdkResult<BufferId>;

    /// Release a buffer. Fails while a transfer still references it.
    fn destroy_buffer(&self, buffer: BufferId) -> SdkResult<()>;

    /// Connect `device` to `buffer` through a transfer engine.
    fn create_transfer(&self, device: DeviceId, buffer: BufferId) -> SdkResult<TransferId>;

    /// Release a transfer.
    fn destroy_transfer(&self, transfer: TransferId) -> SdkResult<()>;

    /// Start acquiring exactly `count` frames.
    fn snap(&self, transfer: TransferId, count: u32) -> SdkResult<()>;

    /// Start continuous acquisition.
    fn grab(&self, transfer: TransferId) -> SdkResult<()>;

    /// Ask continuous acquisition to stop after the current frame.
    fn freeze(&self, transfer: TransferId) -> SdkResult<()>;

    /// Stop acquisition immediately, discarding the frame in flight.
    fn abort(&self, transfer: TransferId) -> SdkResult<()>;

    /// Wait for the transfer to go idle. `Ok(false)` means the timeout expired.
    fn wait(&self, transfer: TransferId, timeout: Duration) -> SdkResult<bool>;

    /// Wait for the next frame of a continuous acquisition.
    ///
    /// Returns the frame counter, or `None` if the timeout expired or the
    /// transfer is not grabbing.
    fn wait_frame(&self, transfer: TransferId, timeout: Duration) -> SdkResult<Option<u64>>;

    /// Copy a rectangle of the most recent frame into `out`.
    ///
    /// `out` must hold exactly `rect.width * rect.height * bytes_per_pixel` bytes.
    fn read_rect(&self, buffer: BufferId, rect: Roi, out: &mut [u8]) -> SdkResult<()>;
}

impl From<SdkError> for gige_core::error::AdapterError {
    fn from(err: SdkError) -> Self {
        gige_core::error::AdapterError::Hardware(err.to_string())
    }
}
