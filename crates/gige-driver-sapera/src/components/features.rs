//! Camera Feature Access
//!
//! Names of the GenICam features the driver uses, the pixel types it supports,
//! and typed helpers for reading and writing them on an [`AcqDevice`].
//!
//! Identity features (vendor, model, serial number, ...) are optional on real
//! cameras. [`SaperaFeatures::device_info`] skips any the device does not
//! implement instead of failing.

use crate::components::resources::AcqDevice;
use crate::components::sdk::{BufferFormat, FeatureValue, SdkError};
use gige_core::error::{AdapterError, AdapterResult};

/// Pixel format enumeration (`Mono8`, `Mono10`, ...).
pub const PIXEL_FORMAT: &str = "PixelFormat";
/// Analog gain.
pub const GAIN: &str = "Gain";
/// Exposure time in microseconds.
pub const EXPOSURE_TIME: &str = "ExposureTime";
/// Sensor temperature in degrees Celsius.
pub const DEVICE_TEMPERATURE: &str = "DeviceTemperature";
/// Vertical binning factor.
pub const BINNING_VERTICAL: &str = "BinningVertical";
/// Horizontal binning factor.
pub const BINNING_HORIZONTAL: &str = "BinningHorizontal";
/// Unbinned sensor width in pixels.
pub const SENSOR_WIDTH: &str = "SensorWidth";
/// Unbinned sensor height in pixels.
pub const SENSOR_HEIGHT: &str = "SensorHeight";

/// Text identity features: (property label, feature name).
pub const DEVICE_INFO_STRINGS: &[(&str, &str)] = &[
    ("Manufacturer Name", "DeviceVendorName"),
    ("Family Name", "DeviceFamilyName"),
    ("Model Name", "DeviceModelName"),
    ("Device Version", "DeviceVersion"),
    ("Manufacturer Info", "DeviceManufacturerInfo"),
    ("Manufacturer Part Number", "deviceManufacturerPartNumber"),
    ("Firmware Version", "DeviceFirmwareVersion"),
    ("Serial Number", "DeviceSerialNumber"),
    ("Device User ID", "DeviceUserID"),
    ("MAC Address", "deviceMacAddress"),
    ("Sensor Color Type", "sensorColorType"),
    ("Sensor Pixel Coding", "PixelCoding"),
];

/// Integer identity features: (property label, feature name).
pub const DEVICE_INFO_INTEGERS: &[(&str, &str)] = &[
    ("Sensor Black Level", "BlackLevel"),
    ("Sensor Pixel Input", "pixelSizeInput"),
    ("Sensor Width", SENSOR_WIDTH),
    ("Sensor Height", SENSOR_HEIGHT),
    ("Image Pixel Size", "PixelSize"),
];

/// Binning factors the driver exposes.
pub const BINNING_CHOICES: &[u32] = &[1, 2, 4];

// =============================================================================
// Pixel types
// =============================================================================

/// Supported pixel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Mono8,
    Mono10,
}

impl PixelType {
    /// Parse a host label ("8bit", "10bit").
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "8bit" => Some(PixelType::Mono8),
            "10bit" => Some(PixelType::Mono10),
            _ => None,
        }
    }

    /// Host label.
    pub fn label(self) -> &'static str {
        match self {
            PixelType::Mono8 => "8bit",
            PixelType::Mono10 => "10bit",
        }
    }

    /// Parse a `PixelFormat` feature entry.
    pub fn from_feature(entry: &str) -> Option<Self> {
        match entry {
            "Mono8" => Some(PixelType::Mono8),
            "Mono10" => Some(PixelType::Mono10),
            _ => None,
        }
    }

    /// `PixelFormat` feature entry.
    pub fn feature_entry(self) -> &'static str {
        match self {
            PixelType::Mono8 => "Mono8",
            PixelType::Mono10 => "Mono10",
        }
    }

    /// Buffer storage format.
    pub fn buffer_format(self) -> BufferFormat {
        match self {
            PixelType::Mono8 => BufferFormat::Mono8,
            PixelType::Mono10 => BufferFormat::Mono16,
        }
    }

    /// Bytes per pixel in the host image.
    pub fn bytes_per_pixel(self) -> u32 {
        self.buffer_format().bytes_per_pixel()
    }

    /// Significant bits per pixel.
    pub fn bit_depth(self) -> u32 {
        match self {
            PixelType::Mono8 => 8,
            PixelType::Mono10 => 10,
        }
    }

    /// Host labels of every supported pixel type.
    pub fn all_choices() -> Vec<String> {
        vec!["8bit".into(), "10bit".into()]
    }
}

// =============================================================================
// Identity snapshot
// =============================================================================

/// Identity values read once at initialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// (label, value) for each available text feature.
    pub strings: Vec<(&'static str, String)>,
    /// (label, value) for each available integer feature.
    pub integers: Vec<(&'static str, i64)>,
}

impl DeviceInfo {
    fn string(&self, label: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.as_str())
    }

    /// Model name, if the device reports one.
    pub fn model_name(&self) -> Option<&str> {
        self.string("Model Name")
    }

    /// Serial number, if the device reports one.
    pub fn serial_number(&self) -> Option<&str> {
        self.string("Serial Number")
    }
}

// =============================================================================
// Typed access
// =============================================================================

/// Typed feature helpers.
pub struct SaperaFeatures;

impl SaperaFeatures {
    /// Current pixel type, `None` if the device reports a format the driver
    /// does not support.
    pub fn pixel_type(device: &AcqDevice) -> AdapterResult<Option<PixelType>> {
        let value = device.get_feature(PIXEL_FORMAT)?;
        Ok(value.as_str().and_then(PixelType::from_feature))
    }

    /// Write the pixel format. Only valid while no transfer exists.
    pub fn set_pixel_type(device: &AcqDevice, pixel_type: PixelType) -> AdapterResult<()> {
        device.set_feature(
            PIXEL_FORMAT,
            FeatureValue::String(pixel_type.feature_entry().to_string()),
        )?;
        Ok(())
    }

    /// Sensor size, or `fallback` when the device does not report it.
    pub fn sensor_size(device: &AcqDevice, fallback: (u32, u32)) -> (u32, u32) {
        let read = |name: &str, default: u32| {
            device
                .get_feature(name)
                .ok()
                .and_then(|v| v.as_i64())
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or_else(|| {
                    tracing::warn!(feature = name, default, "Sensor size not reported, using fallback");
                    default
                })
        };
        (read(SENSOR_WIDTH, fallback.0), read(SENSOR_HEIGHT, fallback.1))
    }

    /// Write both binning features.
    pub fn set_binning(device: &AcqDevice, binning: u32) -> AdapterResult<()> {
        let value = FeatureValue::Integer(i64::from(binning));
        device.set_feature(BINNING_VERTICAL, value.clone())?;
        device.set_feature(BINNING_HORIZONTAL, value)?;
        Ok(())
    }

    /// Device temperature in degrees Celsius.
    pub fn temperature(device: &AcqDevice) -> AdapterResult<f64> {
        Self::float(device, DEVICE_TEMPERATURE)
    }

    /// Read a numeric feature as `f64`.
    pub fn float(device: &AcqDevice, name: &str) -> AdapterResult<f64> {
        let value = device.get_feature(name)?;
        value.as_f64().ok_or_else(|| {
            AdapterError::Hardware(format!("feature '{}' is not numeric: {}", name, value))
        })
    }

    /// Write a floating-point feature.
    pub fn set_float(device: &AcqDevice, name: &str, value: f64) -> AdapterResult<()> {
        device.set_feature(name, FeatureValue::Float(value))?;
        Ok(())
    }

    /// Range of a numeric feature.
    pub fn range(device: &AcqDevice, name: &str) -> AdapterResult<(f64, f64)> {
        let info = device.feature_info(name)?;
        match (info.min, info.max) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(AdapterError::Hardware(format!(
                "feature '{}' does not report a range",
                name
            ))),
        }
    }

    /// Read every available identity feature.
    pub fn device_info(device: &AcqDevice) -> AdapterResult<DeviceInfo> {
        let mut info = DeviceInfo::default();

        for (label, name) in DEVICE_INFO_STRINGS {
            if let Some(value) = Self::optional(device, name)? {
                info.strings.push((*label, value.to_string()));
            }
        }
        for (label, name) in DEVICE_INFO_INTEGERS {
            if let Some(value) = Self::optional(device, name)? {
                match value.as_i64() {
                    Some(v) => info.integers.push((*label, v)),
                    None => tracing::warn!(feature = *name, %value, "Identity feature is not an integer"),
                }
            }
        }

        Ok(info)
    }

    fn optional(device: &AcqDevice, name: &str) -> AdapterResult<Option<FeatureValue>> {
        if !device.is_feature_available(name)? {
            tracing::debug!(feature = name, "Identity feature not implemented, skipping");
            return Ok(None);
        }
        match device.get_feature(name) {
            Ok(value) => Ok(Some(value)),
            Err(SdkError::FeatureUnavailable(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
