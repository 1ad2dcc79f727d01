//! Property / Feature Bridge
//!
//! Host properties that mirror camera features are described by one static
//! table, [`BINDINGS`]. Each [`Binding`] names the features behind a property,
//! which directions values flow, how units convert, and which resource side
//! effect a write triggers. [`PropertyBridge`] interprets the table:
//!
//! - [`PropertyBridge::before_get`] refreshes a property from its feature
//! - [`PropertyBridge::after_set`] pushes a validated write to the hardware,
//!   restoring the last hardware-confirmed value if the device refuses it
//! - [`PropertyBridge::install_limits`] copies feature ranges onto properties
//!
//! | Property           | Features                              | Access     | Conversion     | Side effect  |
//! |--------------------|---------------------------------------|------------|----------------|--------------|
//! | Binning            | BinningVertical, BinningHorizontal    | write-only | identity       | geometry     |
//! | PixelType          | PixelFormat                           | read/write | label          | pixel format |
//! | Gain               | Gain                                  | read/write | identity       | none         |
//! | Exposure           | ExposureTime                          | read/write | ms = us / 1000 | none         |
//! | Device Temperature | DeviceTemperature                     | read-only  | identity       | none         |
//!
//! Properties not in the table (identity snapshot, description, camera
//! server) are pure software values.

use crate::components::features::{
    PixelType, SaperaFeatures, BINNING_HORIZONTAL, BINNING_VERTICAL, DEVICE_TEMPERATURE,
    EXPOSURE_TIME, GAIN, PIXEL_FORMAT,
};
use crate::components::resources::AcqDevice;
use crate::components::sdk::{FeatureValue, SdkError};
use gige_core::error::{AdapterError, AdapterResult};
use gige_core::property::{Property, PropertySet, PropertyType, PropertyValue};

/// Host-facing property names.
pub mod names {
    /// Binning factor (1, 2 or 4).
    pub const BINNING: &str = "Binning";
    /// Pixel type ("8bit" or "10bit").
    pub const PIXEL_TYPE: &str = "PixelType";
    /// Analog gain.
    pub const GAIN: &str = "Gain";
    /// Exposure time in milliseconds.
    pub const EXPOSURE: &str = "Exposure";
    /// Sensor temperature, read-only.
    pub const TEMPERATURE: &str = "Device Temperature";
    /// Adapter description, read-only.
    pub const DESCRIPTION: &str = "Description";
    /// Server the camera was opened on, read-only.
    pub const CAMERA_SERVER: &str = "Camera Server";
}

/// Directions in which values flow between property and feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Refreshed from the feature, never written by the host.
    ReadOnly,
    /// Pushed to the feature, read back from the software value.
    WriteOnly,
    /// Both.
    ReadWrite,
}

impl Access {
    fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }
}

/// Unit conversion between property and feature values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// Same value on both sides.
    Identity,
    /// feature = property * factor.
    Scale(f64),
    /// Host pixel-type label to `PixelFormat` entry.
    PixelTypeLabel,
}

impl Conversion {
    /// Convert a property value to the feature value written to hardware.
    pub fn to_feature(self, value: &PropertyValue) -> Option<FeatureValue> {
        match self {
            Conversion::Identity => Some(match value {
                PropertyValue::Integer(v) => FeatureValue::Integer(*v),
                PropertyValue::Float(v) => FeatureValue::Float(*v),
                PropertyValue::String(s) => FeatureValue::String(s.clone()),
            }),
            Conversion::Scale(factor) => value.as_f64().map(|v| FeatureValue::Float(v * factor)),
            Conversion::PixelTypeLabel => value
                .as_str()
                .and_then(PixelType::from_label)
                .map(|p| FeatureValue::String(p.feature_entry().to_string())),
        }
    }

    /// Convert a feature value read from hardware to a property value of type `ty`.
    pub fn to_property(self, value: &FeatureValue, ty: PropertyType) -> Option<PropertyValue> {
        match self {
            Conversion::Identity => match ty {
                PropertyType::Float => value.as_f64().map(PropertyValue::Float),
                PropertyType::Integer => value.as_i64().map(PropertyValue::Integer),
                PropertyType::String => Some(PropertyValue::String(value.to_string())),
            },
            Conversion::Scale(factor) => value.as_f64().map(|v| PropertyValue::Float(v / factor)),
            Conversion::PixelTypeLabel => value
                .as_str()
                .and_then(PixelType::from_feature)
                .map(|p| PropertyValue::String(p.label().to_string())),
        }
    }

    fn bound_to_property(self, bound: f64) -> f64 {
        match self {
            Conversion::Scale(factor) => bound / factor,
            _ => bound,
        }
    }
}

/// Resource work a successful write requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Nothing beyond the feature write.
    None,
    /// Image geometry changed: rebuild the buffer and resize the host image.
    Geometry,
    /// Pixel format changed: reconfigure the buffer and resize the host image.
    PixelFormat,
}

/// One row of the binding table.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    /// Host property name.
    pub property: &'static str,
    /// Features written on set; the first is read on get.
    pub features: &'static [&'static str],
    /// Value directions.
    pub access: Access,
    /// Unit conversion.
    pub conversion: Conversion,
    /// Resource work after a successful write.
    pub side_effect: SideEffect,
    /// Copy the feature's range onto the property at initialization.
    pub ranged: bool,
}

/// Every hardware-backed property.
pub static BINDINGS: &[Binding] = &[
    Binding {
        property: names::BINNING,
        features: &[BINNING_VERTICAL, BINNING_HORIZONTAL],
        access: Access::WriteOnly,
        conversion: Conversion::Identity,
        side_effect: SideEffect::Geometry,
        ranged: false,
    },
    Binding {
        property: names::PIXEL_TYPE,
        features: &[PIXEL_FORMAT],
        access: Access::ReadWrite,
        conversion: Conversion::PixelTypeLabel,
        side_effect: SideEffect::PixelFormat,
        ranged: false,
    },
    Binding {
        property: names::GAIN,
        features: &[GAIN],
        access: Access::ReadWrite,
        conversion: Conversion::Identity,
        side_effect: SideEffect::None,
        ranged: true,
    },
    Binding {
        property: names::EXPOSURE,
        features: &[EXPOSURE_TIME],
        access: Access::ReadWrite,
        conversion: Conversion::Scale(1000.0),
        side_effect: SideEffect::None,
        ranged: true,
    },
    Binding {
        property: names::TEMPERATURE,
        features: &[DEVICE_TEMPERATURE],
        access: Access::ReadOnly,
        conversion: Conversion::Identity,
        side_effect: SideEffect::None,
        ranged: false,
    },
];

/// Result of pushing a write through the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterSet {
    /// Features written; apply the side effect.
    Applied(SideEffect),
    /// Feature can only change during resource reconfiguration; the caller
    /// must apply `value` as part of `side_effect`.
    Deferred {
        /// Work to perform.
        side_effect: SideEffect,
        /// Converted feature value.
        value: FeatureValue,
    },
}

/// Interpreter for [`BINDINGS`].
pub struct PropertyBridge;

impl PropertyBridge {
    /// Binding of a property, if it is hardware-backed.
    pub fn binding(property: &str) -> Option<&'static Binding> {
        BINDINGS.iter().find(|b| b.property == property)
    }

    /// Refresh `property` from its feature.
    pub fn before_get(binding: &Binding, device: &AcqDevice, property: &Property) -> AdapterResult<()> {
        if !binding.access.readable() {
            return Ok(());
        }
        let value = Self::read(binding, device, property.metadata().dtype)?;
        property.update(value);
        Ok(())
    }

    /// Push the value just stored in `property` to the hardware.
    ///
    /// `previous` is the value before the write. If the device refuses the new
    /// value, the property is restored to what the hardware reports (or to
    /// `previous` when the feature cannot be read) and
    /// [`AdapterError::InvalidPropertyValue`] is returned.
    pub fn after_set(
        binding: &Binding,
        device: &AcqDevice,
        property: &Property,
        previous: &PropertyValue,
    ) -> AdapterResult<AfterSet> {
        if binding.access == Access::ReadOnly {
            property.update(previous.clone());
            return Err(AdapterError::CannotSetProperty(binding.property.to_string()));
        }

        let value = property.get();
        let Some(converted) = binding.conversion.to_feature(&value) else {
            property.update(previous.clone());
            return Err(AdapterError::invalid_value(
                binding.property,
                format!("'{}' has no hardware equivalent", value),
            ));
        };

        if binding.side_effect == SideEffect::PixelFormat {
            return Ok(AfterSet::Deferred {
                side_effect: binding.side_effect,
                value: converted,
            });
        }

        for (written, feature) in binding.features.iter().enumerate() {
            if let Err(e) = device.set_feature(feature, converted.clone()) {
                tracing::warn!(
                    property = binding.property,
                    feature = *feature,
                    %value,
                    error = %e,
                    "Feature write refused, restoring previous value"
                );
                Self::rollback(binding, device, property, previous, written);
                return Err(match e {
                    SdkError::Rejected { reason, .. } => {
                        AdapterError::invalid_value(binding.property, reason)
                    }
                    other => other.into(),
                });
            }
        }

        tracing::debug!(property = binding.property, %value, "Property pushed to hardware");
        Ok(AfterSet::Applied(binding.side_effect))
    }

    /// Install the feature range of a ranged binding on `property`.
    pub fn install_limits(binding: &Binding, device: &AcqDevice, property: &Property) -> AdapterResult<()> {
        if !binding.ranged {
            return Ok(());
        }
        let (min, max) = SaperaFeatures::range(device, binding.features[0])?;
        let low = binding.conversion.bound_to_property(min);
        let high = binding.conversion.bound_to_property(max);
        property.set_limits(low.min(high), low.max(high));
        tracing::debug!(property = binding.property, min = low, max = high, "Installed property limits");
        Ok(())
    }

    /// Refresh every readable hardware-backed property in `properties`.
    pub fn refresh_all(device: &AcqDevice, properties: &PropertySet) -> AdapterResult<()> {
        for binding in BINDINGS {
            if let Some(property) = properties.get(binding.property) {
                Self::before_get(binding, device, property)?;
            }
        }
        Ok(())
    }

    fn read(binding: &Binding, device: &AcqDevice, ty: PropertyType) -> AdapterResult<PropertyValue> {
        let feature = binding.features[0];
        let raw = device.get_feature(feature)?;
        binding.conversion.to_property(&raw, ty).ok_or_else(|| {
            AdapterError::Hardware(format!(
                "feature '{}' value '{}' does not map to property '{}'",
                feature, raw, binding.property
            ))
        })
    }

    fn rollback(
        binding: &Binding,
        device: &AcqDevice,
        property: &Property,
        previous: &PropertyValue,
        written: usize,
    ) {
        if let Some(old) = binding.conversion.to_feature(previous) {
            for feature in &binding.features[..written] {
                if let Err(e) = device.set_feature(feature, old.clone()) {
                    tracing::warn!(feature = *feature, error = %e, "Failed to restore feature");
                }
            }
        }

        let confirmed = if binding.access.readable() {
            Self::read(binding, device, property.metadata().dtype).ok()
        } else {
            None
        };
        property.update(confirmed.unwrap_or_else(|| previous.clone()));
    }
}
