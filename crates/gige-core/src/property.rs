//! Device properties
//!
//! Named, typed, observable values exposed by a device to its host. Each
//! [`Property`] owns a `tokio::sync::watch` channel holding its current value,
//! so any number of subscribers can follow changes, plus shared metadata
//! (description, units, read-only flag, numeric limits, allowed values) that
//! every clone sees.
//!
//! Validation runs before any write reaches a value or the hardware:
//!
//! - read-only properties reject writes with [`AdapterError::CannotSetProperty`]
//! - values of the wrong type, outside the limits, or not among the allowed
//!   values are rejected with [`AdapterError::InvalidPropertyValue`]
//!
//! Values confirmed by the hardware (or read back from it) are stored with
//! [`Property::update`], which bypasses validation.
//!
//! # Example
//!
//! ```rust,ignore
//! let gain = Property::new("Gain", PropertyValue::Float(1.0))
//!     .with_limits(1.0, 8.0);
//!
//! let mut rx = gain.subscribe();
//! gain.set(PropertyValue::Float(2.0))?;
//! assert_eq!(*rx.borrow_and_update(), PropertyValue::Float(2.0));
//! ```

use crate::error::{AdapterError, AdapterResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Values
// =============================================================================

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Free-form or enumerated text.
    String,
    /// Signed integer.
    Integer,
    /// Floating-point number.
    Float,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PropertyType::String => "string",
            PropertyType::Integer => "int",
            PropertyType::Float => "float",
        };
        write!(f, "{}", label)
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Signed integer.
    Integer(i64),
    /// Floating-point number.
    Float(f64),
    /// Text.
    String(String),
}

impl PropertyValue {
    /// Type of this value.
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::String(_) => PropertyType::String,
        }
    }

    /// Numeric view of the value. Integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::String(_) => None,
        }
    }

    /// Integer view of the value. Floats convert only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse text into a value of the given type.
    pub fn parse(ty: PropertyType, text: &str) -> Option<Self> {
        let text = text.trim();
        match ty {
            PropertyType::String => Some(PropertyValue::String(text.to_string())),
            PropertyType::Integer => text.parse().ok().map(PropertyValue::Integer),
            PropertyType::Float => text.parse().ok().map(PropertyValue::Float),
        }
    }

    /// Convert this value to `ty` where the conversion is lossless.
    fn coerce(&self, ty: PropertyType) -> Option<Self> {
        match (ty, self) {
            (PropertyType::Float, v) => v.as_f64().map(PropertyValue::Float),
            (PropertyType::Integer, v) => v.as_i64().map(PropertyValue::Integer),
            (PropertyType::String, PropertyValue::String(s)) => {
                Some(PropertyValue::String(s.clone()))
            }
            (PropertyType::String, _) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metadata for a property.
///
/// Shared between all clones of a [`Property`], so limits installed after
/// creation (for example ranges queried from the hardware at initialization)
/// are visible to every holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyMetadata {
    /// Property name (unique within a device).
    pub name: String,

    /// Human-readable description.
    pub description: Option<String>,

    /// Physical units (e.g. "ms", "C").
    pub units: Option<String>,

    /// Whether writes from the host are rejected.
    pub read_only: bool,

    /// Value type.
    pub dtype: PropertyType,

    /// Lower limit for numeric values.
    #[serde(default)]
    pub min_value: Option<f64>,

    /// Upper limit for numeric values.
    #[serde(default)]
    pub max_value: Option<f64>,

    /// Allowed values, compared by their text form. Empty means unrestricted.
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl PropertyMetadata {
    fn check(&self, value: &PropertyValue) -> AdapterResult<()> {
        if let Some(v) = value.as_f64() {
            if !v.is_finite() {
                return Err(AdapterError::invalid_value(&self.name, "value is not finite"));
            }
            if let Some(min) = self.min_value {
                if v < min {
                    return Err(AdapterError::invalid_value(
                        &self.name,
                        format!("{} is below the minimum {}", v, min),
                    ));
                }
            }
            if let Some(max) = self.max_value {
                if v > max {
                    return Err(AdapterError::invalid_value(
                        &self.name,
                        format!("{} is above the maximum {}", v, max),
                    ));
                }
            }
        }

        if !self.allowed_values.is_empty() {
            let text = value.to_string();
            if !self.allowed_values.iter().any(|allowed| allowed == &text) {
                return Err(AdapterError::invalid_value(
                    &self.name,
                    format!(
                        "'{}' is not one of: {}",
                        text,
                        self.allowed_values.join(", ")
                    ),
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Property
// =============================================================================

/// A thread-safe, observable device property.
///
/// Clones share the same value channel and metadata.
#[derive(Clone)]
pub struct Property {
    sender: watch::Sender<PropertyValue>,
    shared: Arc<RwLock<PropertyMetadata>>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("metadata", &*self.shared.read())
            .field("value", &*self.sender.borrow())
            .finish()
    }
}

impl Property {
    /// Create a property. Its type is taken from the initial value.
    pub fn new(name: impl Into<String>, initial: PropertyValue) -> Self {
        let dtype = initial.property_type();
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            shared: Arc::new(RwLock::new(PropertyMetadata {
                name: name.into(),
                description: None,
                units: None,
                read_only: false,
                dtype,
                min_value: None,
                max_value: None,
                allowed_values: Vec::new(),
            })),
        }
    }

    /// Add a description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().description = Some(description.into());
        self
    }

    /// Add units.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().units = Some(units.into());
        self
    }

    /// Mark the property read-only for the host.
    pub fn read_only(self) -> Self {
        self.shared.write().read_only = true;
        self
    }

    /// Restrict writes to a numeric range.
    pub fn with_limits(self, min: f64, max: f64) -> Self {
        self.set_limits(min, max);
        self
    }

    /// Restrict writes to a fixed set of values.
    pub fn with_allowed_values<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_allowed_values(values);
        self
    }

    /// Install numeric limits after creation.
    pub fn set_limits(&self, min: f64, max: f64) {
        let mut meta = self.shared.write();
        meta.min_value = Some(min);
        meta.max_value = Some(max);
    }

    /// Replace the allowed values after creation.
    pub fn set_allowed_values<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.write().allowed_values = values.into_iter().map(Into::into).collect();
    }

    /// Current value.
    pub fn get(&self) -> PropertyValue {
        self.sender.borrow().clone()
    }

    /// Property name.
    pub fn name(&self) -> String {
        self.shared.read().name.clone()
    }

    /// Metadata snapshot.
    pub fn metadata(&self) -> PropertyMetadata {
        self.shared.read().clone()
    }

    /// Whether the host may write this property.
    pub fn is_read_only(&self) -> bool {
        self.shared.read().read_only
    }

    /// Validate a host write without applying it.
    ///
    /// Returns the value converted to this property's type (an integer
    /// written to a float property becomes a float).
    pub fn validate(&self, value: &PropertyValue) -> AdapterResult<PropertyValue> {
        let meta = self.shared.read();
        if meta.read_only {
            return Err(AdapterError::CannotSetProperty(meta.name.clone()));
        }
        let value = value.coerce(meta.dtype).ok_or_else(|| {
            AdapterError::invalid_value(
                &meta.name,
                format!("expected a {} value, got '{}'", meta.dtype, value),
            )
        })?;
        meta.check(&value)?;
        Ok(value)
    }

    /// Validate and store a host write, notifying subscribers.
    pub fn set(&self, value: PropertyValue) -> AdapterResult<()> {
        let value = self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Store a value confirmed by the hardware, bypassing validation.
    ///
    /// Subscribers are only notified when the value actually changes.
    pub fn update(&self, value: PropertyValue) {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<PropertyValue> {
        self.sender.subscribe()
    }
}

// =============================================================================
// PropertySet
// =============================================================================

/// Name-ordered collection of device properties.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    properties: BTreeMap<String, Property>,
}

impl PropertySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property, replacing any existing one with the same name.
    pub fn register(&mut self, property: Property) -> Property {
        let name = property.name();
        if self.properties.contains_key(&name) {
            tracing::debug!(property = %name, "Replacing existing property");
        }
        self.properties.insert(name, property.clone());
        property
    }

    /// Look up a property.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Look up a property, failing with [`AdapterError::UnknownProperty`].
    pub fn require(&self, name: &str) -> AdapterResult<&Property> {
        self.get(name)
            .ok_or_else(|| AdapterError::UnknownProperty(name.to_string()))
    }

    /// Whether a property with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Property names in order.
    pub fn names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    /// Iterate over properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Remove every property.
    pub fn clear(&mut self) {
        self.properties.clear();
    }

    /// Current values as a JSON object keyed by property name.
    pub fn snapshot(&self) -> serde_json::Value {
        let map = self
            .properties
            .iter()
            .map(|(name, p)| {
                let value = serde_json::to_value(p.get()).unwrap_or(serde_json::Value::Null);
                (name.clone(), value)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_rejects_writes() {
        let temp = Property::new("Device Temperature", PropertyValue::Float(40.0)).read_only();
        let err = temp.set(PropertyValue::Float(20.0)).unwrap_err();
        assert!(matches!(err, AdapterError::CannotSetProperty(_)));
        assert_eq!(temp.get(), PropertyValue::Float(40.0));
    }

    #[test]
    fn limits_reject_out_of_range() {
        let gain = Property::new("Gain", PropertyValue::Float(1.0)).with_limits(1.0, 8.0);
        assert!(gain.set(PropertyValue::Float(4.0)).is_ok());
        let err = gain.set(PropertyValue::Float(9.0)).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPropertyValue { .. }));
        assert_eq!(gain.get(), PropertyValue::Float(4.0));
    }

    #[test]
    fn allowed_values_compare_text_form() {
        let binning = Property::new("Binning", PropertyValue::Integer(1))
            .with_allowed_values(["1", "2", "4"]);
        assert!(binning.set(PropertyValue::Integer(2)).is_ok());
        assert!(binning.set(PropertyValue::Integer(3)).is_err());
    }

    #[test]
    fn integer_coerces_into_float_property() {
        let exposure = Property::new("Exposure", PropertyValue::Float(1.0));
        exposure.set(PropertyValue::Integer(5)).unwrap();
        assert_eq!(exposure.get(), PropertyValue::Float(5.0));
    }

    #[test]
    fn text_does_not_coerce_into_number() {
        let exposure = Property::new("Exposure", PropertyValue::Float(1.0));
        assert!(exposure.set(PropertyValue::from("fast")).is_err());
    }

    #[test]
    fn update_bypasses_validation() {
        let temp = Property::new("Device Temperature", PropertyValue::Float(40.0)).read_only();
        temp.update(PropertyValue::Float(41.5));
        assert_eq!(temp.get(), PropertyValue::Float(41.5));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let gain = Property::new("Gain", PropertyValue::Float(1.0));
        let mut rx = gain.subscribe();
        gain.set(PropertyValue::Float(2.5)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), PropertyValue::Float(2.5));
    }

    #[test]
    fn set_keeps_name_order_and_snapshots() {
        let mut set = PropertySet::new();
        set.register(Property::new("PixelType", PropertyValue::from("8bit")));
        set.register(Property::new("Binning", PropertyValue::Integer(1)));
        assert_eq!(set.names(), vec!["Binning".to_string(), "PixelType".to_string()]);
        assert!(matches!(
            set.require("Nope"),
            Err(AdapterError::UnknownProperty(_))
        ));
        let snapshot = set.snapshot();
        assert_eq!(snapshot["Binning"], serde_json::json!(1));
        assert_eq!(snapshot["PixelType"], serde_json::json!("8bit"));
    }

    #[test]
    fn parse_follows_type() {
        assert_eq!(
            PropertyValue::parse(PropertyType::Float, " 2.5 "),
            Some(PropertyValue::Float(2.5))
        );
        assert_eq!(
            PropertyValue::parse(PropertyType::Integer, "4"),
            Some(PropertyValue::Integer(4))
        );
        assert_eq!(PropertyValue::parse(PropertyType::Integer, "x"), None);
    }
}
