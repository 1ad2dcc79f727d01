//! Core types and traits for the Sapera GigE camera adapter.
//!
//! - [`error`]: the adapter error type and host status codes
//! - [`property`]: observable, validated device properties
//! - [`data`]: frames, the host image buffer and ROI geometry
//! - [`capabilities`]: traits a camera adapter implements

pub mod capabilities;
pub mod data;
pub mod error;
pub mod property;

pub use capabilities::{
    Camera, Device, ExposureControl, ImageSource, Parameterized, SequenceAcquisition,
    SequenceSettings,
};
pub use data::{Frame, ImageBuffer, Roi};
pub use error::{AdapterError, AdapterResult, ErrorKind};
pub use property::{Property, PropertyMetadata, PropertySet, PropertyType, PropertyValue};
