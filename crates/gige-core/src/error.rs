//! Error types for the camera adapter.
//!
//! This module defines [`AdapterError`], the single error type returned across
//! the host-facing surface of the adapter. Every entry point reports failure
//! through it, and each variant maps to one stable integer status code via
//! [`AdapterError::status_code`] so hosts that speak in status codes can
//! translate without string matching.
//!
//! ## Error Categories
//!
//! - **Lifecycle**: `Discovery`, `Creation`, `Reformat`, `NotInitialized`.
//!   Raised while building or rebuilding the device, buffer and transfer
//!   resources. A failed creation always leaves the adapter with no resources.
//! - **Acquisition**: `Busy`, `Timeout`, `SequenceUnavailable`, `InvalidRoi`.
//!   Raised by snap, readback and streaming operations.
//! - **Properties**: `InvalidPropertyValue`, `CannotSetProperty`,
//!   `UnknownProperty`. Raised by the property layer and the hardware bridge.
//! - **Plumbing**: `Hardware`, `Configuration`.

use thiserror::Error;

/// Stable integer status codes reported to hosts.
pub mod status {
    /// Operation succeeded.
    pub const OK: i32 = 0;
    /// Generic failure.
    pub const ERR: i32 = 1;
    /// Property name not known to the device.
    pub const INVALID_PROPERTY: i32 = 2;
    /// Property value rejected by validation or by the hardware.
    pub const INVALID_PROPERTY_VALUE: i32 = 3;
    /// Native resource could not be created or released.
    pub const NATIVE_MODULE_FAILED: i32 = 6;
    /// Requested feature is not supported by this device.
    pub const NOT_SUPPORTED: i32 = 9;
    /// Input parameter out of range (ROI outside the frame).
    pub const INVALID_INPUT_PARAM: i32 = 21;
    /// Single-frame capture failed or timed out.
    pub const SNAP_IMAGE_FAILED: i32 = 25;
    /// Operation refused while a sequence is running.
    pub const CAMERA_BUSY_ACQUIRING: i32 = 30;
    /// Property is read-only.
    pub const CAN_NOT_SET_PROPERTY: i32 = 32;
}

/// Coarse classification of an [`AdapterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    Creation,
    Reformat,
    Busy,
    Timeout,
    InvalidPropertyValue,
    CannotSetProperty,
    UnknownProperty,
    InvalidRoi,
    NotInitialized,
    Unsupported,
    Hardware,
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::Creation => "creation",
            ErrorKind::Reformat => "reformat",
            ErrorKind::Busy => "busy",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidPropertyValue => "invalid_property_value",
            ErrorKind::CannotSetProperty => "cannot_set_property",
            ErrorKind::UnknownProperty => "unknown_property",
            ErrorKind::InvalidRoi => "invalid_roi",
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Hardware => "hardware",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

impl ErrorKind {
    /// Integer status code for this kind, see [`status`].
    pub fn status_code(self) -> i32 {
        match self {
            ErrorKind::Discovery | ErrorKind::Creation | ErrorKind::Reformat => {
                status::NATIVE_MODULE_FAILED
            }
            ErrorKind::Busy => status::CAMERA_BUSY_ACQUIRING,
            ErrorKind::Timeout => status::SNAP_IMAGE_FAILED,
            ErrorKind::InvalidPropertyValue => status::INVALID_PROPERTY_VALUE,
            ErrorKind::CannotSetProperty => status::CAN_NOT_SET_PROPERTY,
            ErrorKind::UnknownProperty => status::INVALID_PROPERTY,
            ErrorKind::InvalidRoi => status::INVALID_INPUT_PARAM,
            ErrorKind::Unsupported => status::NOT_SUPPORTED,
            ErrorKind::NotInitialized | ErrorKind::Hardware | ErrorKind::Configuration => {
                status::ERR
            }
        }
    }
}

/// Convenience alias for results using the adapter error type.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Primary error type for the camera adapter.
///
/// # Example
///
/// ```rust,ignore
/// use gige_core::error::{AdapterError, AdapterResult};
///
/// fn check_idle(capturing: bool) -> AdapterResult<()> {
///     if capturing {
///         return Err(AdapterError::Busy);
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    /// No frame-grabber server exposing an acquisition device was found.
    #[error("Camera discovery failed: {0}")]
    Discovery(String),

    /// A device, buffer or transfer object could not be created.
    ///
    /// Everything created before the failing step has already been released
    /// when this error is returned.
    #[error("Failed to create {object}: {message}")]
    Creation {
        /// Which resource failed ("device", "buffer" or "transfer").
        object: &'static str,
        /// Message reported by the frame-grabber layer.
        message: String,
    },

    /// Pixel-format or geometry reconfiguration failed part-way.
    ///
    /// The adapter holds no resources afterwards and must be re-initialized.
    #[error("Buffer reconfiguration failed: {0}")]
    Reformat(String),

    /// Operation refused because a sequence acquisition is running.
    #[error("Camera is busy acquiring a sequence")]
    Busy,

    /// A bounded wait on the transfer engine expired.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// Operation that was waiting.
        operation: &'static str,
        /// Timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// Property value rejected by validation or by the hardware.
    #[error("Invalid value for property '{name}': {reason}")]
    InvalidPropertyValue {
        /// Property name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Property is read-only.
    #[error("Property '{0}' cannot be set")]
    CannotSetProperty(String),

    /// No property with this name exists.
    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    /// ROI rectangle does not fit inside the current frame.
    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    /// Operation requires an initialized device.
    #[error("Device is not initialized")]
    NotInitialized,

    /// Sequence acquisition could not be started or delivered frames.
    #[error("Sequence acquisition unavailable: {0}")]
    SequenceUnavailable(String),

    /// Error reported by the frame-grabber layer outside of resource creation.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Configuration values are logically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl AdapterError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Discovery(_) => ErrorKind::Discovery,
            AdapterError::Creation { .. } => ErrorKind::Creation,
            AdapterError::Reformat(_) => ErrorKind::Reformat,
            AdapterError::Busy => ErrorKind::Busy,
            AdapterError::Timeout { .. } => ErrorKind::Timeout,
            AdapterError::InvalidPropertyValue { .. } => ErrorKind::InvalidPropertyValue,
            AdapterError::CannotSetProperty(_) => ErrorKind::CannotSetProperty,
            AdapterError::UnknownProperty(_) => ErrorKind::UnknownProperty,
            AdapterError::InvalidRoi(_) => ErrorKind::InvalidRoi,
            AdapterError::NotInitialized => ErrorKind::NotInitialized,
            AdapterError::SequenceUnavailable(_) => ErrorKind::Unsupported,
            AdapterError::Hardware(_) => ErrorKind::Hardware,
            AdapterError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Integer status code reported to hosts.
    pub fn status_code(&self) -> i32 {
        self.kind().status_code()
    }

    /// Shorthand for [`AdapterError::InvalidPropertyValue`].
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::InvalidPropertyValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Status code for a result, `status::OK` on success.
pub fn status_of<T>(result: &AdapterResult<T>) -> i32 {
    match result {
        Ok(_) => status::OK,
        Err(e) => e.status_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_busy_acquiring() {
        assert_eq!(AdapterError::Busy.status_code(), status::CAMERA_BUSY_ACQUIRING);
        assert_eq!(AdapterError::Busy.kind().to_string(), "busy");
    }

    #[test]
    fn property_errors_have_distinct_codes() {
        let invalid = AdapterError::invalid_value("Exposure", "out of range");
        let read_only = AdapterError::CannotSetProperty("Device Temperature".into());
        let unknown = AdapterError::UnknownProperty("Nope".into());

        assert_eq!(invalid.status_code(), status::INVALID_PROPERTY_VALUE);
        assert_eq!(read_only.status_code(), status::CAN_NOT_SET_PROPERTY);
        assert_eq!(unknown.status_code(), status::INVALID_PROPERTY);
    }

    #[test]
    fn creation_message_names_object() {
        let err = AdapterError::Creation {
            object: "buffer",
            message: "out of memory".into(),
        };
        assert_eq!(err.to_string(), "Failed to create buffer: out of memory");
        assert_eq!(err.status_code(), status::NATIVE_MODULE_FAILED);
    }

    #[test]
    fn status_of_ok_is_zero() {
        let ok: AdapterResult<()> = Ok(());
        let timeout: AdapterResult<()> = Err(AdapterError::Timeout {
            operation: "snap",
            timeout_ms: 2500,
        });
        assert_eq!(status_of(&ok), status::OK);
        assert_eq!(status_of(&timeout), status::SNAP_IMAGE_FAILED);
    }
}
