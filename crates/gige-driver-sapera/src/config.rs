//! Driver configuration.

use gige_core::error::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::SaperaGigE`] instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaperaConfig {
    /// Preferred server name. The first camera found is used when unset or
    /// not discovered.
    #[serde(default)]
    pub server: Option<String>,

    /// Frame slots in the acquisition buffer.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Bound on a single-frame capture.
    #[serde(default = "default_snap_timeout_ms")]
    pub snap_timeout_ms: u64,

    /// Bound on stopping the transfer engine.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Frames queued between the sequence worker and the host.
    #[serde(default = "default_sequence_queue_depth")]
    pub sequence_queue_depth: usize,

    /// Exposure written at initialization, in milliseconds.
    #[serde(default = "default_exposure_ms")]
    pub default_exposure_ms: f64,

    /// Gain written at initialization.
    #[serde(default = "default_gain")]
    pub default_gain: f64,

    /// Sensor width used when the device does not report one.
    #[serde(default = "default_sensor_width")]
    pub fallback_sensor_width: u32,

    /// Sensor height used when the device does not report one.
    #[serde(default = "default_sensor_height")]
    pub fallback_sensor_height: u32,
}

fn default_buffer_count() -> usize {
    2
}

fn default_snap_timeout_ms() -> u64 {
    2500
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_sequence_queue_depth() -> usize {
    8
}

fn default_exposure_ms() -> f64 {
    1.0
}

fn default_gain() -> f64 {
    1.0
}

fn default_sensor_width() -> u32 {
    1280
}

fn default_sensor_height() -> u32 {
    1024
}

impl Default for SaperaConfig {
    fn default() -> Self {
        Self {
            server: None,
            buffer_count: default_buffer_count(),
            snap_timeout_ms: default_snap_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            sequence_queue_depth: default_sequence_queue_depth(),
            default_exposure_ms: default_exposure_ms(),
            default_gain: default_gain(),
            fallback_sensor_width: default_sensor_width(),
            fallback_sensor_height: default_sensor_height(),
        }
    }
}

impl SaperaConfig {
    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.buffer_count == 0 {
            return Err(AdapterError::Configuration(
                "buffer_count must be at least 1".into(),
            ));
        }
        if self.snap_timeout_ms == 0 || self.stop_timeout_ms == 0 {
            return Err(AdapterError::Configuration(
                "snap_timeout_ms and stop_timeout_ms must be positive".into(),
            ));
        }
        if self.sequence_queue_depth == 0 {
            return Err(AdapterError::Configuration(
                "sequence_queue_depth must be at least 1".into(),
            ));
        }
        if !(self.default_exposure_ms.is_finite() && self.default_exposure_ms > 0.0) {
            return Err(AdapterError::Configuration(format!(
                "default_exposure_ms must be positive, got {}",
                self.default_exposure_ms
            )));
        }
        if !self.default_gain.is_finite() {
            return Err(AdapterError::Configuration(
                "default_gain must be finite".into(),
            ));
        }
        if self.fallback_sensor_width == 0 || self.fallback_sensor_height == 0 {
            return Err(AdapterError::Configuration(
                "fallback sensor size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Bound on a single-frame capture.
    pub fn snap_timeout(&self) -> Duration {
        Duration::from_millis(self.snap_timeout_ms)
    }

    /// Bound on freezing a running transfer.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Sensor size used when the device does not report one.
    pub fn fallback_sensor_size(&self) -> (u32, u32) {
        (self.fallback_sensor_width, self.fallback_sensor_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SaperaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.snap_timeout(), Duration::from_millis(2500));
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SaperaConfig = toml::from_str(
            r#"
            server = "Nano-M1280_1"
            snap_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.server.as_deref(), Some("Nano-M1280_1"));
        assert_eq!(config.snap_timeout_ms, 1000);
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.sequence_queue_depth, 8);
    }

    #[test]
    fn zero_buffers_rejected() {
        let config = SaperaConfig {
            buffer_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AdapterError::Configuration(_))
        ));
    }
}
