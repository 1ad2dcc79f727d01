//! Shared helpers for driver integration tests.
//!
//! Every test runs against the simulated SDK. Cameras are built with a small
//! sensor so frame copies stay cheap.

#![allow(dead_code)] // Not every helper is used by every test file

use gige_core::capabilities::Device;
use gige_driver_sapera::components::mock::{MockCameraConfig, MockSdk};
use gige_driver_sapera::{SaperaConfig, SaperaGigE};
use std::sync::Arc;

pub const SENSOR_WIDTH: u32 = 128;
pub const SENSOR_HEIGHT: u32 = 96;

pub fn mock_sdk() -> Arc<MockSdk> {
    Arc::new(MockSdk::with_config(MockCameraConfig {
        sensor_width: SENSOR_WIDTH,
        sensor_height: SENSOR_HEIGHT,
        ..Default::default()
    }))
}

pub fn test_config() -> SaperaConfig {
    SaperaConfig {
        snap_timeout_ms: 500,
        stop_timeout_ms: 500,
        ..Default::default()
    }
}

/// Uninitialized camera on a fresh simulated SDK.
pub fn camera() -> (Arc<MockSdk>, SaperaGigE) {
    camera_with(test_config())
}

pub fn camera_with(config: SaperaConfig) -> (Arc<MockSdk>, SaperaGigE) {
    let sdk = mock_sdk();
    let camera = SaperaGigE::new(sdk.clone(), config);
    (sdk, camera)
}

/// Initialized camera on a fresh simulated SDK.
pub async fn initialized_camera() -> (Arc<MockSdk>, SaperaGigE) {
    let (sdk, mut camera) = camera();
    camera
        .initialize()
        .await
        .expect("simulated camera should initialize");
    (sdk, camera)
}

/// Number of recorded SDK calls with this exact name.
pub fn call_count(sdk: &MockSdk, name: &str) -> usize {
    sdk.calls().iter().filter(|c| c.as_str() == name).count()
}

/// Whether consecutive 8-bit pixels in a row follow the simulated ramp.
pub fn is_ramp(row: &[u8]) -> bool {
    row.windows(2).all(|w| w[1] == w[0].wrapping_add(1))
}
