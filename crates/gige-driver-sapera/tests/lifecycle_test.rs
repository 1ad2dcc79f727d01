//! Resource lifecycle tests
//!
//! Initialization order, unwind on partial failure, idempotent shutdown and
//! recovery after a failed reconfiguration.

mod common;

use common::*;
use gige_core::capabilities::{Device, ExposureControl, ImageSource, Parameterized};
use gige_core::error::AdapterError;
use gige_core::property::PropertyValue;
use gige_driver_sapera::components::features::PIXEL_FORMAT;
use gige_driver_sapera::components::mock::{MockFault, MockSdk};
use gige_driver_sapera::components::sdk::FeatureValue;
use gige_driver_sapera::{names, SaperaConfig, SaperaGigE};
use std::sync::Arc;
use tracing_test::traced_test;

#[tokio::test]
async fn initialize_creates_device_buffer_transfer_in_order() {
    let (sdk, mut camera) = camera();
    camera.initialize().await.unwrap();

    let creates: Vec<String> = sdk
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create_"))
        .collect();
    assert_eq!(creates, vec!["create_device", "create_buffer", "create_transfer"]);
    assert_eq!(sdk.live_objects(), (1, 1, 1));

    let buffer = sdk.live_buffers()[0];
    assert_eq!(buffer.count, 2);
    assert!(buffer.with_trash);
}

#[tokio::test]
async fn initialize_twice_is_a_no_op() {
    let (sdk, mut camera) = initialized_camera().await;
    camera.initialize().await.unwrap();
    assert_eq!(sdk.stats().devices_created, 1);
}

#[tokio::test]
async fn buffer_failure_unwinds_and_retry_succeeds() {
    let (sdk, mut camera) = camera();

    sdk.inject(MockFault::CreateBuffer);
    let err = camera.initialize().await.unwrap_err();
    assert!(matches!(err, AdapterError::Creation { object: "buffer", .. }));
    assert!(!camera.is_initialized());
    assert_eq!(sdk.live_objects(), (0, 0, 0));
    assert_eq!(call_count(&sdk, "destroy_device"), 1);

    camera.initialize().await.unwrap();
    assert!(camera.is_initialized());
    assert_eq!(sdk.live_objects(), (1, 1, 1));

    camera.shutdown().await.unwrap();
    assert_eq!(sdk.live_objects(), (0, 0, 0));
}

#[tokio::test]
async fn transfer_failure_unwinds_everything() {
    let (sdk, mut camera) = camera();

    sdk.inject(MockFault::CreateTransfer);
    let err = camera.initialize().await.unwrap_err();
    assert!(matches!(err, AdapterError::Creation { object: "transfer", .. }));
    assert_eq!(sdk.live_objects(), (0, 0, 0));
}

#[tokio::test]
async fn no_camera_is_a_discovery_error() {
    let sdk = Arc::new(MockSdk::without_cameras());
    let mut camera = SaperaGigE::new(sdk.clone(), test_config());

    let err = camera.initialize().await.unwrap_err();
    assert!(matches!(err, AdapterError::Discovery(_)));
    assert_eq!(sdk.stats().devices_created, 0);
}

#[tokio::test]
async fn shutdown_twice_tears_down_once() {
    let (sdk, mut camera) = initialized_camera().await;

    camera.shutdown().await.unwrap();
    camera.shutdown().await.unwrap();

    assert!(!camera.is_initialized());
    assert_eq!(call_count(&sdk, "destroy_transfer"), 1);
    assert_eq!(call_count(&sdk, "destroy_buffer"), 1);
    assert_eq!(call_count(&sdk, "destroy_device"), 1);
    assert_eq!(sdk.live_objects(), (0, 0, 0));
}

#[tokio::test]
async fn shutdown_releases_in_reverse_order() {
    let (sdk, mut camera) = initialized_camera().await;
    sdk.clear_calls();

    camera.shutdown().await.unwrap();
    let destroys: Vec<String> = sdk
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("destroy_"))
        .collect();
    assert_eq!(
        destroys,
        vec!["destroy_transfer", "destroy_buffer", "destroy_device"]
    );
}

#[tokio::test]
async fn dropping_initialized_camera_releases_hardware() {
    let (sdk, camera) = initialized_camera().await;
    drop(camera);
    assert_eq!(sdk.live_objects(), (0, 0, 0));
}

#[tokio::test]
async fn snap_timeout_is_an_error_not_a_hang() {
    let (sdk, mut camera) = camera_with(SaperaConfig {
        snap_timeout_ms: 50,
        ..test_config()
    });
    camera.initialize().await.unwrap();

    sdk.set_stalled(true);
    let err = camera.snap_image().await.unwrap_err();
    assert!(matches!(err, AdapterError::Timeout { operation: "snap", .. }));
    assert!(!sdk.is_acquiring());

    sdk.set_stalled(false);
    camera.snap_image().await.unwrap();
}

#[tokio::test]
async fn rejected_pixel_format_keeps_resources() {
    let (sdk, mut camera) = initialized_camera().await;

    sdk.inject(MockFault::RejectFeature(PIXEL_FORMAT.to_string()));
    let err = camera
        .set_property(names::PIXEL_TYPE, PropertyValue::from("10bit"))
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::InvalidPropertyValue { .. }));
    assert!(camera.is_initialized());
    assert_eq!(
        camera.get_property(names::PIXEL_TYPE).await.unwrap(),
        PropertyValue::from("8bit")
    );
    assert_eq!(camera.image_bytes_per_pixel(), 1);
    assert_eq!(sdk.live_objects(), (1, 1, 1));
    camera.snap_image().await.unwrap();
}

#[tokio::test]
async fn failed_rebuild_releases_and_allows_reinitialize() {
    let (sdk, mut camera) = initialized_camera().await;

    sdk.inject(MockFault::CreateBuffer);
    let err = camera.set_binning(2).await.unwrap_err();
    assert!(matches!(err, AdapterError::Reformat(_)));
    assert!(!camera.is_initialized());
    assert_eq!(sdk.live_objects(), (0, 0, 0));
    assert!(matches!(
        camera.snap_image().await,
        Err(AdapterError::NotInitialized)
    ));

    camera.initialize().await.unwrap();
    assert_eq!(camera.binning(), 1);
    camera.snap_image().await.unwrap();
}

#[tokio::test]
async fn unsupported_device_format_is_forced_to_mono8() {
    let (sdk, mut camera) = camera();
    sdk.override_feature(PIXEL_FORMAT, FeatureValue::String("BayerRG8".into()));

    camera.initialize().await.unwrap();
    assert_eq!(sdk.feature(PIXEL_FORMAT), Some(FeatureValue::String("Mono8".into())));
    assert_eq!(camera.bit_depth(), 8);
}

#[tokio::test]
async fn device_in_ten_bit_mode_initializes_ten_bit() {
    let (sdk, mut camera) = camera();
    sdk.override_feature(PIXEL_FORMAT, FeatureValue::String("Mono10".into()));

    camera.initialize().await.unwrap();
    assert_eq!(camera.image_bytes_per_pixel(), 2);
    assert_eq!(sdk.live_buffers()[0].format.bytes_per_pixel(), 2);
}

#[tokio::test]
async fn unknown_configured_server_falls_back_to_first() {
    let (_sdk, mut camera) = camera_with(SaperaConfig {
        server: Some("Missing_1".into()),
        ..test_config()
    });

    camera.initialize().await.unwrap();
    assert_eq!(
        camera.get_property(names::CAMERA_SERVER).await.unwrap(),
        PropertyValue::from("Nano-M1280_1")
    );
}

#[tokio::test]
#[traced_test]
async fn dropping_without_shutdown_warns() {
    let (_sdk, camera) = initialized_camera().await;
    drop(camera);
    assert!(logs_contain("dropped while initialized"));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_hardware() {
    let (sdk, mut camera) = camera_with(SaperaConfig {
        buffer_count: 0,
        ..test_config()
    });

    let err = camera.initialize().await.unwrap_err();
    assert!(matches!(err, AdapterError::Configuration(_)));
    assert!(sdk.calls().is_empty());
}
