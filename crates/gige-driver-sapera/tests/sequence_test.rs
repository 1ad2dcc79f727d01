//! Continuous acquisition tests
//!
//! The sequence worker owns the transfer while it runs; the foreground must
//! refuse anything that would touch the same resources.

mod common;

use common::*;
use gige_core::capabilities::{
    Device, ExposureControl, ImageSource, Parameterized, SequenceAcquisition, SequenceSettings,
};
use gige_core::data::Roi;
use gige_core::error::AdapterError;
use gige_core::property::PropertyValue;
use gige_driver_sapera::{names, StopReason};
use std::time::Duration;

const DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread")]
async fn bounded_sequence_delivers_numbered_frames() {
    let (sdk, mut camera) = initialized_camera().await;

    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::frames(5))
        .await
        .unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap() {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.frame_number, i as u64);
        assert_eq!((frame.width, frame.height), (SENSOR_WIDTH, SENSOR_HEIGHT));
        assert_eq!(frame.bit_depth, 8);
        assert_eq!(frame.data.len(), (SENSOR_WIDTH * SENSOR_HEIGHT) as usize);
    }

    camera.stop_sequence_acquisition().await.unwrap();
    assert!(!camera.is_capturing());
    assert!(!sdk.is_acquiring());
    let summary = camera.last_sequence().unwrap();
    assert_eq!(summary.reason, StopReason::Completed);
    assert!(summary.finished_at >= summary.started_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn snap_while_capturing_is_busy_without_hardware_call() {
    let (sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    assert!(camera.is_capturing());

    let snaps_before = sdk.stats().snaps;
    assert!(matches!(camera.snap_image().await, Err(AdapterError::Busy)));
    assert_eq!(sdk.stats().snaps, snaps_before);

    camera.stop_sequence_acquisition().await.unwrap();
    camera.snap_image().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn geometry_changes_are_refused_while_capturing() {
    let (_sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();

    assert!(matches!(camera.set_binning(2).await, Err(AdapterError::Busy)));
    assert!(matches!(
        camera
            .set_property(names::PIXEL_TYPE, PropertyValue::from("10bit"))
            .await,
        Err(AdapterError::Busy)
    ));
    assert!(matches!(
        camera.set_roi(Roi::new(0, 0, 8, 8)),
        Err(AdapterError::Busy)
    ));
    assert_eq!(camera.binning(), 1);

    camera.stop_sequence_acquisition().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn exposure_can_change_while_capturing() {
    let (_sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();

    camera.set_exposure(2.0).await.unwrap();
    assert_eq!(camera.exposure().await.unwrap(), 2.0);

    camera.stop_sequence_acquisition().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_frames_follow_roi() {
    let (_sdk, mut camera) = initialized_camera().await;
    camera.set_roi(Roi::new(8, 8, 24, 12)).unwrap();

    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::frames(2))
        .await
        .unwrap();
    let frame = tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!((frame.width, frame.height), (24, 12));
    assert_eq!(frame.roi, Roi::new(8, 8, 24, 12));
    assert!(frame.data.chunks_exact(24).all(is_ramp));
    camera.stop_sequence_acquisition().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_start_and_twice_is_ok() {
    let (_sdk, mut camera) = initialized_camera().await;
    camera.stop_sequence_acquisition().await.unwrap();

    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    camera.stop_sequence_acquisition().await.unwrap();
    camera.stop_sequence_acquisition().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_with_undrained_queue_does_not_hang() {
    let (sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(DEADLINE, camera.stop_sequence_acquisition())
        .await
        .expect("stop must not hang")
        .unwrap();
    assert!(!sdk.is_acquiring());
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_receiver_ends_sequence() {
    let (sdk, mut camera) = initialized_camera().await;
    let rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    drop(rx);

    tokio::time::timeout(DEADLINE, async {
        while camera.is_capturing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    camera.stop_sequence_acquisition().await.unwrap();
    assert_eq!(
        camera.last_sequence().unwrap().reason,
        StopReason::HostDisconnected
    );
    assert!(!sdk.is_acquiring());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_running_sequence() {
    let (sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();

    tokio::time::timeout(DEADLINE, camera.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert!(!camera.is_capturing());
    assert_eq!(sdk.live_objects(), (0, 0, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_stream_reports_timeout_and_idles() {
    let (sdk, mut camera) = initialized_camera().await;
    let _rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    sdk.set_stalled(true);

    tokio::time::timeout(DEADLINE, async {
        while camera.is_capturing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let err = camera.stop_sequence_acquisition().await.unwrap_err();
    assert!(matches!(err, AdapterError::Timeout { .. }));
    assert_eq!(camera.last_sequence().unwrap().reason, StopReason::Failed);
    assert!(!sdk.is_acquiring());

    sdk.set_stalled(false);
    assert!(camera.is_initialized());
}

#[tokio::test(flavor = "multi_thread")]
async fn unusable_interval_is_rejected_up_front() {
    let (sdk, mut camera) = initialized_camera().await;
    let grabs_before = sdk.stats().grabs;

    let settings = SequenceSettings {
        num_images: Some(3),
        interval_ms: 1e300,
        ..Default::default()
    };
    let err = camera.start_sequence_acquisition(settings).await.unwrap_err();
    assert!(matches!(err, AdapterError::InvalidPropertyValue { .. }));
    assert!(!camera.is_capturing());
    assert_eq!(sdk.stats().grabs, grabs_before);

    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::frames(1))
        .await
        .unwrap();
    assert!(tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap().is_some());
    camera.stop_sequence_acquisition().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn property_read_is_prompt_while_stream_stalls() {
    let (sdk, mut camera) = initialized_camera().await;
    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::default())
        .await
        .unwrap();
    tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .unwrap()
        .unwrap();
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    sdk.set_stalled(true);
    let started = std::time::Instant::now();
    let temperature = camera.get_property(names::TEMPERATURE).await.unwrap();
    let elapsed = started.elapsed();

    assert!(temperature.as_f64().is_some());
    assert!(
        elapsed < Duration::from_millis(200),
        "read took {elapsed:?} behind the frame wait"
    );

    sdk.set_stalled(false);
    let _ = camera.stop_sequence_acquisition().await;
    drain.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_keeps_summary_of_finished_run() {
    let (_sdk, mut camera) = initialized_camera().await;

    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::frames(2))
        .await
        .unwrap();
    while tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .unwrap()
        .is_some()
    {}

    let mut rx = camera
        .start_sequence_acquisition(SequenceSettings::frames(1))
        .await
        .unwrap();
    let summary = camera.last_sequence().unwrap();
    assert_eq!(summary.reason, StopReason::Completed);
    assert_eq!(summary.frames, 2);

    while tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .unwrap()
        .is_some()
    {}
    camera.stop_sequence_acquisition().await.unwrap();
    assert_eq!(camera.last_sequence().unwrap().frames, 1);
}
