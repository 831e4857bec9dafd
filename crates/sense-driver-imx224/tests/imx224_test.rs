//! End-to-end tests for the IMX224 driver over the scripted mock bus.

use sense_core::board::NullBoard;
use sense_core::bus::SharedBus;
use sense_core::error::{DriverError, InitError};
use sense_core::mock::{MockBus, MockBusHandle};
use sense_driver_imx224::registers::{
    CHIP_ID, REG_GAIN_LO, REG_ID, REG_REGHOLD, REG_SHS1_LO, REG_STANDBY, REG_VMAX_LO, REG_XMSTA,
    STANDBY_OFF, STANDBY_ON, XMSTA_START, XMSTA_STOP,
};
use sense_driver_imx224::{CameraConfig, Imx224};
use std::sync::Arc;

fn camera_bus() -> (SharedBus, MockBusHandle) {
    let bus = MockBus::wide();
    let handle = bus.handle();
    handle.set_register(REG_ID, CHIP_ID);
    (SharedBus::new(bus), handle)
}

async fn probed_camera() -> (Imx224, MockBusHandle) {
    let (bus, handle) = camera_bus();
    let camera = Imx224::probe(bus, &CameraConfig::default(), Arc::new(NullBoard))
        .await
        .unwrap();
    (camera, handle)
}

#[tokio::test]
async fn probe_matches_the_identity_register() {
    // Happy path covered by probed_camera(); here the id is wrong.
    let bus = MockBus::wide();
    let handle = bus.handle();
    handle.set_register(REG_ID, 0x99);
    let err = Imx224::probe(
        SharedBus::new(bus),
        &CameraConfig::default(),
        Arc::new(NullBoard),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, InitError::ChipNotDetected(_)));
}

#[tokio::test]
async fn probe_applies_the_configured_initial_mode() {
    let (bus, _handle) = camera_bus();
    let config = CameraConfig {
        initial_mode: Some([1280, 720]),
        ..CameraConfig::default()
    };
    let camera = Imx224::probe(bus, &config, Arc::new(NullBoard)).await.unwrap();
    let mode = camera.current_mode().unwrap();
    assert_eq!((mode.width, mode.height), (1280, 720));
}

#[tokio::test]
async fn negotiation_round_trips_through_current_mode() {
    let (camera, _handle) = probed_camera().await;

    let mode = camera.negotiate_mode(1000, 600).await.unwrap();
    assert!(mode.width >= 1000 && mode.height >= 600);
    assert_eq!(camera.current_mode().unwrap(), mode);

    // Nothing covers 2000x2000; the largest mode is the fallback.
    let fallback = camera.negotiate_mode(2000, 2000).await.unwrap();
    assert_eq!((fallback.width, fallback.height), (1280, 960));
}

#[tokio::test]
async fn renegotiating_the_same_mode_reuploads_every_register() {
    let (camera, handle) = probed_camera().await;

    handle.clear_log();
    camera.negotiate_mode(1280, 960).await.unwrap();
    let first_upload = handle.register_writes().len();
    assert!(first_upload > 0);

    camera.negotiate_mode(1280, 960).await.unwrap();
    assert_eq!(
        handle.register_writes().len(),
        first_upload * 2,
        "identical renegotiation must not dedup the upload"
    );
}

#[tokio::test]
async fn exposure_requires_a_negotiated_mode() {
    let (camera, handle) = probed_camera().await;
    handle.clear_log();

    let err = camera.set_exposure_gain(160, 32).await.unwrap_err();
    assert!(matches!(err, DriverError::InvalidParameter(_)));
    assert!(handle.register_writes().is_empty(), "no side effects on rejection");
}

#[tokio::test]
async fn frame_length_commits_before_shutter_and_gain() {
    let (camera, handle) = probed_camera().await;
    camera.negotiate_mode(1280, 960).await.unwrap();

    handle.clear_log();
    camera.set_exposure_gain(160, 32).await.unwrap();

    // shutter = 1100 - (160 >> 4) - 1 = 1089 = 0x441, frame stays 1100.
    let expected = vec![
        (REG_REGHOLD, 0x01),
        (REG_VMAX_LO, 0x4C),
        (REG_VMAX_LO + 1, 0x04),
        (REG_VMAX_LO + 2, 0x00),
        (REG_SHS1_LO, 0x41),
        (REG_SHS1_LO + 1, 0x04),
        (REG_SHS1_LO + 2, 0x00),
        (REG_GAIN_LO, 60),
        (REG_GAIN_LO + 1, 0),
        (REG_REGHOLD, 0x00),
    ];
    assert_eq!(handle.register_writes(), expected);
}

#[tokio::test]
async fn long_shutter_stretches_the_committed_frame() {
    let (camera, handle) = probed_camera().await;
    camera.negotiate_mode(1280, 960).await.unwrap();

    handle.clear_log();
    // exposure 0 -> shutter 1099 > 1100 - 4, so the frame stretches to
    // 1103 = 0x44F.
    camera.set_exposure_gain(0, 16).await.unwrap();
    let writes = handle.register_writes();
    assert_eq!(writes[1], (REG_VMAX_LO, 0x4F));
    assert_eq!(writes[2], (REG_VMAX_LO + 1, 0x04));
    assert_eq!(writes[4], (REG_SHS1_LO, 0x4B));
    assert_eq!(writes[5], (REG_SHS1_LO + 1, 0x04));
}

#[tokio::test]
async fn streaming_requires_a_mode_and_successful_writes() {
    let (camera, handle) = probed_camera().await;

    let err = camera.set_streaming(true).await.unwrap_err();
    assert!(matches!(err, DriverError::InvalidParameter(_)));

    camera.negotiate_mode(640, 480).await.unwrap();
    handle.set_fail_all_sends(true);
    camera.set_streaming(true).await.unwrap_err();
    assert!(!camera.is_streaming(), "failed start must leave streaming off");

    handle.set_fail_all_sends(false);
    camera.set_streaming(true).await.unwrap();
    assert!(camera.is_streaming());
    assert_eq!(handle.register(REG_STANDBY), STANDBY_OFF);
    assert_eq!(handle.register(REG_XMSTA), XMSTA_START);
}

#[tokio::test]
async fn stream_stop_is_best_effort() {
    let (camera, handle) = probed_camera().await;
    camera.negotiate_mode(640, 480).await.unwrap();
    camera.set_streaming(true).await.unwrap();

    handle.set_fail_all_sends(true);
    camera.set_streaming(false).await.unwrap();
    assert!(!camera.is_streaming());
}

#[tokio::test]
async fn resume_reinitializes_and_restores_streaming() {
    let (camera, handle) = probed_camera().await;
    camera.negotiate_mode(1280, 720).await.unwrap();
    camera.set_streaming(true).await.unwrap();

    camera.suspend().await.unwrap();
    assert!(camera.is_suspended());
    assert_eq!(handle.register(REG_XMSTA), XMSTA_STOP);
    assert_eq!(handle.register(REG_STANDBY), STANDBY_ON);
    assert!(camera.is_streaming(), "logical streaming state survives suspend");

    handle.clear_log();
    camera.resume().await.unwrap();
    assert!(!camera.is_suspended());
    assert!(camera.is_streaming());
    assert_eq!(handle.register(REG_STANDBY), STANDBY_OFF);
    assert_eq!(handle.register(REG_XMSTA), XMSTA_START);

    // Full re-init plus mode re-upload happened on the wire.
    let writes = handle.register_writes();
    assert!(writes.iter().any(|(reg, _)| *reg == 0x3005), "init sequence re-uploaded");
    let vmax_writes = writes.iter().filter(|(reg, _)| *reg == REG_VMAX_LO).count();
    assert!(vmax_writes >= 1, "mode sequence re-uploaded");
}

#[tokio::test]
async fn control_calls_are_rejected_while_suspended() {
    let (camera, _handle) = probed_camera().await;
    camera.negotiate_mode(640, 480).await.unwrap();
    camera.suspend().await.unwrap();

    assert!(matches!(
        camera.negotiate_mode(640, 480).await,
        Err(DriverError::InvalidParameter(_))
    ));
    assert!(matches!(
        camera.set_exposure_gain(0, 16).await,
        Err(DriverError::InvalidParameter(_))
    ));
    assert!(matches!(
        camera.set_streaming(true).await,
        Err(DriverError::InvalidParameter(_))
    ));
}
