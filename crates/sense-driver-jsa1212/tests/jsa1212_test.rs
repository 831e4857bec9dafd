//! End-to-end tests for the JSA1212 driver over the scripted mock bus.

use parking_lot::Mutex;
use sense_core::board::NullBoard;
use sense_core::bus::SharedBus;
use sense_core::config::DeviceConfig;
use sense_core::engine::MAX_POLL_INTERVAL;
use sense_core::error::{DriverError, InitError};
use sense_core::measurement::{Capability, Measurement, MeasurementSink};
use sense_core::mock::{BusEvent, MockBus, MockBusHandle};
use sense_driver_jsa1212::registers::{
    CONF_ALS_ENABLE, CONF_PXS_ENABLE, REG_ALS_DT0, REG_ALS_DT1, REG_CONF, REG_PXS_DATA,
    REG_PXS_HT, REG_PXS_LT,
};
use sense_driver_jsa1212::{als_millilux, Jsa1212};
use std::sync::Arc;
use std::time::Duration;

const CONF_IDLE: u8 = 0x58;

#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(Capability, Measurement)>>,
}

impl RecordingSink {
    fn count_for(&self, capability: Capability) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|(c, _)| *c == capability)
            .count()
    }

    fn last_for(&self, capability: Capability) -> Option<Measurement> {
        self.deliveries
            .lock()
            .iter()
            .rev()
            .find(|(c, _)| *c == capability)
            .map(|(_, m)| *m)
    }
}

impl MeasurementSink for RecordingSink {
    fn deliver(&self, capability: Capability, measurement: Measurement) {
        self.deliveries.lock().push((capability, measurement));
    }
}

fn test_setup() -> (SharedBus, MockBusHandle, Arc<RecordingSink>) {
    let bus = MockBus::new();
    let handle = bus.handle();
    handle.set_register(u16::from(REG_CONF), CONF_IDLE);
    let sink = Arc::new(RecordingSink::default());
    (SharedBus::new(bus), handle, sink)
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached under the paused clock");
}

#[tokio::test(start_paused = true)]
async fn probe_rejects_an_unexpected_conf_pattern() {
    let bus = MockBus::new();
    let handle = bus.handle();
    handle.set_register(u16::from(REG_CONF), 0x00);
    let err = Jsa1212::probe(
        SharedBus::new(bus),
        &DeviceConfig::default(),
        Arc::new(RecordingSink::default()),
        Arc::new(NullBoard),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, InitError::ChipNotDetected(_)));
}

#[tokio::test(start_paused = true)]
async fn enable_sets_and_disable_clears_the_capability_bit() {
    let (bus, handle, sink) = test_setup();
    let sensor = Jsa1212::probe(bus, &DeviceConfig::default(), sink, Arc::new(NullBoard))
        .await
        .unwrap();

    sensor.set_enabled(Capability::Light, true).await.unwrap();
    assert_ne!(handle.register(u16::from(REG_CONF)) & CONF_ALS_ENABLE, 0);
    // Reserved bits must survive the read-modify-write.
    assert_eq!(handle.register(u16::from(REG_CONF)) & 0xF0, 0x50);

    sensor.set_enabled(Capability::Light, false).await.unwrap();
    assert_eq!(handle.register(u16::from(REG_CONF)) & CONF_ALS_ENABLE, 0);
}

#[tokio::test(start_paused = true)]
async fn light_and_proximity_deliver_their_own_streams() {
    let (bus, handle, sink) = test_setup();
    handle.set_register(u16::from(REG_ALS_DT0), 0x34);
    handle.set_register(u16::from(REG_ALS_DT1), 0x12);
    handle.set_register(u16::from(REG_PXS_DATA), 0x42);

    let config = DeviceConfig::default();
    let sensor = Jsa1212::probe(bus, &config, sink.clone(), Arc::new(NullBoard))
        .await
        .unwrap();
    sensor.set_enabled(Capability::Light, true).await.unwrap();
    sensor.set_enabled(Capability::Proximity, true).await.unwrap();

    wait_until(|| {
        sink.count_for(Capability::Light) >= 2 && sink.count_for(Capability::Proximity) >= 2
    })
    .await;

    let light = sink.last_for(Capability::Light).unwrap();
    assert_eq!(light.raw, 0x0234);
    assert_eq!(
        light.scaled,
        als_millilux(0x0234, config.resolution, config.compensation_rate)
    );

    let proximity = sink.last_for(Capability::Proximity).unwrap();
    assert_eq!(proximity.raw, 0x42);
    assert_eq!(proximity.scaled, 0x42);
}

#[tokio::test(start_paused = true)]
async fn threshold_window_is_validated_before_any_bus_traffic() {
    let (bus, handle, sink) = test_setup();
    let sensor = Jsa1212::probe(bus, &DeviceConfig::default(), sink, Arc::new(NullBoard))
        .await
        .unwrap();
    handle.clear_log();

    let err = sensor.set_proximity_thresholds(0x80, 0x10).await.unwrap_err();
    assert!(matches!(err, DriverError::InvalidParameter(_)));
    assert!(handle.register_writes().is_empty(), "no side effects on rejection");

    sensor.set_proximity_thresholds(0x10, 0x80).await.unwrap();
    assert_eq!(handle.register(u16::from(REG_PXS_LT)), 0x10);
    assert_eq!(handle.register(u16::from(REG_PXS_HT)), 0x80);
}

#[tokio::test(start_paused = true)]
async fn suspend_stops_both_streams_and_resume_restores_them() {
    let (bus, handle, sink) = test_setup();
    handle.set_register(u16::from(REG_ALS_DT0), 0x10);

    let sensor = Jsa1212::probe(bus, &DeviceConfig::default(), sink.clone(), Arc::new(NullBoard))
        .await
        .unwrap();
    sensor.set_enabled(Capability::Light, true).await.unwrap();
    wait_until(|| sink.count_for(Capability::Light) >= 1).await;

    sensor.suspend().await.unwrap();
    assert_eq!(handle.register(u16::from(REG_CONF)) & CONF_ALS_ENABLE, 0);
    assert!(sensor.is_enabled(Capability::Light).unwrap());

    let frozen = sink.count_for(Capability::Light);
    tokio::time::sleep(MAX_POLL_INTERVAL * 5).await;
    assert_eq!(sink.count_for(Capability::Light), frozen);

    sensor.resume().await.unwrap();
    assert_ne!(handle.register(u16::from(REG_CONF)) & CONF_ALS_ENABLE, 0);
    wait_until(|| sink.count_for(Capability::Light) > frozen).await;
}

/// A disable issued while the other capability's poll tick is in
/// flight must never land its configuration write between the tick's
/// address phase and data phase.
#[tokio::test(start_paused = true)]
async fn control_writes_never_split_a_read_transaction() {
    let (bus, handle, sink) = test_setup();
    handle.set_register(u16::from(REG_ALS_DT0), 0x34);

    let sensor = Jsa1212::probe(bus, &DeviceConfig::default(), sink.clone(), Arc::new(NullBoard))
        .await
        .unwrap();
    sensor.set_enabled(Capability::Light, true).await.unwrap();

    for _ in 0..10 {
        sensor.set_enabled(Capability::Proximity, true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        sensor.set_enabled(Capability::Proximity, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
    }
    sensor.set_enabled(Capability::Light, false).await.unwrap();

    // A 1-byte send is always the address phase of a read; its data
    // phase must be the very next transfer on the wire.
    let events = handle.events();
    for (position, event) in events.iter().enumerate() {
        if let BusEvent::Send { bytes } = event {
            if bytes.len() == 1 {
                match events.get(position + 1) {
                    Some(BusEvent::Recv { .. }) | None => {}
                    other => panic!(
                        "transfer interleaved into a read transaction at {position}: {other:?}"
                    ),
                }
            }
        }
    }
}
