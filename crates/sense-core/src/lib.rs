//! Core building blocks for polled register-bus sensor drivers.
//!
//! This crate captures the pattern shared by the board's sensor
//! devices: retry-bounded transactional register I/O over an
//! unreliable bus, a per-capability power/enable state machine, and a
//! cancellable periodic poll scheduler with last-known-good fallback.
//! Driver crates supply a [`SensorHardware`](engine::SensorHardware)
//! personality (register addresses, activation writes, scaling) and
//! get the state machine, the polling and the suspend/resume
//! bookkeeping from here.
//!
//! Nothing in this crate is a process-wide singleton; every device is
//! an explicitly constructed instance, and several instances can share
//! one physical bus through [`SharedBus`](bus::SharedBus).

pub mod board;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod measurement;
#[cfg(feature = "mock")]
pub mod mock;
pub mod poll;

pub use board::{BoardSupport, NullBoard};
pub use bus::{BusAddress, RawBus, RegisterClient, SharedBus, MAX_XFER_ATTEMPTS};
pub use config::{ConfigError, DeviceConfig};
pub use engine::{
    clamp_poll_interval, SensorEngine, SensorHardware, MAX_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
pub use error::{BoardError, BusError, DriverError, InitError, SenseResult};
pub use measurement::{Capability, Measurement, MeasurementSink, Reading};
