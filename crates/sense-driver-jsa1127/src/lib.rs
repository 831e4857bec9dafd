//! Solteam Opto JSA1127 ambient light sensor driver.
//!
//! Single-capability (ambient light), command-byte device: no register
//! file, one command byte per control write, bare 2-byte data fetches.
//! The polling, enable/disable and suspend/resume machinery comes from
//! [`sense_core::engine::SensorEngine`]; this crate contributes the
//! chip personality and the integer lux scaling.
//!
//! ```no_run
//! use sense_core::{DeviceConfig, NullBoard, SharedBus};
//! use sense_core::measurement::{Capability, Measurement, MeasurementSink};
//! use sense_driver_jsa1127::Jsa1127;
//! use std::sync::Arc;
//!
//! struct PrintSink;
//! impl MeasurementSink for PrintSink {
//!     fn deliver(&self, _: Capability, m: Measurement) {
//!         println!("{} mlux", m.scaled);
//!     }
//! }
//!
//! # async fn attach(bus: SharedBus) -> anyhow::Result<()> {
//! let config = DeviceConfig::default();
//! let sensor = Jsa1127::probe(bus, &config, Arc::new(PrintSink), Arc::new(NullBoard)).await?;
//! sensor.set_enabled(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod commands;

use crate::commands::{
    unpack_data, CMD_ENABLE_CONTINUOUS, CMD_START_INTEGRATION, CMD_STANDBY, CMD_STOP_INTEGRATION,
};
use async_trait::async_trait;
use sense_core::board::BoardSupport;
use sense_core::bus::{BusAddress, RegisterClient, SharedBus};
use sense_core::config::DeviceConfig;
use sense_core::engine::{SensorEngine, SensorHardware};
use sense_core::error::{BusError, DriverError, InitError, SenseResult};
use sense_core::measurement::{Capability, Measurement, MeasurementSink, Reading};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Scaled lux value in milli-lux: counts x resolution (micro-lux per
/// count) x board compensation (permille). Integer arithmetic,
/// truncating division.
pub fn lux_millis(raw: u32, resolution: u32, compensation_rate: u32) -> i64 {
    i64::from(raw) * i64::from(resolution) * i64::from(compensation_rate) / 1000
}

/// Chip personality plugged into the sensor engine.
pub struct Jsa1127Hardware {
    client: RegisterClient,
    resolution: u32,
    compensation_rate: u32,
}

const CAPABILITIES: [Capability; 1] = [Capability::Light];

#[async_trait]
impl SensorHardware for Jsa1127Hardware {
    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn init(&self) -> Result<(), BusError> {
        // Known state: converter idle, integration stopped.
        self.client.send_command(CMD_STOP_INTEGRATION).await?;
        self.client.send_command(CMD_STANDBY).await
    }

    async fn activate(&self, _capability: Capability) -> Result<(), BusError> {
        self.client.send_command(CMD_ENABLE_CONTINUOUS).await?;
        self.client.send_command(CMD_START_INTEGRATION).await
    }

    async fn deactivate(&self, _capability: Capability) -> Result<(), BusError> {
        self.client.send_command(CMD_STOP_INTEGRATION).await?;
        self.client.send_command(CMD_STANDBY).await
    }

    async fn read(&self, _capability: Capability) -> Result<Reading, BusError> {
        let mut frame = [0u8; 2];
        self.client.receive(&mut frame).await?;
        let (raw, valid) = unpack_data(frame);
        Ok(Reading { raw, valid })
    }

    fn scale(&self, _capability: Capability, raw: u32) -> i64 {
        lux_millis(raw, self.resolution, self.compensation_rate)
    }

    async fn power_down(&self) -> Result<(), BusError> {
        self.client.send_command(CMD_STANDBY).await
    }
}

/// A probed JSA1127 instance.
pub struct Jsa1127 {
    engine: SensorEngine<Jsa1127Hardware>,
    board: Arc<dyn BoardSupport>,
}

impl std::fmt::Debug for Jsa1127 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jsa1127").finish_non_exhaustive()
    }
}

impl Jsa1127 {
    /// Attach to the device described by `config`.
    ///
    /// Powers the board slot on, verifies the part answers a data
    /// fetch (the chip has no identity register; a successful transfer
    /// doubles as presence detection), writes the idle state and
    /// enables the boot capability set.
    pub async fn probe(
        bus: SharedBus,
        config: &DeviceConfig,
        sink: Arc<dyn MeasurementSink>,
        board: Arc<dyn BoardSupport>,
    ) -> Result<Self, InitError> {
        board.power_on().await?;
        let client = RegisterClient::new(bus, BusAddress::new(config.bus_address));
        let address = client.address();

        let mut frame = [0u8; 2];
        if let Err(err) = client.receive(&mut frame).await {
            return Err(InitError::ChipNotDetected(format!(
                "no response from {address}: {err}"
            )));
        }

        let hardware = Jsa1127Hardware {
            client,
            resolution: config.resolution,
            compensation_rate: config.compensation_rate,
        };
        hardware.init().await?;

        let engine = SensorEngine::new(hardware, sink, config.initial_interval());
        let driver = Self { engine, board };
        driver.enable_boot_capabilities(config).await?;
        info!(%address, "jsa1127 attached");
        Ok(driver)
    }

    async fn enable_boot_capabilities(&self, config: &DeviceConfig) -> Result<(), InitError> {
        for capability in &config.capabilities_enabled_at_boot {
            match self.engine.set_enabled(*capability, true).await {
                Ok(()) => {}
                Err(DriverError::Bus(err)) => return Err(InitError::Bus(err)),
                Err(err) => {
                    warn!(%capability, error = %err, "boot capability not supported; skipping")
                }
            }
        }
        Ok(())
    }

    /// Whether light sensing is enabled.
    pub fn is_enabled(&self) -> bool {
        self.engine.is_enabled(Capability::Light).unwrap_or(false)
    }

    /// Enable or disable light sensing.
    pub async fn set_enabled(&self, enabled: bool) -> SenseResult<()> {
        self.engine.set_enabled(Capability::Light, enabled).await
    }

    /// Current poll interval.
    pub fn interval(&self) -> SenseResult<Duration> {
        self.engine.interval(Capability::Light)
    }

    /// Update the poll interval (clamped into the supported window).
    pub async fn set_interval(&self, interval: Duration) -> SenseResult<()> {
        self.engine.set_interval(Capability::Light, interval).await
    }

    /// Last known good measurement, if any.
    pub fn last_measurement(&self) -> Option<Measurement> {
        self.engine
            .last_measurement(Capability::Light)
            .unwrap_or(None)
    }

    /// Hardware-off without forgetting the enabled state.
    pub async fn suspend(&self) -> SenseResult<()> {
        self.engine.suspend().await
    }

    /// Re-initialize the chip and restore the pre-suspend state.
    pub async fn resume(&self) -> SenseResult<()> {
        self.engine.resume().await
    }

    /// Detach: stop polling, power the chip down, release the board
    /// slot.
    pub async fn shutdown(&self) -> SenseResult<()> {
        self.engine.shutdown().await?;
        if let Err(err) = self.board.power_off().await {
            warn!(error = %err, "board power-off failed during shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lux_is_integer_and_truncating() {
        assert_eq!(lux_millis(0, 667, 1000), 0);
        assert_eq!(lux_millis(0, 1, 999_999), 0);
        // 3 * 667 * 500 / 1000 = 1000.5, truncated.
        assert_eq!(lux_millis(3, 667, 500), 1000);
        assert_eq!(lux_millis(1000, 667, 1000), 667_000);
    }

    #[test]
    fn lux_handles_full_scale_counts() {
        assert_eq!(
            lux_millis(0x7FFF, 667, 1250),
            (0x7FFF_i64 * 667 * 1250) / 1000
        );
    }
}
