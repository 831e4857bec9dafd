//! Solteam Opto JSA1212 ambient light and proximity sensor driver.
//!
//! Register-file device with two independently switchable
//! capabilities sharing one configuration register and one bus. Each
//! capability gets its own poll task and delivery stream from
//! [`sense_core::engine::SensorEngine`]; both serialize their register
//! traffic through the shared bus transaction mutex, so an enable or
//! disable write can never split the address/data phases of the other
//! capability's in-flight read.

pub mod registers;

use crate::registers::{
    als_count, ALS_RNG_DEFAULT, CONF_ALS_ENABLE, CONF_PXS_ENABLE, CONF_RESERVED_MASK,
    CONF_RESERVED_VALUE, REG_ALS_DT0, REG_ALS_RNG, REG_CONF, REG_PXS_DATA, REG_PXS_HT, REG_PXS_LT,
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
use tracing::{debug, info, warn};

/// Milli-lux scaling for the 12-bit ALS count, using the configured
/// per-count resolution and board compensation. Integer, truncating.
pub fn als_millilux(raw: u32, resolution: u32, compensation_rate: u32) -> i64 {
    i64::from(raw) * i64::from(resolution) * i64::from(compensation_rate) / 1000
}

fn enable_bit(capability: Capability) -> u8 {
    match capability {
        Capability::Light => CONF_ALS_ENABLE,
        Capability::Proximity => CONF_PXS_ENABLE,
    }
}

/// Chip personality plugged into the sensor engine.
pub struct Jsa1212Hardware {
    client: RegisterClient,
    resolution: u32,
    compensation_rate: u32,
}

const CAPABILITIES: [Capability; 2] = [Capability::Light, Capability::Proximity];

#[async_trait]
impl SensorHardware for Jsa1212Hardware {
    fn capabilities(&self) -> &[Capability] {
        &CAPABILITIES
    }

    async fn init(&self) -> Result<(), BusError> {
        // Both paths off, default range. CONF mutation is
        // read-modify-write; init runs before any poll task exists and
        // transitions hold the engine control lock, so the window is
        // never concurrent.
        self.client
            .modify_register(REG_CONF, 0, CONF_ALS_ENABLE | CONF_PXS_ENABLE)
            .await?;
        self.client.write_register(REG_ALS_RNG, ALS_RNG_DEFAULT).await
    }

    async fn activate(&self, capability: Capability) -> Result<(), BusError> {
        self.client
            .modify_register(REG_CONF, enable_bit(capability), 0)
            .await
    }

    async fn deactivate(&self, capability: Capability) -> Result<(), BusError> {
        self.client
            .modify_register(REG_CONF, 0, enable_bit(capability))
            .await
    }

    async fn read(&self, capability: Capability) -> Result<Reading, BusError> {
        match capability {
            Capability::Light => {
                let mut data = [0u8; 2];
                self.client.read_registers(REG_ALS_DT0, &mut data).await?;
                Ok(Reading::valid(als_count(data[0], data[1])))
            }
            Capability::Proximity => {
                let count = self.client.read_register(REG_PXS_DATA).await?;
                Ok(Reading::valid(u32::from(count)))
            }
        }
    }

    fn scale(&self, capability: Capability, raw: u32) -> i64 {
        match capability {
            Capability::Light => als_millilux(raw, self.resolution, self.compensation_rate),
            // Proximity reports raw counts.
            Capability::Proximity => i64::from(raw),
        }
    }

    async fn power_down(&self) -> Result<(), BusError> {
        self.client
            .modify_register(REG_CONF, 0, CONF_ALS_ENABLE | CONF_PXS_ENABLE)
            .await
    }
}

/// A probed JSA1212 instance.
pub struct Jsa1212 {
    engine: SensorEngine<Jsa1212Hardware>,
    board: Arc<dyn BoardSupport>,
}

impl std::fmt::Debug for Jsa1212 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jsa1212").finish_non_exhaustive()
    }
}

impl Jsa1212 {
    /// Attach to the device described by `config`.
    ///
    /// Powers the board slot on, checks the CONF reserved-bit pattern
    /// (the part has no identity register), writes the idle
    /// configuration and enables the boot capability set.
    pub async fn probe(
        bus: SharedBus,
        config: &DeviceConfig,
        sink: Arc<dyn MeasurementSink>,
        board: Arc<dyn BoardSupport>,
    ) -> Result<Self, InitError> {
        board.power_on().await?;
        board.irq_config().await?;
        let client = RegisterClient::new(bus, BusAddress::new(config.bus_address));
        let address = client.address();

        let conf = client.read_register(REG_CONF).await.map_err(|err| {
            InitError::ChipNotDetected(format!("no response from {address}: {err}"))
        })?;
        if conf & CONF_RESERVED_MASK != CONF_RESERVED_VALUE {
            return Err(InitError::ChipNotDetected(format!(
                "unexpected CONF pattern 0x{conf:02x} at {address}"
            )));
        }

        let hardware = Jsa1212Hardware {
            client,
            resolution: config.resolution,
            compensation_rate: config.compensation_rate,
        };
        hardware.init().await?;

        let engine = SensorEngine::new(hardware, sink, config.initial_interval());
        let driver = Self { engine, board };
        for capability in &config.capabilities_enabled_at_boot {
            match driver.engine.set_enabled(*capability, true).await {
                Ok(()) => {}
                Err(DriverError::Bus(err)) => return Err(InitError::Bus(err)),
                Err(err) => {
                    warn!(%capability, error = %err, "boot capability not supported; skipping")
                }
            }
        }
        info!(%address, "jsa1212 attached");
        Ok(driver)
    }

    /// Whether a capability is enabled.
    pub fn is_enabled(&self, capability: Capability) -> SenseResult<bool> {
        self.engine.is_enabled(capability)
    }

    /// Enable or disable one capability.
    pub async fn set_enabled(&self, capability: Capability, enabled: bool) -> SenseResult<()> {
        self.engine.set_enabled(capability, enabled).await
    }

    /// Current poll interval for one capability.
    pub fn interval(&self, capability: Capability) -> SenseResult<Duration> {
        self.engine.interval(capability)
    }

    /// Update a capability's poll interval (clamped into the supported
    /// window).
    pub async fn set_interval(&self, capability: Capability, interval: Duration) -> SenseResult<()> {
        self.engine.set_interval(capability, interval).await
    }

    /// Last known good measurement for one capability.
    pub fn last_measurement(&self, capability: Capability) -> SenseResult<Option<Measurement>> {
        self.engine.last_measurement(capability)
    }

    /// Program the proximity interrupt window. Rejected without bus
    /// traffic when `low > high`.
    pub async fn set_proximity_thresholds(&self, low: u8, high: u8) -> SenseResult<()> {
        if low > high {
            return Err(DriverError::InvalidParameter(format!(
                "threshold window inverted: {low} > {high}"
            )));
        }
        let client = &self.engine.hardware().client;
        client.write_register(REG_PXS_LT, low).await?;
        client.write_register(REG_PXS_HT, high).await?;
        debug!(low, high, "proximity thresholds programmed");
        Ok(())
    }

    /// Hardware-off without forgetting the enabled set.
    pub async fn suspend(&self) -> SenseResult<()> {
        self.engine.suspend().await
    }

    /// Re-initialize the chip and restore the pre-suspend set.
    pub async fn resume(&self) -> SenseResult<()> {
        self.engine.resume().await
    }

    /// Detach: stop all polling, power the chip down, release the
    /// board slot.
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
    fn als_scaling_matches_the_lux_equation() {
        assert_eq!(als_millilux(0, 667, 1000), 0);
        assert_eq!(als_millilux(0x0FFF, 667, 1000), 0x0FFF_i64 * 667);
        // Truncation, not rounding.
        assert_eq!(als_millilux(3, 667, 500), 1000);
    }

    #[test]
    fn capability_bits_do_not_overlap() {
        assert_eq!(enable_bit(Capability::Light) & enable_bit(Capability::Proximity), 0);
    }
}
