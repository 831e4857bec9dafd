//! Device configuration.
//!
//! Configuration is loaded from a TOML file layered with
//! `SUNXI_SENSE_`-prefixed environment variables, so a board bring-up
//! can override single fields without editing the file:
//!
//! ```text
//! SUNXI_SENSE_INITIAL_INTERVAL_MS=250
//! SUNXI_SENSE_BUS_ADDRESS=68
//! ```
//!
//! All fields have defaults; an empty file is a valid configuration.

use crate::engine::clamp_poll_interval;
use crate::measurement::Capability;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix recognized by [`DeviceConfig::load`].
pub const ENV_PREFIX: &str = "SUNXI_SENSE_";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment parsing failed.
    #[error("configuration load error: {0}")]
    Load(#[from] figment::Error),

    /// Values parsed but are semantically invalid.
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Board-description input for one sensor device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 7-bit device address on the bus.
    #[serde(default = "default_bus_address")]
    pub bus_address: u16,

    /// Poll interval at boot, in milliseconds. Clamped into the
    /// supported window when applied.
    #[serde(default = "default_interval_ms")]
    pub initial_interval_ms: u64,

    /// Capabilities enabled immediately after probe.
    #[serde(default)]
    pub capabilities_enabled_at_boot: Vec<Capability>,

    /// Sensor resolution term of the lux equation, in micro-lux per
    /// count.
    #[serde(default = "default_resolution")]
    pub resolution: u32,

    /// Board-specific optical compensation, in permille.
    #[serde(default = "default_compensation_rate")]
    pub compensation_rate: u32,
}

fn default_bus_address() -> u16 {
    0x39
}

fn default_interval_ms() -> u64 {
    200
}

fn default_resolution() -> u32 {
    667
}

fn default_compensation_rate() -> u32 {
    1000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bus_address: default_bus_address(),
            initial_interval_ms: default_interval_ms(),
            capabilities_enabled_at_boot: Vec::new(),
            resolution: default_resolution(),
            compensation_rate: default_compensation_rate(),
        }
    }
}

impl DeviceConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: DeviceConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_address > 0x7F {
            return Err(ConfigError::Validation(format!(
                "bus_address 0x{:x} does not fit a 7-bit address",
                self.bus_address
            )));
        }
        if self.initial_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "initial_interval_ms must be non-zero".into(),
            ));
        }
        if self.resolution == 0 || self.compensation_rate == 0 {
            return Err(ConfigError::Validation(
                "resolution and compensation_rate must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The boot poll interval, already clamped into the supported
    /// window.
    pub fn initial_interval(&self) -> Duration {
        clamp_poll_interval(Duration::from_millis(self.initial_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MAX_POLL_INTERVAL, MIN_POLL_INTERVAL};
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = DeviceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bus_address, 0x39);
        assert!(config.capabilities_enabled_at_boot.is_empty());
    }

    #[test]
    fn initial_interval_is_clamped() {
        let mut config = DeviceConfig {
            initial_interval_ms: 5,
            ..DeviceConfig::default()
        };
        assert_eq!(config.initial_interval(), MIN_POLL_INTERVAL);
        config.initial_interval_ms = 10_000;
        assert_eq!(config.initial_interval(), MAX_POLL_INTERVAL);
    }

    #[test]
    fn eight_bit_address_is_rejected() {
        let config = DeviceConfig {
            bus_address: 0x80,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bus_address = 0x44\ninitial_interval_ms = 250\ncapabilities_enabled_at_boot = [\"light\", \"proximity\"]"
        )
        .unwrap();
        let config = DeviceConfig::load(file.path()).unwrap();
        assert_eq!(config.bus_address, 0x44);
        assert_eq!(config.initial_interval_ms, 250);
        assert_eq!(
            config.capabilities_enabled_at_boot,
            vec![Capability::Light, Capability::Proximity]
        );
        // Unspecified fields fall back to defaults.
        assert_eq!(config.resolution, 667);
    }
}
