//! Measurement types and the delivery seam.
//!
//! A [`Reading`] is what the hardware personality hands back from one
//! register read cycle; the engine turns it into a [`Measurement`] by
//! applying the device's scaling function. Measurements are immutable
//! once produced and flow out through a [`MeasurementSink`], which a
//! collaborator (input device bridge, test recorder, broadcast fan-out)
//! implements.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// An independently enable/disable-able sensing function of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Ambient light sensing.
    Light,
    /// Proximity sensing.
    Proximity,
}

impl Capability {
    /// Stable lowercase name, used in logs and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Light => "light",
            Capability::Proximity => "proximity",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw outcome of one device read cycle.
///
/// `valid == false` models a successfully transferred reading whose
/// valid bit indicates the sample is not usable (e.g. integration not
/// finished). It is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Raw counter value from the data registers.
    pub raw: u32,
    /// Whether the device flagged the sample as usable.
    pub valid: bool,
}

impl Reading {
    /// A usable reading.
    pub fn valid(raw: u32) -> Self {
        Self { raw, valid: true }
    }

    /// A reading the device flagged as not usable.
    pub fn invalid(raw: u32) -> Self {
        Self { raw, valid: false }
    }
}

/// A scaled measurement as delivered to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Raw counter value the scaled value was derived from.
    pub raw: u32,
    /// Scaled value in the device's reporting unit (e.g. milli-lux).
    pub scaled: i64,
    /// Whether this measurement came from a fresh valid reading.
    pub valid: bool,
}

/// Delivery seam for poll results.
///
/// Implementations must be cheap and non-blocking; the poll task calls
/// this inline between register reads.
pub trait MeasurementSink: Send + Sync {
    /// Deliver one measurement for one capability.
    fn deliver(&self, capability: Capability, measurement: Measurement);
}

/// Fan-out sink backed by a tokio broadcast channel. Lagging or absent
/// receivers drop deliveries silently.
impl MeasurementSink for broadcast::Sender<(Capability, Measurement)> {
    fn deliver(&self, capability: Capability, measurement: Measurement) {
        let _ = self.send((capability, measurement));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_names_are_stable() {
        assert_eq!(Capability::Light.to_string(), "light");
        assert_eq!(Capability::Proximity.to_string(), "proximity");
    }

    #[test]
    fn broadcast_sink_delivers() {
        let (tx, mut rx) = broadcast::channel(4);
        let m = Measurement {
            raw: 7,
            scaled: 700,
            valid: true,
        };
        tx.deliver(Capability::Light, m);
        assert_eq!(rx.try_recv().ok(), Some((Capability::Light, m)));
    }

    #[test]
    fn broadcast_sink_ignores_missing_receivers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        // Must not panic or block.
        tx.deliver(
            Capability::Proximity,
            Measurement {
                raw: 0,
                scaled: 0,
                valid: true,
            },
        );
    }
}
