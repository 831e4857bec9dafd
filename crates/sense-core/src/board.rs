//! Board support interface.
//!
//! Power rails, reset lines and interrupt pins are board-specific
//! glue, not driver logic. Drivers depend on the [`BoardSupport`]
//! trait; concrete boards are described as data ([`StaticBoard`])
//! driving a platform-supplied [`PinActuator`], so adding a board
//! variant means adding descriptors, not compiling a branch.

use crate::error::BoardError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Power sequencing and pin configuration for one device's slot on a
/// board.
#[async_trait]
pub trait BoardSupport: Send + Sync {
    /// Bring the device's supply rails up, in order.
    async fn power_on(&self) -> Result<(), BoardError>;

    /// Take the rails down, in reverse order.
    async fn power_off(&self) -> Result<(), BoardError>;

    /// Pulse the device's reset line.
    async fn reset(&self) -> Result<(), BoardError>;

    /// Configure the device's interrupt input.
    async fn irq_config(&self) -> Result<(), BoardError>;
}

/// Platform seam that actually drives GPIO lines.
#[async_trait]
pub trait PinActuator: Send + Sync {
    /// Drive a line to the given level.
    async fn set_line(&self, line: u32, high: bool) -> Result<(), BoardError>;

    /// Configure a line as an edge-triggered input.
    async fn configure_input(&self, line: u32, rising_edge: bool) -> Result<(), BoardError>;
}

/// One supply rail: the GPIO that enables it and how long it needs to
/// settle.
#[derive(Debug, Clone)]
pub struct RailDescriptor {
    /// Rail name for logs (e.g. "vdd-1v8").
    pub name: String,
    /// GPIO line enabling the rail.
    pub enable_line: u32,
    /// Settle time after enabling.
    pub settle: Duration,
}

/// Reset line polarity and pulse width.
#[derive(Debug, Clone)]
pub struct ResetDescriptor {
    /// GPIO line wired to the device reset pin.
    pub line: u32,
    /// Whether the pin resets the device when driven low.
    pub active_low: bool,
    /// Assertion pulse width.
    pub pulse: Duration,
}

/// Interrupt input descriptor.
#[derive(Debug, Clone)]
pub struct IrqDescriptor {
    /// GPIO line carrying the interrupt.
    pub line: u32,
    /// Trigger on the rising edge (falling otherwise).
    pub rising_edge: bool,
}

/// Board variant described entirely as data.
pub struct StaticBoard {
    name: String,
    rails: Vec<RailDescriptor>,
    reset: Option<ResetDescriptor>,
    irq: Option<IrqDescriptor>,
    pins: Arc<dyn PinActuator>,
}

impl StaticBoard {
    /// Start describing a board slot.
    pub fn new(name: impl Into<String>, pins: Arc<dyn PinActuator>) -> Self {
        Self {
            name: name.into(),
            rails: Vec::new(),
            reset: None,
            irq: None,
            pins,
        }
    }

    /// Append a supply rail (rails power on in insertion order).
    pub fn with_rail(mut self, rail: RailDescriptor) -> Self {
        self.rails.push(rail);
        self
    }

    /// Attach a reset line.
    pub fn with_reset(mut self, reset: ResetDescriptor) -> Self {
        self.reset = Some(reset);
        self
    }

    /// Attach an interrupt input.
    pub fn with_irq(mut self, irq: IrqDescriptor) -> Self {
        self.irq = Some(irq);
        self
    }
}

#[async_trait]
impl BoardSupport for StaticBoard {
    async fn power_on(&self) -> Result<(), BoardError> {
        for rail in &self.rails {
            self.pins.set_line(rail.enable_line, true).await?;
            tokio::time::sleep(rail.settle).await;
            debug!(board = %self.name, rail = %rail.name, "rail enabled");
        }
        info!(board = %self.name, "board power on");
        Ok(())
    }

    async fn power_off(&self) -> Result<(), BoardError> {
        for rail in self.rails.iter().rev() {
            self.pins.set_line(rail.enable_line, false).await?;
            debug!(board = %self.name, rail = %rail.name, "rail disabled");
        }
        info!(board = %self.name, "board power off");
        Ok(())
    }

    async fn reset(&self) -> Result<(), BoardError> {
        if let Some(reset) = &self.reset {
            let asserted = !reset.active_low;
            self.pins.set_line(reset.line, asserted).await?;
            tokio::time::sleep(reset.pulse).await;
            self.pins.set_line(reset.line, !asserted).await?;
            debug!(board = %self.name, line = reset.line, "reset pulsed");
        }
        Ok(())
    }

    async fn irq_config(&self) -> Result<(), BoardError> {
        if let Some(irq) = &self.irq {
            self.pins.configure_input(irq.line, irq.rising_edge).await?;
            debug!(board = %self.name, line = irq.line, "irq configured");
        }
        Ok(())
    }
}

/// Board whose rails are permanently on; used in tests and on carrier
/// boards without switchable supplies.
pub struct NullBoard;

#[async_trait]
impl BoardSupport for NullBoard {
    async fn power_on(&self) -> Result<(), BoardError> {
        Ok(())
    }

    async fn power_off(&self) -> Result<(), BoardError> {
        Ok(())
    }

    async fn reset(&self) -> Result<(), BoardError> {
        Ok(())
    }

    async fn irq_config(&self) -> Result<(), BoardError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingActuator {
        log: Mutex<Vec<(u32, bool)>>,
    }

    #[async_trait]
    impl PinActuator for RecordingActuator {
        async fn set_line(&self, line: u32, high: bool) -> Result<(), BoardError> {
            self.log.lock().push((line, high));
            Ok(())
        }

        async fn configure_input(&self, line: u32, rising_edge: bool) -> Result<(), BoardError> {
            self.log.lock().push((line, rising_edge));
            Ok(())
        }
    }

    fn rail(name: &str, line: u32) -> RailDescriptor {
        RailDescriptor {
            name: name.into(),
            enable_line: line,
            settle: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn rails_sequence_forward_then_reverse() {
        let pins = Arc::new(RecordingActuator::default());
        let board = StaticBoard::new("test-slot", pins.clone())
            .with_rail(rail("vdd-core", 1))
            .with_rail(rail("vdd-io", 2));

        board.power_on().await.unwrap();
        board.power_off().await.unwrap();

        let log = pins.log.lock().clone();
        assert_eq!(log, vec![(1, true), (2, true), (2, false), (1, false)]);
    }

    #[tokio::test]
    async fn active_low_reset_pulses_low_then_high() {
        let pins = Arc::new(RecordingActuator::default());
        let board = StaticBoard::new("test-slot", pins.clone()).with_reset(ResetDescriptor {
            line: 7,
            active_low: true,
            pulse: Duration::from_millis(0),
        });

        board.reset().await.unwrap();

        let log = pins.log.lock().clone();
        assert_eq!(log, vec![(7, false), (7, true)]);
    }
}
