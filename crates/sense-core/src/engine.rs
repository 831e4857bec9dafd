//! Power/enable state machine and poll scheduler.
//!
//! [`SensorEngine`] owns the mutable device state for one physical
//! sensor and drives it through a [`SensorHardware`] personality
//! supplied by a driver crate. It provides the control-plane surface
//! (enable/disable, interval, suspend/resume, shutdown) and runs one
//! cancellable poll task per enabled capability.
//!
//! ## Lock discipline
//!
//! - `control`: one `tokio::sync::Mutex` per instance. Every state
//!   transition (enable, disable, interval set, suspend, resume,
//!   shutdown) serializes through it, so concurrent callers observe a
//!   consistent total order.
//! - `state`: a `parking_lot::Mutex` guarding the `DeviceState`
//!   record. Held only for short, non-async critical sections; poll
//!   ticks use it to read their interval and store readings without
//!   contending on the control lock.
//! - The bus transaction mutex (see [`crate::bus::SharedBus`]) is the
//!   third, independent level; it is what keeps a deactivate write
//!   from landing between the address and data phases of an in-flight
//!   tick's read.
//!
//! ## Transition asymmetry
//!
//! Enabling requires the activate write to succeed before the poll
//! task starts; disabling always stops the poll task even if the
//! deactivate write fails. A poll task must never outlive a device
//! that is not confirmed active, but a failed power-down write must
//! not leave a poll task running either.

use crate::error::{BusError, DriverError, SenseResult};
use crate::measurement::{Capability, Measurement, MeasurementSink, Reading};
use crate::poll::PollHandle;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Lower bound applied to poll intervals at write time.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Upper bound applied to poll intervals at write time.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(600);

/// Clamp an interval into the supported polling window.
pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Hardware personality a driver crate plugs into the engine.
///
/// All register traffic goes through the driver's
/// [`RegisterClient`](crate::bus::RegisterClient); the engine never
/// touches the bus directly.
#[async_trait]
pub trait SensorHardware: Send + Sync + 'static {
    /// Capabilities this device exposes. Fixed for the instance's
    /// lifetime.
    fn capabilities(&self) -> &[Capability];

    /// Full chip initialization sequence. Run at probe time and again
    /// on resume, because registers may have reset across a deep
    /// sleep.
    async fn init(&self) -> Result<(), BusError>;

    /// Activate one capability. Must succeed before the engine starts
    /// polling it.
    async fn activate(&self, capability: Capability) -> Result<(), BusError>;

    /// Deactivate one capability. Called best-effort on disable.
    async fn deactivate(&self, capability: Capability) -> Result<(), BusError>;

    /// One read cycle for one capability.
    async fn read(&self, capability: Capability) -> Result<Reading, BusError>;

    /// Scale a raw reading into the reporting unit. Integer
    /// arithmetic, truncating.
    fn scale(&self, capability: Capability, raw: u32) -> i64;

    /// Put the chip in its lowest-power mode. Called on shutdown.
    async fn power_down(&self) -> Result<(), BusError>;
}

#[async_trait]
impl<T: SensorHardware + ?Sized> SensorHardware for Arc<T> {
    fn capabilities(&self) -> &[Capability] {
        (**self).capabilities()
    }

    async fn init(&self) -> Result<(), BusError> {
        (**self).init().await
    }

    async fn activate(&self, capability: Capability) -> Result<(), BusError> {
        (**self).activate(capability).await
    }

    async fn deactivate(&self, capability: Capability) -> Result<(), BusError> {
        (**self).deactivate(capability).await
    }

    async fn read(&self, capability: Capability) -> Result<Reading, BusError> {
        (**self).read(capability).await
    }

    fn scale(&self, capability: Capability, raw: u32) -> i64 {
        (**self).scale(capability, raw)
    }

    async fn power_down(&self) -> Result<(), BusError> {
        (**self).power_down().await
    }
}

/// Per-capability mutable state.
struct CapabilitySlot {
    enabled: bool,
    interval: Duration,
    last_valid: Option<Measurement>,
    poll: Option<PollHandle>,
}

/// The one mutable record per physical device instance.
struct DeviceState {
    slots: Vec<CapabilitySlot>,
    suspended: bool,
}

struct EngineShared<H> {
    hardware: H,
    sink: Arc<dyn MeasurementSink>,
    capabilities: Vec<Capability>,
    state: parking_lot::Mutex<DeviceState>,
}

impl<H> EngineShared<H> {
    fn capability_index(&self, capability: Capability) -> Option<usize> {
        self.capabilities.iter().position(|c| *c == capability)
    }
}

/// Power/enable state machine for one sensor instance.
///
/// Explicitly constructed and owned; multiple instances coexist even
/// when the physical board has only one device.
pub struct SensorEngine<H: SensorHardware> {
    shared: Arc<EngineShared<H>>,
    control: tokio::sync::Mutex<()>,
}

impl<H: SensorHardware> SensorEngine<H> {
    /// Build an engine around a hardware personality. All capabilities
    /// start disabled with `initial_interval` (clamped) as their poll
    /// interval.
    pub fn new(hardware: H, sink: Arc<dyn MeasurementSink>, initial_interval: Duration) -> Self {
        let capabilities = hardware.capabilities().to_vec();
        let interval = clamp_poll_interval(initial_interval);
        let slots = capabilities
            .iter()
            .map(|_| CapabilitySlot {
                enabled: false,
                interval,
                last_valid: None,
                poll: None,
            })
            .collect();
        Self {
            shared: Arc::new(EngineShared {
                hardware,
                sink,
                capabilities,
                state: parking_lot::Mutex::new(DeviceState {
                    slots,
                    suspended: false,
                }),
            }),
            control: tokio::sync::Mutex::new(()),
        }
    }

    /// The hardware personality, for driver-level operations that sit
    /// outside the enable/poll state machine (mode upload, thresholds).
    pub fn hardware(&self) -> &H {
        &self.shared.hardware
    }

    /// Capabilities of the underlying device.
    pub fn capabilities(&self) -> &[Capability] {
        &self.shared.capabilities
    }

    fn index(&self, capability: Capability) -> SenseResult<usize> {
        self.shared.capability_index(capability).ok_or_else(|| {
            DriverError::InvalidParameter(format!("capability {capability} not supported"))
        })
    }

    /// Whether a capability is logically enabled.
    pub fn is_enabled(&self, capability: Capability) -> SenseResult<bool> {
        let index = self.index(capability)?;
        Ok(self.shared.state.lock().slots[index].enabled)
    }

    /// Current poll interval (always the clamped value).
    pub fn interval(&self, capability: Capability) -> SenseResult<Duration> {
        let index = self.index(capability)?;
        Ok(self.shared.state.lock().slots[index].interval)
    }

    /// Last known good measurement, if any tick has produced one.
    pub fn last_measurement(&self, capability: Capability) -> SenseResult<Option<Measurement>> {
        let index = self.index(capability)?;
        Ok(self.shared.state.lock().slots[index].last_valid)
    }

    /// Whether the engine is between `suspend()` and `resume()`.
    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Update a capability's poll interval, clamped to
    /// [`MIN_POLL_INTERVAL`, `MAX_POLL_INTERVAL`] at write time. Takes
    /// effect from the next scheduled tick; while disabled it only
    /// updates the stored value.
    pub async fn set_interval(&self, capability: Capability, interval: Duration) -> SenseResult<()> {
        let index = self.index(capability)?;
        if interval.is_zero() {
            return Err(DriverError::InvalidParameter(
                "poll interval must be non-zero".into(),
            ));
        }
        let clamped = clamp_poll_interval(interval);
        let _guard = self.control.lock().await;
        self.shared.state.lock().slots[index].interval = clamped;
        debug!(%capability, interval_ms = clamped.as_millis() as u64, "poll interval updated");
        Ok(())
    }

    /// Enable or disable a capability.
    pub async fn set_enabled(&self, capability: Capability, enabled: bool) -> SenseResult<()> {
        let index = self.index(capability)?;
        let _guard = self.control.lock().await;
        if enabled {
            self.enable(index, capability).await
        } else {
            self.disable(index, capability).await
        }
    }

    async fn enable(&self, index: usize, capability: Capability) -> SenseResult<()> {
        let suspended = {
            let state = self.shared.state.lock();
            if state.slots[index].enabled {
                return Ok(());
            }
            state.suspended
        };
        if suspended {
            // Device is hardware-off. Record the intent; resume()
            // performs the activate write and starts polling.
            self.shared.state.lock().slots[index].enabled = true;
            debug!(%capability, "enable recorded while suspended");
            return Ok(());
        }
        self.shared.hardware.activate(capability).await?;
        self.start_poll(index, capability);
        info!(%capability, "capability enabled");
        Ok(())
    }

    async fn disable(&self, index: usize, capability: Capability) -> SenseResult<()> {
        let suspended = {
            let state = self.shared.state.lock();
            if !state.slots[index].enabled {
                return Ok(());
            }
            state.suspended
        };
        if !suspended {
            // Best-effort: a failed power-down write must not leave
            // the poll task running.
            if let Err(err) = self.shared.hardware.deactivate(capability).await {
                warn!(%capability, error = %err, "deactivate write failed; capability disabled anyway");
            }
        }
        let handle = {
            let mut state = self.shared.state.lock();
            let slot = &mut state.slots[index];
            slot.enabled = false;
            slot.poll.take()
        };
        if let Some(handle) = handle {
            handle.cancel_and_join().await;
        }
        info!(%capability, "capability disabled");
        Ok(())
    }

    fn start_poll(&self, index: usize, capability: Capability) {
        let (stop_tx, stop_rx) = PollHandle::stop_channel();
        let shared = Arc::clone(&self.shared);
        {
            let mut state = self.shared.state.lock();
            state.slots[index].enabled = true;
        }
        let task = tokio::spawn(poll_loop(shared, index, capability, stop_rx));
        let mut state = self.shared.state.lock();
        state.slots[index].poll = Some(PollHandle::new(stop_tx, task));
    }

    /// Hardware-disable every enabled capability and stop its poll
    /// task, without clearing the logical enabled flags, so `resume()`
    /// can restore exactly the pre-suspend set.
    pub async fn suspend(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        let enabled: Vec<(usize, Capability)> = {
            let mut state = self.shared.state.lock();
            if state.suspended {
                return Ok(());
            }
            state.suspended = true;
            self.shared
                .capabilities
                .iter()
                .enumerate()
                .filter(|(i, _)| state.slots[*i].enabled)
                .map(|(i, c)| (i, *c))
                .collect()
        };
        for (index, capability) in enabled {
            if let Err(err) = self.shared.hardware.deactivate(capability).await {
                warn!(%capability, error = %err, "suspend deactivate failed");
            }
            let handle = self.shared.state.lock().slots[index].poll.take();
            if let Some(handle) = handle {
                handle.cancel_and_join().await;
            }
        }
        info!("device suspended");
        Ok(())
    }

    /// Re-run the full chip initialization sequence, then re-activate
    /// and restart polling for the capabilities that were enabled at
    /// suspend time. A capability whose activate write fails is marked
    /// disabled (never poll an unconfirmed device) and the first such
    /// error is surfaced after the rest have been restored.
    pub async fn resume(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        if !self.shared.state.lock().suspended {
            return Ok(());
        }
        // Registers may have reset across a deep sleep.
        self.shared.hardware.init().await?;
        let enabled: Vec<(usize, Capability)> = {
            let state = self.shared.state.lock();
            self.shared
                .capabilities
                .iter()
                .enumerate()
                .filter(|(i, _)| state.slots[*i].enabled)
                .map(|(i, c)| (i, *c))
                .collect()
        };
        self.shared.state.lock().suspended = false;
        let mut first_error: Option<BusError> = None;
        for (index, capability) in enabled {
            match self.shared.hardware.activate(capability).await {
                Ok(()) => self.start_poll(index, capability),
                Err(err) => {
                    warn!(%capability, error = %err, "re-activate failed on resume; capability left disabled");
                    self.shared.state.lock().slots[index].enabled = false;
                    first_error.get_or_insert(err);
                }
            }
        }
        info!("device resumed");
        match first_error {
            None => Ok(()),
            Some(err) => Err(err.into()),
        }
    }

    /// Disable everything, stop all polling, and write the chip to its
    /// lowest-power mode. Best-effort on the register writes; the poll
    /// tasks are always stopped. Required before dropping the engine —
    /// a leaked poll task holds the bus client alive.
    pub async fn shutdown(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        let (suspended, active): (bool, Vec<(usize, Capability)>) = {
            let state = self.shared.state.lock();
            (
                state.suspended,
                self.shared
                    .capabilities
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| state.slots[*i].enabled || state.slots[*i].poll.is_some())
                    .map(|(i, c)| (i, *c))
                    .collect(),
            )
        };
        for (index, capability) in active {
            if !suspended {
                if let Err(err) = self.shared.hardware.deactivate(capability).await {
                    warn!(%capability, error = %err, "deactivate write failed during shutdown");
                }
            }
            let handle = {
                let mut state = self.shared.state.lock();
                let slot = &mut state.slots[index];
                slot.enabled = false;
                slot.poll.take()
            };
            if let Some(handle) = handle {
                handle.cancel_and_join().await;
            }
        }
        if let Err(err) = self.shared.hardware.power_down().await {
            warn!(error = %err, "power-down write failed during shutdown");
        }
        info!("sensor engine shut down");
        Ok(())
    }
}

impl<H: SensorHardware> Drop for SensorEngine<H> {
    fn drop(&mut self) {
        // Backstop for a skipped shutdown(): signal every poll task so
        // it exits at its next wakeup instead of running forever on
        // the leaked Arc.
        let mut state = self.shared.state.lock();
        for slot in &mut state.slots {
            if let Some(handle) = slot.poll.take() {
                handle.signal();
            }
        }
    }
}

async fn poll_loop<H: SensorHardware>(
    shared: Arc<EngineShared<H>>,
    index: usize,
    capability: Capability,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        // Interval is read fresh each cycle; a set_interval during the
        // wait applies from the tick after the one already scheduled.
        let interval = shared.state.lock().slots[index].interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow_and_update() {
                    break;
                }
                continue;
            }
        }
        run_tick(&shared, index, capability).await;
        // Reschedule only if still enabled, checked fresh, so a
        // disable racing this tick cannot leave an orphan timer armed.
        let still_enabled = {
            let state = shared.state.lock();
            state.slots[index].enabled && !state.suspended
        };
        if !still_enabled {
            break;
        }
    }
    trace!(%capability, "poll task exiting");
}

async fn run_tick<H: SensorHardware>(
    shared: &Arc<EngineShared<H>>,
    index: usize,
    capability: Capability,
) {
    let measurement = match shared.hardware.read(capability).await {
        Ok(reading) if reading.valid => {
            let measurement = Measurement {
                raw: reading.raw,
                scaled: shared.hardware.scale(capability, reading.raw),
                valid: true,
            };
            shared.state.lock().slots[index].last_valid = Some(measurement);
            Some(measurement)
        }
        Ok(reading) => {
            debug!(%capability, raw = reading.raw, "reading flagged invalid; reporting last good value");
            shared.state.lock().slots[index].last_valid
        }
        Err(err) => {
            warn!(%capability, error = %err, "poll read failed; reporting last good value");
            shared.state.lock().slots[index].last_valid
        }
    };
    if let Some(measurement) = measurement {
        shared.sink.deliver(capability, measurement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_clamping_is_applied_at_both_ends() {
        assert_eq!(
            clamp_poll_interval(Duration::from_millis(10)),
            MIN_POLL_INTERVAL
        );
        assert_eq!(
            clamp_poll_interval(Duration::from_secs(5)),
            MAX_POLL_INTERVAL
        );
        assert_eq!(
            clamp_poll_interval(Duration::from_millis(350)),
            Duration::from_millis(350)
        );
    }
}
