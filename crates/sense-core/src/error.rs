//! Error types shared by the sensor core and the driver crates.
//!
//! The taxonomy mirrors the three layers of the stack:
//!
//! - [`BusError`]: a register transaction failed at the transport level.
//!   Transient failures are retried inside the bus client and only
//!   surface here once the retry budget is exhausted.
//! - [`InitError`]: device probe failed. Fatal to the instance; no
//!   driver is constructed.
//! - [`DriverError`]: a control-plane call was rejected. Wraps
//!   [`BusError`] for operations that touch the hardware.
//!
//! A reading whose valid bit is clear is deliberately NOT an error: the
//! poll scheduler handles it by re-reporting the last known good value.

use thiserror::Error;

/// Convenience alias for control-plane results.
pub type SenseResult<T> = std::result::Result<T, DriverError>;

/// Transport-level failure of a single bus transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A single transfer attempt failed. Retried internally; callers
    /// normally only observe [`BusError::Exhausted`].
    #[error("bus transport error: {0}")]
    Transport(String),

    /// All retry attempts for one transfer failed.
    #[error("bus transfer failed after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },
}

/// Board power-sequencing failure.
#[derive(Error, Debug)]
#[error("board support error: {0}")]
pub struct BoardError(pub String);

/// Failure to bring up a device instance.
#[derive(Error, Debug)]
pub enum InitError {
    /// The identity/probe read failed or returned an unexpected value.
    #[error("chip not detected: {0}")]
    ChipNotDetected(String),

    /// Bus failure during the probe sequence.
    #[error("bus error during probe: {0}")]
    Bus(#[from] BusError),

    /// Board rails/pins could not be sequenced.
    #[error("board bring-up failed: {0}")]
    Board(#[from] BoardError),
}

/// Control-plane call rejection.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Parameter outside the representable range, or a capability the
    /// device does not have. Rejected without side effects.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The underlying register transaction failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Operation not supported by this device.
    #[error("not supported: {0}")]
    NotSupported(String),
}
