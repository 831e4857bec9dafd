//! Transactional register bus client.
//!
//! The transport is modeled as a byte-oriented [`RawBus`] (send a
//! command/address frame, receive a data frame). [`SharedBus`] wraps it
//! in a transaction mutex so that a send+recv pair from one capability
//! can never interleave with traffic from another capability sharing
//! the same physical bus. [`RegisterClient`] layers typed register
//! accessors on top.
//!
//! Every transfer is retried up to [`MAX_XFER_ATTEMPTS`] times with no
//! backoff between attempts; individual failures are logged and only
//! the exhausted budget surfaces as [`BusError::Exhausted`]. All
//! transport failures are treated uniformly as retryable.

use crate::error::BusError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Retry budget for a single send or recv transfer.
pub const MAX_XFER_ATTEMPTS: u32 = 5;

/// Opaque device address on the bus. Immutable after attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAddress(u16);

impl BusAddress {
    /// Wrap a raw bus address.
    pub const fn new(address: u16) -> Self {
        Self(address)
    }

    /// The raw address value.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Byte-oriented transport a device hangs off.
///
/// Implementations may block internally (the transfer is awaited from a
/// poll task or a control-plane call, both of which tolerate sleeping).
/// One `RawBus` instance corresponds to one attached device; sharing a
/// physical segment between devices is the platform layer's concern.
#[async_trait]
pub trait RawBus: Send + Sync {
    /// Transmit one frame. Returns the number of bytes accepted.
    async fn send(&mut self, bytes: &[u8]) -> Result<usize, BusError>;

    /// Receive into `buf`. Returns the number of bytes filled.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError>;
}

/// Shared handle to a bus with single-transaction-at-a-time semantics.
///
/// Cloning is cheap; all clones serialize through one mutex, mirroring
/// the exclusive-port discipline used for shared serial transports.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn RawBus>>>,
}

impl SharedBus {
    /// Wrap a transport in a shared transaction mutex.
    pub fn new(bus: impl RawBus + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(bus))),
        }
    }

    /// Begin a transaction. The returned guard holds the bus until
    /// dropped; a paired send+recv issued through one guard cannot be
    /// interleaved by any other clone of this handle.
    pub async fn transaction(&self) -> BusTransaction<'_> {
        BusTransaction {
            guard: self.inner.lock().await,
        }
    }
}

/// Exclusive access to the bus for one transaction.
pub struct BusTransaction<'a> {
    guard: MutexGuard<'a, Box<dyn RawBus>>,
}

impl BusTransaction<'_> {
    /// Transmit `bytes`, retrying transient failures. A short write
    /// counts as a failed attempt.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        for attempt in 1..=MAX_XFER_ATTEMPTS {
            match self.guard.send(bytes).await {
                Ok(n) if n == bytes.len() => return Ok(()),
                Ok(n) => warn!(attempt, wrote = n, expected = bytes.len(), "short bus write"),
                Err(err) => warn!(attempt, error = %err, "bus send attempt failed"),
            }
        }
        Err(BusError::Exhausted {
            attempts: MAX_XFER_ATTEMPTS,
        })
    }

    /// Fill `buf`, retrying transient failures. A short read counts as
    /// a failed attempt.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        for attempt in 1..=MAX_XFER_ATTEMPTS {
            match self.guard.recv(buf).await {
                Ok(n) if n == buf.len() => return Ok(()),
                Ok(n) => warn!(attempt, read = n, expected = buf.len(), "short bus read"),
                Err(err) => warn!(attempt, error = %err, "bus recv attempt failed"),
            }
        }
        Err(BusError::Exhausted {
            attempts: MAX_XFER_ATTEMPTS,
        })
    }
}

/// Typed register accessors for one attached device.
///
/// Register mutation through [`modify_register`](Self::modify_register)
/// is read-modify-write and NOT atomic at the bus level; callers must
/// hold their device's control lock, which every driver in this
/// workspace does by construction.
#[derive(Clone)]
pub struct RegisterClient {
    bus: SharedBus,
    address: BusAddress,
}

impl RegisterClient {
    /// Bind a client to a device address on a shared bus.
    pub fn new(bus: SharedBus, address: BusAddress) -> Self {
        Self { bus, address }
    }

    /// The device address this client talks to.
    pub fn address(&self) -> BusAddress {
        self.address
    }

    /// Read one register.
    pub async fn read_register(&self, register: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.read_registers(register, &mut buf).await?;
        Ok(buf[0])
    }

    /// Read `buf.len()` consecutive registers starting at `register`.
    /// Address phase and data phase run inside one bus transaction.
    pub async fn read_registers(&self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let mut txn = self.bus.transaction().await;
        txn.send(&[register]).await?;
        txn.recv(buf).await
    }

    /// Write one register.
    pub async fn write_register(&self, register: u8, value: u8) -> Result<(), BusError> {
        let mut txn = self.bus.transaction().await;
        txn.send(&[register, value]).await
    }

    /// Write `values` to consecutive registers starting at `register`,
    /// in the order given (low-to-high register addresses).
    pub async fn write_registers(&self, register: u8, values: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(values.len() + 1);
        frame.push(register);
        frame.extend_from_slice(values);
        let mut txn = self.bus.transaction().await;
        txn.send(&frame).await
    }

    /// Set `set_mask` bits and clear `clear_mask` bits in a register.
    /// Two bus transactions (read, then write).
    pub async fn modify_register(
        &self,
        register: u8,
        set_mask: u8,
        clear_mask: u8,
    ) -> Result<(), BusError> {
        let old = self.read_register(register).await?;
        let new = (old & !clear_mask) | set_mask;
        self.write_register(register, new).await
    }

    /// Transmit a bare command byte, for chips without a register file.
    pub async fn send_command(&self, command: u8) -> Result<(), BusError> {
        let mut txn = self.bus.transaction().await;
        txn.send(&[command]).await
    }

    /// Receive a bare data frame (no address phase), for chips whose
    /// reads are plain byte fetches.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<(), BusError> {
        let mut txn = self.bus.transaction().await;
        txn.recv(buf).await
    }
}
