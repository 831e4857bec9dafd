//! Camera control interface client.
//!
//! Image sensors in this family use 16-bit big-endian sub-addresses
//! over the same byte-oriented bus the light sensors use; the frame
//! layout is `[addr_hi, addr_lo, data...]`. Each accessor runs inside
//! one bus transaction, so a register upload can interleave with
//! nothing else mid-register.

use sense_core::bus::{BusAddress, SharedBus};
use sense_core::error::BusError;

/// Register accessors with 16-bit sub-addressing.
#[derive(Clone)]
pub struct CciClient {
    bus: SharedBus,
    address: BusAddress,
}

impl CciClient {
    /// Bind a client to a device address on a shared bus.
    pub fn new(bus: SharedBus, address: BusAddress) -> Self {
        Self { bus, address }
    }

    /// The device address this client talks to.
    pub fn address(&self) -> BusAddress {
        self.address
    }

    /// Read one register.
    pub async fn read(&self, register: u16) -> Result<u8, BusError> {
        let mut txn = self.bus.transaction().await;
        txn.send(&register.to_be_bytes()).await?;
        let mut buf = [0u8; 1];
        txn.recv(&mut buf).await?;
        Ok(buf[0])
    }

    /// Write one register.
    pub async fn write(&self, register: u16, value: u8) -> Result<(), BusError> {
        let [hi, lo] = register.to_be_bytes();
        let mut txn = self.bus.transaction().await;
        txn.send(&[hi, lo, value]).await
    }

    /// Write `values` to consecutive registers starting at `register`,
    /// low address first, in one transaction.
    pub async fn write_seq(&self, register: u16, values: &[u8]) -> Result<(), BusError> {
        let [hi, lo] = register.to_be_bytes();
        let mut frame = Vec::with_capacity(values.len() + 2);
        frame.push(hi);
        frame.push(lo);
        frame.extend_from_slice(values);
        let mut txn = self.bus.transaction().await;
        txn.send(&frame).await
    }

    /// Upload a `(register, value)` sequence in table order.
    pub async fn upload(&self, sequence: &[(u16, u8)]) -> Result<(), BusError> {
        for (register, value) in sequence {
            self.write(*register, *value).await?;
        }
        Ok(())
    }
}
