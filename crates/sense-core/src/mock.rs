//! Scripted in-memory bus for driver tests.
//!
//! [`MockBus`] behaves like a small register-file device. In the
//! default narrow mode a 1-byte send sets the register pointer and a
//! longer send writes consecutive registers; [`MockBus::wide`] models
//! chips with 16-bit big-endian sub-addresses (camera CCI style),
//! where the first two sent bytes are the pointer. Reads can also be
//! scripted as raw frames for command-style chips without a register
//! file. Failures are injectable per-transfer, and every transfer
//! (including failed attempts) is recorded so tests can assert on
//! retry counts, write ordering and transaction interleaving.

use crate::bus::RawBus;
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One observed transfer on the mock bus, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A send that succeeded.
    Send {
        /// The transmitted frame.
        bytes: Vec<u8>,
    },
    /// A send that hit injected failure.
    SendFailed {
        /// The frame that was attempted.
        bytes: Vec<u8>,
    },
    /// A recv that succeeded.
    Recv {
        /// The bytes handed back.
        bytes: Vec<u8>,
    },
    /// A recv that hit injected failure.
    RecvFailed,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AddrWidth {
    One,
    Two,
}

struct MockBusInner {
    width: AddrWidth,
    registers: HashMap<u16, u8>,
    scripted_reads: VecDeque<Vec<u8>>,
    pointer: u16,
    fail_all_sends: bool,
    fail_next_sends: u32,
    fail_next_recvs: u32,
    events: Vec<BusEvent>,
    register_writes: Vec<(u16, u8)>,
}

impl MockBusInner {
    fn new(width: AddrWidth) -> Self {
        Self {
            width,
            registers: HashMap::new(),
            scripted_reads: VecDeque::new(),
            pointer: 0,
            fail_all_sends: false,
            fail_next_sends: 0,
            fail_next_recvs: 0,
            events: Vec::new(),
            register_writes: Vec::new(),
        }
    }

    fn commit_writes(&mut self, base: u16, values: &[u8]) {
        self.pointer = base;
        for (offset, value) in values.iter().enumerate() {
            let register = base.wrapping_add(offset as u16);
            self.registers.insert(register, *value);
            self.register_writes.push((register, *value));
        }
    }
}

/// In-memory [`RawBus`] with failure injection and a transfer log.
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

/// Inspection/scripting handle, valid after the bus has been moved
/// into a [`SharedBus`](crate::bus::SharedBus).
#[derive(Clone)]
pub struct MockBusHandle {
    inner: Arc<Mutex<MockBusInner>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// A narrow-address bus with all registers reading zero.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBusInner::new(AddrWidth::One))),
        }
    }

    /// A bus whose devices use 16-bit big-endian sub-addresses.
    pub fn wide() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBusInner::new(AddrWidth::Two))),
        }
    }

    /// Scripting handle sharing this bus's state.
    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RawBus for MockBus {
    async fn send(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let mut inner = self.inner.lock();
        if inner.fail_all_sends || inner.fail_next_sends > 0 {
            if inner.fail_next_sends > 0 {
                inner.fail_next_sends -= 1;
            }
            inner.events.push(BusEvent::SendFailed {
                bytes: bytes.to_vec(),
            });
            return Err(BusError::Transport("injected send failure".into()));
        }
        inner.events.push(BusEvent::Send {
            bytes: bytes.to_vec(),
        });
        match inner.width {
            AddrWidth::One => match bytes {
                [] => {}
                [register] => inner.pointer = u16::from(*register),
                [register, values @ ..] => {
                    let base = u16::from(*register);
                    let values = values.to_vec();
                    inner.commit_writes(base, &values);
                }
            },
            AddrWidth::Two => match bytes {
                [] | [_] => {}
                [hi, lo] => inner.pointer = u16::from_be_bytes([*hi, *lo]),
                [hi, lo, values @ ..] => {
                    let base = u16::from_be_bytes([*hi, *lo]);
                    let values = values.to_vec();
                    inner.commit_writes(base, &values);
                }
            },
        }
        Ok(bytes.len())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        let mut inner = self.inner.lock();
        if inner.fail_next_recvs > 0 {
            inner.fail_next_recvs -= 1;
            inner.events.push(BusEvent::RecvFailed);
            return Err(BusError::Transport("injected recv failure".into()));
        }
        if let Some(frame) = inner.scripted_reads.pop_front() {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            inner.events.push(BusEvent::Recv {
                bytes: buf[..n].to_vec(),
            });
            return Ok(n);
        }
        let base = inner.pointer;
        for (offset, slot) in buf.iter_mut().enumerate() {
            *slot = *inner
                .registers
                .get(&base.wrapping_add(offset as u16))
                .unwrap_or(&0);
        }
        inner.events.push(BusEvent::Recv {
            bytes: buf.to_vec(),
        });
        Ok(buf.len())
    }
}

impl MockBusHandle {
    /// Preload a register value (chip id, power-on defaults).
    pub fn set_register(&self, register: u16, value: u8) {
        self.inner.lock().registers.insert(register, value);
    }

    /// Current value of a register.
    pub fn register(&self, register: u16) -> u8 {
        *self.inner.lock().registers.get(&register).unwrap_or(&0)
    }

    /// Queue a raw frame returned by the next unscripted recv.
    pub fn push_read(&self, frame: &[u8]) {
        self.inner.lock().scripted_reads.push_back(frame.to_vec());
    }

    /// Make every send fail until turned off again.
    pub fn set_fail_all_sends(&self, fail: bool) {
        self.inner.lock().fail_all_sends = fail;
    }

    /// Fail exactly the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.inner.lock().fail_next_sends = count;
    }

    /// Fail exactly the next `count` recvs.
    pub fn fail_next_recvs(&self, count: u32) {
        self.inner.lock().fail_next_recvs = count;
    }

    /// Every transfer observed so far, in order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.inner.lock().events.clone()
    }

    /// Successful register writes in commit order, as `(register,
    /// value)` pairs.
    pub fn register_writes(&self) -> Vec<(u16, u8)> {
        self.inner.lock().register_writes.clone()
    }

    /// Number of failed send attempts observed.
    pub fn send_failure_count(&self) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, BusEvent::SendFailed { .. }))
            .count()
    }

    /// Forget recorded events and writes (register contents are kept).
    pub fn clear_log(&self) {
        let mut inner = self.inner.lock();
        inner.events.clear();
        inner.register_writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusAddress, RegisterClient, SharedBus, MAX_XFER_ATTEMPTS};

    #[tokio::test]
    async fn pointer_then_read_returns_register_contents() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.set_register(0x04, 0xCD);
        handle.set_register(0x05, 0x0A);

        let client = RegisterClient::new(SharedBus::new(bus), BusAddress::new(0x44));
        let mut buf = [0u8; 2];
        client.read_registers(0x04, &mut buf).await.unwrap();
        assert_eq!(buf, [0xCD, 0x0A]);
    }

    #[tokio::test]
    async fn scripted_reads_take_precedence() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.push_read(&[0x12, 0x81]);

        let client = RegisterClient::new(SharedBus::new(bus), BusAddress::new(0x39));
        let mut buf = [0u8; 2];
        client.receive(&mut buf).await.unwrap();
        assert_eq!(buf, [0x12, 0x81]);
    }

    #[tokio::test]
    async fn every_failed_attempt_is_recorded() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.set_fail_all_sends(true);

        let client = RegisterClient::new(SharedBus::new(bus), BusAddress::new(0x39));
        client.write_register(0x01, 0xFF).await.unwrap_err();
        assert_eq!(handle.send_failure_count(), MAX_XFER_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.fail_next_sends(2);

        let client = RegisterClient::new(SharedBus::new(bus), BusAddress::new(0x39));
        client.write_register(0x01, 0x55).await.unwrap();
        assert_eq!(handle.register(0x01), 0x55);
        assert_eq!(handle.send_failure_count(), 2);
    }

    #[tokio::test]
    async fn wide_mode_uses_two_byte_pointers() {
        let mut bus = MockBus::wide();
        let handle = bus.handle();

        bus.send(&[0x30, 0x18, 0x4C, 0x04, 0x00]).await.unwrap();
        assert_eq!(handle.register(0x3018), 0x4C);
        assert_eq!(handle.register(0x3019), 0x04);
        assert_eq!(handle.register(0x301A), 0x00);

        bus.send(&[0x30, 0x19]).await.unwrap();
        let mut buf = [0u8; 1];
        bus.recv(&mut buf).await.unwrap();
        assert_eq!(buf, [0x04]);
    }
}
