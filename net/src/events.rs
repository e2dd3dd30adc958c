#![deny(unsafe_code)]
#![deny(warnings)]
//! Per-socket completion events
//!
//! The interrupt dispatch task is the only setter; the task driving a socket
//! is the only waiter. Waits are edge-triggered: waited bits are cleared as
//! they are returned, bits outside the wait mask stay latched.

use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;

use crate::error::NetworkError;

/// Connection to the peer established (TCP)
pub const CON: u8 = 1 << 0;
/// FIN or FIN/ACK received from the peer
pub const DISCON: u8 = 1 << 1;
/// Data received from the peer
pub const RECV: u8 = 1 << 2;
/// ARP or TCP timeout occurred
pub const TIMEOUT: u8 = 1 << 3;
/// SEND command completed
pub const SEND_OK: u8 = 1 << 4;
/// All five event bits
pub const ALL: u8 = CON | DISCON | RECV | TIMEOUT | SEND_OK;

/// One socket's completion event set
///
/// The flag byte mirrors the socket interrupt register layout. `active`
/// tracks the open/close lifecycle: flags are only latched for an open
/// socket, and the dispatcher is told when an interrupt arrives for a
/// closed one.
pub struct EventSet {
    flags: AtomicU8,
    active: AtomicBool,
    waker: AtomicWaker,
}

impl EventSet {
    pub const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            active: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Claims the event set for a freshly opened socket, starting with no
    /// flags latched. Fails if the previous owner never released it.
    pub fn acquire(&self) -> Result<(), NetworkError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(NetworkError::EventSetInUse);
        }
        self.flags.store(0, Ordering::Release);
        Ok(())
    }

    /// Releases the event set on close. Returns whether it was active, so
    /// the release is observable exactly once per acquire.
    pub fn release(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if was_active {
            self.flags.store(0, Ordering::Release);
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Latches event bits and wakes the waiter. Returns false without
    /// latching when the set is inactive.
    pub fn signal(&self, bits: u8) -> bool {
        if !self.is_active() {
            return false;
        }
        self.flags.fetch_or(bits, Ordering::AcqRel);
        self.waker.wake();
        true
    }

    /// Snapshot of the latched flags without consuming them
    pub fn get(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    /// Waits until any bit in `mask` is latched, clears exactly those bits,
    /// and returns the ones that had fired
    pub async fn wait_any(&self, mask: u8) -> u8 {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            let res = self
                .flags
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
                    if flags & mask != 0 {
                        Some(flags & !mask)
                    } else {
                        None
                    }
                });
            match res {
                Ok(prev) => Poll::Ready(prev & mask),
                Err(_) => Poll::Pending,
            }
        })
        .await
    }
}
