//! Half-duplex arbitration between the two nodes of a channel.
//!
//! A frame sender first reserves its own flag, then confirms by reserving the
//! peer's flag. If the peer is mid-frame the own reservation is rolled back.
//! The sender's flag is released when its [`LinkLease`] drops; the peer's flag
//! is released by the peer's receiver once it has decoded the whole frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct BusyFlag {
    busy: AtomicBool,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Sets the flag if it was clear.
    pub fn try_reserve(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn occupy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Which side refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyHolder {
    Local,
    Peer,
}

#[derive(Debug)]
pub struct LinkLease {
    own: Arc<BusyFlag>,
}

impl LinkLease {
    pub fn try_acquire(own: &Arc<BusyFlag>, peer: &BusyFlag) -> Result<Self, BusyHolder> {
        if !own.try_reserve() {
            return Err(BusyHolder::Local);
        }
        if !peer.try_reserve() {
            own.release();
            return Err(BusyHolder::Peer);
        }
        Ok(Self {
            own: Arc::clone(own),
        })
    }
}

impl Drop for LinkLease {
    fn drop(&mut self) {
        self.own.release();
    }
}
