//! Event ingest: radio/IP events mapped into a latched flag group.
//!
//! [`EventFlags`] follows the FreeRTOS event-group contract: a set of
//! latched boolean flags with atomic set/clear, a coherent snapshot read,
//! and a blocking wait used by the task-dispatch worker. The ingest path ([`EventFlags::ingest`]) is called from the
//! radio's event callback and must stay lock-free with respect to the
//! config state: it only touches the flag group.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

pub(crate) const BIT_TRIGGER: u32 = 1 << 0;
pub(crate) const BIT_STA_START: u32 = 1 << 1;
pub(crate) const BIT_STA_CONNECTED: u32 = 1 << 2;
pub(crate) const BIT_STA_GOT_IP: u32 = 1 << 3;
pub(crate) const BIT_AP_START: u32 = 1 << 4;
pub(crate) const BIT_SCAN_START: u32 = 1 << 5;
pub(crate) const BIT_SCAN_RUNNING: u32 = 1 << 6;
pub(crate) const BIT_SCAN_DONE: u32 = 1 << 7;
pub(crate) const BIT_WPS_SUCCESS: u32 = 1 << 8;
pub(crate) const BIT_WPS_FAILED: u32 = 1 << 9;
/// Wakes the worker task for teardown. Not part of the radio event set.
pub(crate) const BIT_SHUTDOWN: u32 = 1 << 10;

pub(crate) const BITS_WPS: u32 = BIT_WPS_SUCCESS | BIT_WPS_FAILED;

/// Asynchronous events delivered by the radio driver and IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// A scan finished; `ok` carries the radio's completion status.
    ScanDone { ok: bool },
    StaStart,
    StaStop,
    StaConnected,
    StaDisconnected,
    StaGotIp,
    StaLostIp,
    ApStart,
    ApStop,
    WpsSuccess,
    WpsFailed,
    WpsTimeout,
    WpsPin,
}

/// Latched flag group with atomic updates and condvar-backed waiting.
pub(crate) struct EventFlags {
    bits: AtomicU32,
    guard: Mutex<()>,
    cond: Condvar,
}

impl EventFlags {
    pub(crate) fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            guard: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Coherent snapshot of the whole mask.
    pub(crate) fn get(&self) -> u32 {
        self.bits.load(Ordering::SeqCst)
    }

    pub(crate) fn is_set(&self, mask: u32) -> bool {
        self.get() & mask != 0
    }

    pub(crate) fn set(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::SeqCst);
        // Taking the guard pairs the notify with the waiter's re-check.
        let _guard = self.guard.lock().unwrap();
        self.cond.notify_all();
    }

    pub(crate) fn clear(&self, mask: u32) {
        self.bits.fetch_and(!mask, Ordering::SeqCst);
    }

    /// Block until any bit of `mask` is set; returns the full snapshot.
    pub(crate) fn wait_any(&self, mask: u32) -> u32 {
        let mut guard = self.guard.lock().unwrap();
        loop {
            let bits = self.bits.load(Ordering::SeqCst);
            if bits & mask != 0 {
                return bits;
            }
            guard = self.cond.wait(guard).unwrap();
        }
    }

    /// Fold one radio/IP event into the flag set. Returns true when the
    /// mask changed, which is the caller's cue to wake the state machine.
    pub(crate) fn ingest(&self, event: NetEvent) -> bool {
        let old = self.get();

        match event {
            NetEvent::ScanDone { ok } => {
                if ok {
                    self.set(BIT_SCAN_DONE);
                }
                self.clear(BIT_SCAN_START);
            }
            NetEvent::StaStart => self.set(BIT_STA_START),
            NetEvent::StaStop => self.clear(BIT_STA_START),
            NetEvent::StaConnected => self.set(BIT_STA_CONNECTED),
            NetEvent::StaDisconnected => self.clear(BIT_STA_CONNECTED),
            NetEvent::StaGotIp => self.set(BIT_STA_GOT_IP),
            NetEvent::StaLostIp => self.clear(BIT_STA_GOT_IP),
            NetEvent::ApStart => self.set(BIT_AP_START),
            NetEvent::ApStop => self.clear(BIT_AP_START),
            NetEvent::WpsSuccess => self.set(BIT_WPS_SUCCESS),
            NetEvent::WpsFailed | NetEvent::WpsTimeout | NetEvent::WpsPin => {
                self.set(BIT_WPS_FAILED)
            }
        }

        old != self.get()
    }
}
