//! Scan result snapshots.
//!
//! A completed scan is materialised into an immutable [`ScanData`] published
//! behind an `Arc`. The manager's slot holds one strong reference; every
//! reader that calls `get_scan` receives a clone and releases it by dropping
//! the `Arc`. Readers therefore keep their snapshot alive even after a newer
//! scan has replaced it.

use std::time::Instant;

use crate::config::{AuthMode, Ssid};

/// Upper bound on records fetched from the radio. Prevents a hostile
/// environment from tricking us into allocating storage for an unbounded
/// number of scan results.
pub const MAX_NUM_APS: usize = 32;

/// One access point seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRecord {
    pub ssid: Ssid,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i8,
    pub auth_mode: AuthMode,
}

/// An immutable set of AP scan data.
#[derive(Debug, Clone)]
pub struct ScanData {
    /// Monotonic timestamp at creation.
    pub tstamp: Instant,
    /// At most [`MAX_NUM_APS`] records.
    pub records: Vec<ApRecord>,
}

impl ScanData {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find a record by SSID.
    pub fn find(&self, ssid: &str) -> Option<&ApRecord> {
        self.records.iter().find(|ap| ap.ssid.as_str() == ssid)
    }
}
