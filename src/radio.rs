//! Capability surfaces consumed by the manager.
//!
//! The radio driver and the IP-stack adapter are external collaborators; the
//! manager only depends on the operations below. Platform crates implement
//! these traits on top of their WiFi stack, the test suite implements them
//! with scriptable mocks.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::config::{ApConfig, StaConfig, WifiMode};
use crate::error::Result;
use crate::events::NetEvent;
use crate::scan::ApRecord;

/// Callback invoked by the driver for every radio/IP event. Must be cheap
/// and must never block: it runs in the driver's event context.
pub type EventCallback = Arc<dyn Fn(NetEvent) + Send + Sync>;

/// Interface selector for IP-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Ap,
    Sta,
}

/// DHCP client state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpStatus {
    Init,
    Started,
    Stopped,
}

/// Parameters for a scan request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanParams {
    /// Include hidden networks in the results.
    pub show_hidden: bool,
    /// Passive instead of active probing.
    pub passive: bool,
}

/// WPS credential exchange variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WpsKind {
    /// Push-button.
    #[default]
    Pbc,
    Pin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WpsConfig {
    pub kind: WpsKind,
}

/// Operations the manager needs from the radio.
///
/// All methods are synchronous; long-running work (scans, WPS, association)
/// completes through [`NetEvent`]s delivered to the subscribed callback.
pub trait RadioDriver: Send {
    /// Pin driver-internal persistence to volatile storage. The manager owns
    /// NVS; the driver must not write its own copy of the config.
    fn set_storage_volatile(&mut self) -> Result<()>;

    /// Reset internal config to driver defaults.
    fn restore(&mut self) -> Result<()>;

    fn set_mode(&mut self, mode: WifiMode) -> Result<()>;
    fn get_mode(&self) -> Result<WifiMode>;

    fn set_ap_config(&mut self, cfg: &ApConfig) -> Result<()>;
    fn set_sta_config(&mut self, cfg: &StaConfig) -> Result<()>;
    fn get_ap_config(&self) -> Result<ApConfig>;
    fn get_sta_config(&self) -> Result<StaConfig>;

    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;

    /// Kick off an asynchronous scan; completion arrives as
    /// [`NetEvent::ScanDone`].
    fn scan_start(&mut self, params: &ScanParams) -> Result<()>;
    fn scan_stop(&mut self) -> Result<()>;
    /// Number of records the completed scan produced.
    fn scan_count(&self) -> Result<usize>;
    /// Fetch at most `max` records; consumes the driver-side result set.
    fn scan_records(&mut self, max: usize) -> Result<Vec<ApRecord>>;

    fn wps_enable(&mut self, cfg: &WpsConfig) -> Result<()>;
    fn wps_start(&mut self) -> Result<()>;
    fn wps_disable(&mut self) -> Result<()>;

    /// Register the event callback. The driver must deliver every event to
    /// it for the lifetime of the subscription.
    fn subscribe(&mut self, callback: EventCallback) -> Result<()>;
}

/// Operations the manager needs from the IP stack.
pub trait IpAdapter: Send {
    fn dhcpc_start(&mut self, iface: Interface) -> Result<()>;
    fn dhcpc_stop(&mut self, iface: Interface) -> Result<()>;
    fn dhcpc_status(&self, iface: Interface) -> Result<DhcpStatus>;

    /// Program one static DNS slot.
    fn set_dns(&mut self, iface: Interface, slot: usize, addr: Ipv4Addr) -> Result<()>;
    fn get_dns(&self, iface: Interface, slot: usize) -> Result<Option<Ipv4Addr>>;
}
