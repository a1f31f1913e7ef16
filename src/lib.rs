//! WiFi configuration manager for a single-radio embedded device.
//!
//! The manager owns the device's wireless radio, arbitrates between the
//! access-point and station roles, and presents a stateless request/response
//! surface on top of an inherently event-driven radio stack: callers ask it
//! to apply a configuration, start a scan, run WPS, connect or disconnect,
//! and the manager performs the multi-step asynchronous transition. A
//! successfully applied configuration is persisted; a failed one triggers a
//! fall-back to the last known-good configuration, so a mistyped passphrase
//! never leaves the device unreachable.
//!
//! The radio driver, the IP stack and the non-volatile store are consumed
//! through the [`radio::RadioDriver`], [`radio::IpAdapter`] and
//! [`nvs::NvsStore`] traits; platform crates provide the implementations.
//!
//! Most deployments use the process-wide singleton:
//!
//! ```ignore
//! esp_wmngr::init(radio, ip, nvs, InitConfig::default())?;
//! esp_wmngr::set_cfg(&cfg)?;
//! while !esp_wmngr::get_state().is_stable() { /* poll or sleep */ }
//! ```
//!
//! [`manager::WifiManager`] offers the same operations on an owned instance.

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod nvs;
pub mod radio;
pub mod scan;

pub use config::{
    ApConfig, AuthMode, IpInfo, Passphrase, Ssid, StaConfig, WifiConfig, WifiMode,
};
pub use error::{Error, Result};
pub use events::NetEvent;
pub use manager::{
    connect, disconnect, get_cfg, get_scan, get_state, init, is_connected, nvs_valid, set_cfg,
    start_scan, start_wps, DispatchMode, InitConfig, Timing, WifiManager, WmState,
};
pub use nvs::{MemNvs, NvsStore};
pub use radio::{DhcpStatus, EventCallback, Interface, IpAdapter, RadioDriver, ScanParams,
    WpsConfig, WpsKind};
pub use scan::{ApRecord, ScanData};
