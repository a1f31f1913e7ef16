//! Scriptable implementations of the capability traits for driving the
//! manager without hardware.
#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use esp_wmngr::{
    ApConfig, ApRecord, AuthMode, DhcpStatus, Error, EventCallback, InitConfig, Interface,
    IpAdapter, NetEvent, Passphrase, RadioDriver, Result, ScanParams, Ssid, StaConfig, Timing,
    WifiConfig, WifiManager, WifiMode, WmState, WpsConfig,
};

pub struct RadioState {
    pub mode: WifiMode,
    pub ap_cfg: ApConfig,
    pub sta_cfg: StaConfig,
    pub started: bool,
    pub storage_volatile: bool,
    pub restore_calls: u32,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub scan_requests: u32,
    pub scan_results: Vec<ApRecord>,
    pub wps_enabled: bool,
    pub wps_running: bool,
    pub callback: Option<EventCallback>,
    pub fail_get_mode: bool,
    pub fail_sta_config: bool,
    pub fail_wps_enable: bool,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            mode: WifiMode::ApSta,
            ap_cfg: ApConfig::default(),
            sta_cfg: StaConfig::default(),
            started: false,
            storage_volatile: false,
            restore_calls: 0,
            connect_calls: 0,
            disconnect_calls: 0,
            scan_requests: 0,
            scan_results: Vec::new(),
            wps_enabled: false,
            wps_running: false,
            callback: None,
            fail_get_mode: false,
            fail_sta_config: false,
            fail_wps_enable: false,
        }
    }
}

/// Mock radio. Cloning yields another handle onto the same state, so a test
/// can keep inspecting and scripting the radio after handing a handle to the
/// manager.
#[derive(Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap()
    }

    /// Deliver an event the way the radio stack would.
    pub fn emit(&self, event: NetEvent) {
        let callback = self.state().callback.clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    /// The radio received credentials over WPS, stored them, and reports
    /// success.
    pub fn complete_wps(&self, ssid: &str, passphrase: &str) {
        self.state().sta_cfg = sta(ssid, passphrase);
        self.emit(NetEvent::WpsSuccess);
    }
}

impl RadioDriver for MockRadio {
    fn set_storage_volatile(&mut self) -> Result<()> {
        self.state().storage_volatile = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        self.state().restore_calls += 1;
        Ok(())
    }

    fn set_mode(&mut self, mode: WifiMode) -> Result<()> {
        self.state().mode = mode;
        Ok(())
    }

    fn get_mode(&self) -> Result<WifiMode> {
        let state = self.state();
        if state.fail_get_mode {
            return Err(Error::Io);
        }
        Ok(state.mode)
    }

    fn set_ap_config(&mut self, cfg: &ApConfig) -> Result<()> {
        self.state().ap_cfg = cfg.clone();
        Ok(())
    }

    fn set_sta_config(&mut self, cfg: &StaConfig) -> Result<()> {
        let mut state = self.state();
        if state.fail_sta_config {
            return Err(Error::Io);
        }
        state.sta_cfg = cfg.clone();
        Ok(())
    }

    fn get_ap_config(&self) -> Result<ApConfig> {
        Ok(self.state().ap_cfg.clone())
    }

    fn get_sta_config(&self) -> Result<StaConfig> {
        Ok(self.state().sta_cfg.clone())
    }

    fn start(&mut self) -> Result<()> {
        self.state().started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state().started = false;
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        self.state().connect_calls += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        // The real driver posts a disconnected event when an association is
        // torn down; emit it outside the state lock.
        let callback = {
            let mut state = self.state();
            state.disconnect_calls += 1;
            state.callback.clone()
        };
        if let Some(callback) = callback {
            callback(NetEvent::StaDisconnected);
        }
        Ok(())
    }

    fn scan_start(&mut self, _params: &ScanParams) -> Result<()> {
        self.state().scan_requests += 1;
        Ok(())
    }

    fn scan_stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn scan_count(&self) -> Result<usize> {
        Ok(self.state().scan_results.len())
    }

    fn scan_records(&mut self, max: usize) -> Result<Vec<ApRecord>> {
        let state = self.state();
        Ok(state.scan_results.iter().take(max).cloned().collect())
    }

    fn wps_enable(&mut self, _cfg: &WpsConfig) -> Result<()> {
        let mut state = self.state();
        if state.fail_wps_enable {
            return Err(Error::Io);
        }
        state.wps_enabled = true;
        Ok(())
    }

    fn wps_start(&mut self) -> Result<()> {
        self.state().wps_running = true;
        Ok(())
    }

    fn wps_disable(&mut self) -> Result<()> {
        let mut state = self.state();
        state.wps_enabled = false;
        state.wps_running = false;
        Ok(())
    }

    fn subscribe(&mut self, callback: EventCallback) -> Result<()> {
        self.state().callback = Some(callback);
        Ok(())
    }
}

pub struct IpState {
    pub dhcp_sta: DhcpStatus,
    pub dns: [Option<Ipv4Addr>; 3],
    pub dhcp_starts: u32,
    pub dhcp_stops: u32,
}

impl Default for IpState {
    fn default() -> Self {
        Self {
            dhcp_sta: DhcpStatus::Started,
            dns: [None; 3],
            dhcp_starts: 0,
            dhcp_stops: 0,
        }
    }
}

/// Mock IP adapter; clones share state like [`MockRadio`].
#[derive(Clone, Default)]
pub struct MockIp {
    state: Arc<Mutex<IpState>>,
}

impl MockIp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, IpState> {
        self.state.lock().unwrap()
    }
}

impl IpAdapter for MockIp {
    fn dhcpc_start(&mut self, iface: Interface) -> Result<()> {
        if iface == Interface::Sta {
            let mut state = self.state();
            state.dhcp_sta = DhcpStatus::Started;
            state.dhcp_starts += 1;
        }
        Ok(())
    }

    fn dhcpc_stop(&mut self, iface: Interface) -> Result<()> {
        if iface == Interface::Sta {
            let mut state = self.state();
            state.dhcp_sta = DhcpStatus::Stopped;
            state.dhcp_stops += 1;
        }
        Ok(())
    }

    fn dhcpc_status(&self, iface: Interface) -> Result<DhcpStatus> {
        match iface {
            Interface::Sta => Ok(self.state().dhcp_sta),
            Interface::Ap => Ok(DhcpStatus::Started),
        }
    }

    fn set_dns(&mut self, _iface: Interface, slot: usize, addr: Ipv4Addr) -> Result<()> {
        let mut state = self.state();
        let Some(entry) = state.dns.get_mut(slot) else {
            return Err(Error::InvalidArg);
        };
        *entry = Some(addr);
        Ok(())
    }

    fn get_dns(&self, _iface: Interface, slot: usize) -> Result<Option<Ipv4Addr>> {
        self.state().dns.get(slot).copied().ok_or(Error::InvalidArg)
    }
}

/// Timings shrunk far enough that a full transition settles in milliseconds
/// while the fall-back deadline stays out of the way.
pub fn fast_timing() -> Timing {
    Timing {
        cfg_timeout: Duration::from_secs(2),
        cfg_ticks: Duration::from_millis(25),
        cfg_delay: Duration::from_millis(5),
    }
}

pub fn fast_init() -> InitConfig {
    InitConfig {
        timing: fast_timing(),
        ..InitConfig::default()
    }
}

pub fn sta(ssid: &str, passphrase: &str) -> StaConfig {
    StaConfig {
        ssid: Ssid::try_from(ssid).unwrap(),
        passphrase: Passphrase::try_from(passphrase).unwrap(),
        bssid: None,
    }
}

/// STA-only config that wants to join `ssid`.
pub fn sta_cfg(ssid: &str, passphrase: &str) -> WifiConfig {
    WifiConfig {
        mode: WifiMode::Sta,
        sta: sta(ssid, passphrase),
        sta_connect: true,
        ..WifiConfig::default()
    }
}

pub fn ap_record(ssid: &str, channel: u8, rssi: i8) -> ApRecord {
    ApRecord {
        ssid: Ssid::try_from(ssid).unwrap(),
        bssid: [2, 0, 0, 0, 0, channel],
        channel,
        rssi,
        auth_mode: AuthMode::Wpa2Psk,
    }
}

/// Poll until the manager reports `state`.
pub fn wait_for_state(manager: &WifiManager, state: WmState, timeout: Duration) -> bool {
    wait_until(timeout, || manager.get_state() == state)
}

pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
