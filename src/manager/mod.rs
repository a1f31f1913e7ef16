//! The WiFi manager: a stateless request/response surface over the
//! event-driven radio stack.
//!
//! Public operations record what should happen, arm a wake-up, and return;
//! the state machine in [`machine`] performs the multi-step transition
//! asynchronously and falls back to the last known-good configuration when
//! the requested one fails. Callers observe the outcome through
//! [`WifiManager::get_state`] eventually settling on a stable state.
//!
//! A process-wide singleton mirrors the embedded deployment (one radio, one
//! manager); the free functions at the bottom of this module target it.

mod dispatch;
mod machine;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info};
use once_cell::sync::Lazy;

use crate::config::{StaConfig, WifiConfig};
use crate::error::{Error, Result};
use crate::events::{EventFlags, NetEvent, BIT_SCAN_START, BIT_SHUTDOWN, BIT_STA_CONNECTED, BIT_TRIGGER};
use crate::nvs::{self, NvsStore};
use crate::radio::{EventCallback, IpAdapter, RadioDriver};
use crate::scan::ScanData;

pub use dispatch::DispatchMode;

/// States of the configuration machine.
///
/// The discriminants are part of the crate's persistent/diagnostic surface;
/// new states go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WmState {
    /// Applying a configuration failed; the previous one is active.
    Failed = 0,
    /// Associated with the target AP.
    Connected = 1,
    /// Configuration applied, no association wanted or pending.
    Idle = 2,
    /// A new configuration is about to be applied.
    Update = 3,
    /// WPS has been requested.
    WpsStart = 4,
    /// WPS is negotiating.
    WpsActive = 5,
    /// Waiting for the association to come up.
    Connecting = 6,
    /// Reserved.
    Disconnecting = 7,
    /// Restoring the last known-good configuration.
    Fallback = 8,
}

impl WmState {
    /// Stable states accept new requests; everything else is transitional
    /// and makes configuration-changing operations report busy.
    pub fn is_stable(self) -> bool {
        matches!(self, WmState::Failed | WmState::Connected | WmState::Idle)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WmState::Failed),
            1 => Some(WmState::Connected),
            2 => Some(WmState::Idle),
            3 => Some(WmState::Update),
            4 => Some(WmState::WpsStart),
            5 => Some(WmState::WpsActive),
            6 => Some(WmState::Connecting),
            7 => Some(WmState::Disconnecting),
            8 => Some(WmState::Fallback),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WmState::Failed => "Failed",
            WmState::Connected => "Connected",
            WmState::Idle => "Idle",
            WmState::Update => "Update",
            WmState::WpsStart => "WPS Start",
            WmState::WpsActive => "WPS Active",
            WmState::Connecting => "Connecting",
            WmState::Disconnecting => "Disconnecting",
            WmState::Fallback => "Fall Back",
        }
    }
}

impl fmt::Display for WmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Delays and deadlines of the state machine.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Deadline for a transitional state before falling back.
    pub cfg_timeout: Duration,
    /// Regular polling period while waiting on the radio.
    pub cfg_ticks: Duration,
    /// Short "act soon" delay; also the bounded lock wait of the public API.
    pub cfg_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            cfg_timeout: Duration::from_secs(60),
            cfg_ticks: Duration::from_secs(1),
            cfg_delay: Duration::from_millis(100),
        }
    }
}

/// Construction knobs for [`WifiManager::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitConfig {
    pub dispatch: DispatchMode,
    pub timing: Timing,
    /// Stack size of the worker task in [`DispatchMode::Task`]; 0 keeps the
    /// platform default.
    pub task_stack: usize,
}

/// Everything guarded by the config lock.
pub(crate) struct CfgInner {
    /// When the current transition began.
    pub(crate) cfg_timestamp: Instant,
    /// Last known-good configuration, target of the fall-back.
    pub(crate) saved: WifiConfig,
    /// What the radio was most recently told.
    pub(crate) current: WifiConfig,
    /// What the machine is trying to install.
    pub(crate) new_cfg: WifiConfig,
    /// Most recent published scan snapshot.
    pub(crate) scan_ref: Option<Arc<ScanData>>,
    pub(crate) radio: Box<dyn RadioDriver>,
    pub(crate) ip: Box<dyn IpAdapter>,
}

/// State shared between the public API, the wake-up thread and the worker.
pub(crate) struct Shared {
    pub(crate) inner: Mutex<CfgInner>,
    /// Mirror of the machine state, written with the lock held and readable
    /// without it.
    state: AtomicU8,
    pub(crate) flags: EventFlags,
    /// Own mutex so `nvs_valid` never touches the config lock.
    pub(crate) nvs: Mutex<Box<dyn NvsStore>>,
    pub(crate) timer: dispatch::WakeTimer,
    pub(crate) timing: Timing,
    pub(crate) dispatch: DispatchMode,
}

impl Shared {
    pub(crate) fn get_state(&self) -> WmState {
        WmState::from_u8(self.raw_state()).unwrap_or(WmState::Failed)
    }

    pub(crate) fn raw_state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// Only call with the config lock held (or before the driver threads
    /// exist).
    pub(crate) fn set_state(&self, state: WmState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Event callback body: fold the event into the flag group and, if anything
/// changed, wake the state machine. Deliberately never takes the config
/// lock — it races with the machine itself.
fn handle_event(shared: &Shared, event: NetEvent) {
    if shared.flags.ingest(event) {
        match shared.dispatch {
            DispatchMode::Task => shared.flags.set(BIT_TRIGGER),
            DispatchMode::Timer => shared.timer.arm(shared.timing.cfg_delay),
        }
    }
}

const LOCK_POLL: Duration = Duration::from_millis(1);

/// The WiFi configuration manager.
///
/// Owns the radio, the IP adapter and the persistent store. Dropping the
/// manager stops the wake-up and worker threads.
pub struct WifiManager {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WifiManager {
    /// Bring up the manager.
    ///
    /// Seeds the fall-back slot from the compiled-in defaults, loads the
    /// persisted configuration (defaults when absent or invalid), pins the
    /// driver's own storage to volatile, subscribes to radio events and
    /// starts the wake-up machinery. The first machine step then applies
    /// the loaded configuration.
    pub fn new(
        radio: Box<dyn RadioDriver>,
        ip: Box<dyn IpAdapter>,
        nvs: Box<dyn NvsStore>,
        init: InitConfig,
    ) -> Result<Self> {
        let saved = WifiConfig::compiled_defaults();
        let new_cfg = match nvs::load_config(&*nvs) {
            Ok(cfg) => cfg,
            Err(_) => {
                info!("manager: No saved config found, setting defaults.");
                WifiConfig::compiled_defaults()
            }
        };

        let shared = Arc::new(Shared {
            inner: Mutex::new(CfgInner {
                cfg_timestamp: Instant::now(),
                saved,
                current: WifiConfig::default(),
                new_cfg,
                scan_ref: None,
                radio,
                ip,
            }),
            state: AtomicU8::new(WmState::Update as u8),
            flags: EventFlags::new(),
            nvs: Mutex::new(nvs),
            timer: dispatch::WakeTimer::new(),
            timing: init.timing,
            dispatch: init.dispatch,
        });

        {
            let mut inner = shared.inner.lock().unwrap();
            // NVS is ours; the driver must not keep its own persistent copy
            // of the config.
            inner.radio.set_storage_volatile()?;

            let weak = Arc::downgrade(&shared);
            let callback: EventCallback = Arc::new(move |event| {
                if let Some(shared) = weak.upgrade() {
                    handle_event(&shared, event);
                }
            });
            inner.radio.subscribe(callback)?;
        }

        let mut threads = vec![dispatch::spawn_timer(Arc::clone(&shared))?];
        if init.dispatch == DispatchMode::Task {
            match dispatch::spawn_worker(Arc::clone(&shared), init.task_stack) {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    shared.timer.shutdown();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        shared.timer.arm(shared.timing.cfg_ticks);

        Ok(WifiManager { shared, threads })
    }

    /// Request a new configuration.
    ///
    /// The live configuration is backed up for fall-back and an asynchronous
    /// update is triggered. `Ok` is not an apply guarantee: the outcome is
    /// observed through [`get_state`](Self::get_state) eventually reaching
    /// `Connected`/`Idle` (success) or `Failed` (the device now runs the
    /// previous configuration again).
    pub fn set_cfg(&self, cfg: &WifiConfig) -> Result<()> {
        let mut inner = self.lock_inner()?;
        if !self.get_state().is_stable() {
            info!("manager: WiFi change in progress.");
            return Err(Error::InvalidState);
        }

        // Save the live configuration for fall-back.
        inner.saved = match machine::read_back_config(&self.shared, &mut inner) {
            Ok(saved) => saved,
            Err(err) => {
                info!("manager: Error fetching current WiFi config.");
                return Err(err);
            }
        };

        // Credentials we never connected with must not become the fall-back
        // target.
        if !self.is_connected() {
            inner.saved.sta = StaConfig::default();
        }

        inner.new_cfg = cfg.clone();
        inner.new_cfg.is_default = false;

        let mut update = inner.new_cfg.mode != inner.saved.mode;
        if inner.new_cfg.mode.has_ap() && inner.new_cfg.ap != inner.saved.ap {
            update = true;
        }
        if inner.new_cfg.mode.has_sta() && inner.new_cfg.sta != inner.saved.sta {
            update = true;
        }
        // A connect-flag flip alone must re-apply as well, otherwise
        // disconnect() would never tear the association down.
        if inner.new_cfg.sta_connect != inner.saved.sta_connect {
            update = true;
        }

        // Only an actual change triggers the asynchronous update. The delay
        // gives an HTTP handler time to send its reply before the radio is
        // torn down.
        if update {
            self.shared.set_state(WmState::Update);
            self.shared.timer.arm(self.shared.timing.cfg_delay);
        }

        Ok(())
    }

    /// Copy of the configuration most recently applied to the radio.
    pub fn get_cfg(&self) -> Result<WifiConfig> {
        let inner = self.lock_inner()?;
        if !self.get_state().is_stable() {
            info!("manager: WiFi change in progress.");
            return Err(Error::InvalidState);
        }
        Ok(inner.current.clone())
    }

    /// Trigger a connection attempt via WPS push-button.
    pub fn start_wps(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        if !self.get_state().is_stable() {
            info!("manager: WiFi change in progress.");
            return Err(Error::InvalidState);
        }

        info!("manager: Starting WPS.");

        // Save the live configuration for fall-back.
        inner.saved = match machine::read_back_config(&self.shared, &mut inner) {
            Ok(saved) => saved,
            Err(err) => {
                error!("manager: Error fetching WiFi config.");
                return Err(err);
            }
        };

        self.shared.set_state(WmState::WpsStart);
        self.shared.timer.arm(self.shared.timing.cfg_delay);
        Ok(())
    }

    /// Request an AP scan.
    ///
    /// Never rejected as busy: scanning starts as soon as the machine is in
    /// a stable state. Results are fetched with
    /// [`get_scan`](Self::get_scan).
    pub fn start_scan(&self) -> Result<()> {
        self.shared.flags.set(BIT_SCAN_START | BIT_TRIGGER);
        if self.shared.dispatch == DispatchMode::Timer {
            self.shared.timer.arm(self.shared.timing.cfg_delay);
        }
        Ok(())
    }

    /// Latest scan snapshot, if any. The snapshot stays alive for as long as
    /// the returned `Arc` is held, even when newer scans replace it.
    pub fn get_scan(&self) -> Option<Arc<ScanData>> {
        let inner = self.lock_inner().ok()?;
        inner.scan_ref.clone()
    }

    /// Connect to the currently configured AP.
    pub fn connect(&self) -> Result<()> {
        self.set_connect(true)
    }

    /// Disconnect from the currently configured AP. Re-applies the current
    /// configuration with the connect flag cleared, which tears down the
    /// association.
    pub fn disconnect(&self) -> Result<()> {
        self.set_connect(false)
    }

    fn set_connect(&self, connect: bool) -> Result<()> {
        let mut cfg = self.get_cfg()?;
        if !cfg.mode.has_sta() {
            return Err(Error::InvalidState);
        }
        cfg.sta_connect = connect;
        self.set_cfg(&cfg)
    }

    /// Current machine state. Never blocks.
    pub fn get_state(&self) -> WmState {
        self.shared.get_state()
    }

    /// True while the station is associated with an AP.
    pub fn is_connected(&self) -> bool {
        self.shared.flags.is_set(BIT_STA_CONNECTED)
    }

    /// True when the persistent store holds a complete valid configuration.
    pub fn nvs_valid(&self) -> bool {
        let store = self.shared.nvs.lock().unwrap();
        nvs::load_config(&**store).is_ok()
    }

    /// Acquire the config lock with a short bounded wait.
    fn lock_inner(&self) -> Result<MutexGuard<'_, CfgInner>> {
        let deadline = Instant::now() + self.shared.timing.cfg_delay;
        loop {
            match self.shared.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {}
                Err(TryLockError::Poisoned(_)) => panic!("config state lock poisoned"),
            }
            if Instant::now() >= deadline {
                error!("manager: Error taking mutex.");
                return Err(Error::Timeout);
            }
            thread::sleep(LOCK_POLL);
        }
    }
}

impl Drop for WifiManager {
    fn drop(&mut self) {
        self.shared.timer.shutdown();
        self.shared.flags.set(BIT_SHUTDOWN);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Process-wide singleton
// ============================================================================

static INSTANCE: Lazy<Mutex<Option<WifiManager>>> = Lazy::new(|| Mutex::new(None));

/// Initialise the process-wide manager. Fails with `InvalidState` when
/// already initialised.
pub fn init(
    radio: Box<dyn RadioDriver>,
    ip: Box<dyn IpAdapter>,
    nvs: Box<dyn NvsStore>,
    init: InitConfig,
) -> Result<()> {
    let mut slot = INSTANCE.lock().unwrap();
    if slot.is_some() {
        error!("manager: Already initialised.");
        return Err(Error::InvalidState);
    }
    *slot = Some(WifiManager::new(radio, ip, nvs, init)?);
    Ok(())
}

fn with<R>(f: impl FnOnce(&WifiManager) -> R) -> Result<R> {
    match INSTANCE.lock().unwrap().as_ref() {
        Some(manager) => Ok(f(manager)),
        None => Err(Error::InvalidState),
    }
}

/// [`WifiManager::set_cfg`] on the singleton.
pub fn set_cfg(cfg: &WifiConfig) -> Result<()> {
    with(|manager| manager.set_cfg(cfg))?
}

/// [`WifiManager::get_cfg`] on the singleton.
pub fn get_cfg() -> Result<WifiConfig> {
    with(|manager| manager.get_cfg())?
}

/// [`WifiManager::start_wps`] on the singleton.
pub fn start_wps() -> Result<()> {
    with(|manager| manager.start_wps())?
}

/// [`WifiManager::start_scan`] on the singleton.
pub fn start_scan() -> Result<()> {
    with(|manager| manager.start_scan())?
}

/// [`WifiManager::get_scan`] on the singleton.
pub fn get_scan() -> Option<Arc<ScanData>> {
    with(|manager| manager.get_scan()).ok().flatten()
}

/// [`WifiManager::connect`] on the singleton.
pub fn connect() -> Result<()> {
    with(|manager| manager.connect())?
}

/// [`WifiManager::disconnect`] on the singleton.
pub fn disconnect() -> Result<()> {
    with(|manager| manager.disconnect())?
}

/// [`WifiManager::get_state`] on the singleton; `Failed` when
/// uninitialised.
pub fn get_state() -> WmState {
    with(|manager| manager.get_state()).unwrap_or(WmState::Failed)
}

/// [`WifiManager::is_connected`] on the singleton.
pub fn is_connected() -> bool {
    with(|manager| manager.is_connected()).unwrap_or(false)
}

/// [`WifiManager::nvs_valid`] on the singleton.
pub fn nvs_valid() -> bool {
    with(|manager| manager.nvs_valid()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_transitional_partition() {
        let stable = [WmState::Failed, WmState::Connected, WmState::Idle];
        let transitional = [
            WmState::Update,
            WmState::WpsStart,
            WmState::WpsActive,
            WmState::Connecting,
            WmState::Disconnecting,
            WmState::Fallback,
        ];
        for state in stable {
            assert!(state.is_stable(), "{state} should be stable");
        }
        for state in transitional {
            assert!(!state.is_stable(), "{state} should be transitional");
        }
    }

    #[test]
    fn state_u8_roundtrip() {
        for value in 0..=8u8 {
            let state = WmState::from_u8(value).unwrap();
            assert_eq!(state as u8, value);
        }
        assert_eq!(WmState::from_u8(9), None);
    }

    #[test]
    fn state_names() {
        assert_eq!(WmState::Failed.to_string(), "Failed");
        assert_eq!(WmState::WpsActive.to_string(), "WPS Active");
        assert_eq!(WmState::Fallback.to_string(), "Fall Back");
    }
}
