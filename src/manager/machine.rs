//! The configuration state machine.
//!
//! [`step`] performs at most one transition per invocation. It is driven by
//! the wake-up timer (or the worker task) and keeps re-arming the wake-up
//! until the machine reaches a stable state. It takes its information from
//! the shared config state and tries to bring the radio to the configuration
//! in `new_cfg`; if things go wrong it falls back to the configuration in
//! `saved`. This minimises the risk of users locking themselves out of the
//! device by setting wrong credentials in STA-only mode.

use std::sync::{Arc, TryLockError};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::config::{StaConfig, WifiConfig, WifiMode, MAX_AP_CLIENTS, MAX_DNS_SERVERS};
use crate::error::Result;
use crate::events::{
    BITS_WPS, BIT_SCAN_DONE, BIT_SCAN_RUNNING, BIT_SCAN_START, BIT_STA_CONNECTED, BIT_WPS_FAILED,
    BIT_WPS_SUCCESS,
};
use crate::nvs::save_config;
use crate::radio::{DhcpStatus, Interface, ScanParams, WpsConfig};
use crate::scan::{ScanData, MAX_NUM_APS};

use super::{CfgInner, Shared, WmState};

/// Run one step of the state machine.
///
/// Lock acquisition is non-blocking: on contention the step re-arms a short
/// wake-up and returns, so the machine can never deadlock against a public
/// operation holding the lock.
pub(crate) fn step(shared: &Shared) {
    let mut inner = match shared.inner.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            shared.timer.arm(shared.timing.cfg_delay);
            return;
        }
        Err(TryLockError::Poisoned(_)) => panic!("config state lock poisoned"),
    };

    let raw = shared.raw_state();
    let Some(state) = WmState::from_u8(raw) else {
        error!("manager: Illegal state: {:#x}", raw);
        shared.set_state(WmState::Failed);
        return;
    };

    debug!("manager: Handling state: {}", state);

    let connected = shared.flags.is_set(BIT_STA_CONNECTED);
    let events = shared.flags.get();
    let now = Instant::now();

    if inner.radio.get_mode().is_err() {
        error!("manager: Error fetching WiFi mode.");
        shared.set_state(WmState::Failed);
        return;
    }

    let mut delay = match state {
        WmState::WpsStart => wps_start(shared, &mut inner, now),
        WmState::WpsActive => wps_active(shared, &mut inner, now, events),
        WmState::Update => update(shared, &mut inner, now),
        WmState::Connecting => connecting(shared, &mut inner, now, connected),
        WmState::Connected => check_connection(shared, connected),
        WmState::Fallback => fallback(shared, &mut inner),
        // Reserved, never entered.
        WmState::Disconnecting => Duration::ZERO,
        WmState::Idle | WmState::Failed => Duration::ZERO,
    };

    if shared.get_state().is_stable() {
        let events = shared.flags.get();
        if events & BIT_SCAN_START != 0 {
            scan_start(shared, &mut inner);
        } else if events & BIT_SCAN_DONE != 0 {
            scan_done(shared, &mut inner, now);
        }

        // Re-check: any scan work still pending gets the machine woken soon.
        if shared.flags.is_set(BIT_SCAN_START | BIT_SCAN_DONE) {
            delay = shared.timing.cfg_delay;
        }
    }

    drop(inner);

    if delay > Duration::ZERO {
        // Still in a transitional state, re-arm the wake-up.
        shared.timer.arm(delay);
    }

    debug!(
        "manager: Leaving step. State: {} delay: {:?}",
        shared.get_state(),
        delay
    );
}

/// Start changing the radio over to `new_cfg`.
fn update(shared: &Shared, inner: &mut CfgInner, now: Instant) -> Duration {
    info!("manager: Setting new configuration.");

    let _ = inner.radio.scan_stop();
    let _ = inner.radio.disconnect();

    inner.new_cfg.ap.max_clients = MAX_AP_CLIENTS;
    let cfg = inner.new_cfg.clone();
    if apply_config(inner, &cfg).is_err() {
        shared.set_state(WmState::Fallback);
        return shared.timing.cfg_delay;
    }

    if cfg.mode == WifiMode::Ap || !cfg.sta_connect {
        // AP-only mode or not connecting, we are done.
        shared.set_state(WmState::Idle);
        Duration::ZERO
    } else {
        // The radio should now associate with the target AP.
        inner.cfg_timestamp = now;
        shared.set_state(WmState::Connecting);
        shared.timing.cfg_ticks
    }
}

/// Wait for the association the update kicked off.
fn connecting(shared: &Shared, inner: &mut CfgInner, now: Instant, connected: bool) -> Duration {
    if connected {
        info!("manager: Established connection to AP.");
        let cfg = inner.new_cfg.clone();
        {
            let mut nvs = shared.nvs.lock().unwrap();
            if save_config(&mut **nvs, &cfg).is_err() {
                error!("manager: Saving config failed.");
            }
        }
        // Persisted before the state becomes observable: a caller that sees
        // Connected can rely on the stored config matching what it set.
        shared.set_state(WmState::Connected);
        Duration::ZERO
    } else if now >= inner.cfg_timestamp + shared.timing.cfg_timeout {
        info!("manager: Timed out waiting for connection to AP.");
        shared.set_state(WmState::Fallback);
        shared.timing.cfg_delay
    } else {
        // Keep waiting for the connection.
        shared.timing.cfg_ticks
    }
}

/// Tear down any association and start WPS in clean AP+STA mode.
fn wps_start(shared: &Shared, inner: &mut CfgInner, now: Instant) -> Duration {
    info!("manager: Starting WPS.");

    inner.new_cfg = match read_back_config(shared, inner) {
        Ok(cfg) => cfg,
        Err(_) => {
            error!("manager: WPS start: Error getting current config.");
            shared.set_state(WmState::Fallback);
            return shared.timing.cfg_delay;
        }
    };
    inner.new_cfg.sta = StaConfig::default();
    inner.new_cfg.mode = WifiMode::ApSta;
    inner.new_cfg.sta_connect = false;

    let cfg = inner.new_cfg.clone();
    if apply_config(inner, &cfg).is_err() {
        error!("manager: WPS start: Error setting temp config.");
        shared.set_state(WmState::Fallback);
        return shared.timing.cfg_delay;
    }

    // Clear previous results and start WPS.
    shared.flags.clear(BITS_WPS);
    if let Err(err) = inner.radio.wps_enable(&WpsConfig::default()) {
        error!("manager: Enabling WPS failed: {}", err);
        shared.set_state(WmState::Fallback);
        return shared.timing.cfg_delay;
    }
    if let Err(err) = inner.radio.wps_start() {
        error!("manager: Starting WPS failed: {}", err);
        shared.set_state(WmState::Fallback);
        return shared.timing.cfg_delay;
    }

    inner.cfg_timestamp = now;
    shared.set_state(WmState::WpsActive);
    shared.timing.cfg_ticks
}

/// WPS is running; watch for its outcome or the deadline.
fn wps_active(shared: &Shared, inner: &mut CfgInner, now: Instant, events: u32) -> Duration {
    if events & BIT_WPS_SUCCESS != 0 {
        info!("manager: WPS success.");
        if let Err(err) = inner.radio.wps_disable() {
            error!("manager: Disabling WPS failed: {}", err);
        }

        // Pick up the credentials the radio received. Best-effort on
        // purpose: if the read-back fails, the temporary WPS config stays in
        // `new_cfg` and the update path applies that instead.
        if let Ok(cfg) = read_back_config(shared, inner) {
            inner.new_cfg = cfg;
        }
        inner.new_cfg.mode = WifiMode::ApSta;
        inner.new_cfg.sta_connect = true;
        shared.set_state(WmState::Update);
        shared.timing.cfg_delay
    } else if now >= inner.cfg_timestamp + shared.timing.cfg_timeout
        || events & BIT_WPS_FAILED != 0
    {
        info!("manager: WPS failed, restoring saved config.");
        if let Err(err) = inner.radio.wps_disable() {
            error!("manager: Disabling WPS failed: {}", err);
        }
        shared.set_state(WmState::Fallback);
        shared.timing.cfg_delay
    } else {
        // Still waiting, set up the next check.
        shared.timing.cfg_ticks
    }
}

/// Restore the previously known-good configuration.
fn fallback(shared: &Shared, inner: &mut CfgInner) -> Duration {
    info!("manager: Falling back to previous configuration.");

    let _ = inner.radio.disconnect();
    let cfg = inner.saved.clone();
    if let Err(err) = apply_config(inner, &cfg) {
        // Already in the safety path, nowhere further to escalate.
        error!("manager: Applying saved config failed: {}", err);
    }
    shared.set_state(WmState::Failed);
    Duration::ZERO
}

/// Detect a lost association while nominally connected.
fn check_connection(shared: &Shared, connected: bool) -> Duration {
    if !connected {
        info!("manager: Connection to AP lost, retrying.");
        shared.set_state(WmState::Update);
        shared.timing.cfg_delay
    } else {
        Duration::ZERO
    }
}

/// Push a configuration to the radio.
///
/// `current` tracks what the radio gets told even when parts fail: the same
/// path serves the fall-back mechanism, where aborting halfway would leave
/// even less to reason about. Every failure is logged; the first one is
/// reported, except a DNS programming error which aborts immediately.
pub(super) fn apply_config(inner: &mut CfgInner, cfg: &WifiConfig) -> Result<()> {
    debug!("manager: Applying configuration.");

    let mut cfg = cfg.clone();
    cfg.ap.max_clients = MAX_AP_CLIENTS;
    inner.current = cfg.clone();

    let mut result = Ok(());

    if let Err(err) = inner.radio.restore() {
        error!("manager: Radio restore failed: {}", err);
        result = result.and(Err(err));
    }
    if let Err(err) = inner.radio.set_mode(cfg.mode) {
        error!("manager: Setting WiFi mode failed: {}", err);
        result = result.and(Err(err));
    }

    if cfg.mode.has_ap() {
        if let Err(err) = inner.radio.set_ap_config(&cfg.ap) {
            error!("manager: Setting AP config failed: {}", err);
            result = result.and(Err(err));
        }
    }

    if cfg.mode.has_sta() {
        if let Err(err) = inner.radio.set_sta_config(&cfg.sta) {
            error!("manager: Setting STA config failed: {}", err);
            result = result.and(Err(err));
        }
        if cfg.sta_static {
            let _ = inner.ip.dhcpc_stop(Interface::Sta);
            for (slot, dns) in cfg.sta_dns.iter().enumerate() {
                let Some(addr) = dns else { continue };
                if let Err(err) = inner.ip.set_dns(Interface::Sta, slot, *addr) {
                    error!("manager: Setting DNS server IP failed.");
                    return result.and(Err(err));
                }
            }
        } else {
            let _ = inner.ip.dhcpc_start(Interface::Sta);
        }
    }

    if let Err(err) = inner.radio.start() {
        error!("manager: Starting WiFi failed: {}", err);
        result = result.and(Err(err));
    }

    if cfg.sta_connect && cfg.mode.has_sta() {
        if let Err(err) = inner.radio.connect() {
            error!("manager: Connecting failed: {}", err);
            result = result.and(Err(err));
        }
    }

    result
}

/// Snapshot the configuration the radio currently runs.
///
/// `ap_ip`/`sta_ip` are not recoverable from the radio and stay at their
/// defaults.
pub(super) fn read_back_config(shared: &Shared, inner: &mut CfgInner) -> Result<WifiConfig> {
    let mut cfg = WifiConfig {
        sta_connect: shared.flags.is_set(BIT_STA_CONNECTED),
        ..WifiConfig::default()
    };

    cfg.mode = match inner.radio.get_mode() {
        Ok(mode) => mode,
        Err(err) => {
            error!("manager: Error fetching WiFi mode.");
            return Err(err);
        }
    };
    cfg.sta = match inner.radio.get_sta_config() {
        Ok(sta) => sta,
        Err(err) => {
            error!("manager: Error fetching STA config.");
            return Err(err);
        }
    };

    let dhcp = match inner.ip.dhcpc_status(Interface::Sta) {
        Ok(status) => status,
        Err(err) => {
            error!("manager: Error fetching DHCP status.");
            return Err(err);
        }
    };
    if dhcp == DhcpStatus::Stopped {
        cfg.sta_static = true;
        for slot in 0..MAX_DNS_SERVERS {
            cfg.sta_dns[slot] = match inner.ip.get_dns(Interface::Sta, slot) {
                Ok(addr) => addr,
                Err(err) => {
                    error!("manager: Getting DNS server IP failed.");
                    return Err(err);
                }
            };
        }
    }

    cfg.ap = match inner.radio.get_ap_config() {
        Ok(ap) => ap,
        Err(err) => {
            error!("manager: Error fetching AP config.");
            return Err(err);
        }
    };

    Ok(cfg)
}

/// Issue a pending scan request. Only called while the config is stable.
fn scan_start(shared: &Shared, inner: &mut CfgInner) {
    // Config has settled, drop the request flag. It gets set again below
    // once the scan is actually issued, and cleared by the scan-done event.
    shared.flags.clear(BIT_SCAN_START);

    let mode = match inner.radio.get_mode() {
        Ok(mode) => mode,
        Err(_) => {
            error!("manager: Error fetching WiFi mode.");
            return;
        }
    };
    if !mode.has_sta() {
        error!("manager: Invalid WiFi mode for scanning.");
        return;
    }

    if shared.flags.is_set(BIT_SCAN_RUNNING | BIT_SCAN_DONE) {
        info!("manager: Scan already running.");
        return;
    }

    info!("manager: Starting scan.");
    let params = ScanParams {
        show_hidden: true,
        passive: false,
    };
    shared.flags.set(BIT_SCAN_START);
    match inner.radio.scan_start(&params) {
        Ok(()) => {
            info!("manager: Scan started.");
            shared.flags.set(BIT_SCAN_RUNNING);
        }
        Err(err) => {
            error!("manager: Starting AP scan failed: {}", err);
        }
    }
}

/// Fetch the finished scan and publish it as the new snapshot.
fn scan_done(shared: &Shared, inner: &mut CfgInner, now: Instant) {
    let num_aps = match inner.radio.scan_count() {
        Ok(num) if num > 0 => num,
        // Something went seriously wrong, no point in trying again.
        _ => {
            info!("manager: Scan error or empty scan result.");
            shared.flags.clear(BIT_SCAN_RUNNING | BIT_SCAN_DONE);
            return;
        }
    };

    // Limit the number of records to fetch. Prevents a possible DoS by
    // tricking us into allocating storage for a very large result set.
    let limit = num_aps.min(MAX_NUM_APS);
    if limit < num_aps {
        info!(
            "manager: Limiting AP records to {} (actually found {})",
            limit, num_aps
        );
    }

    let records = inner.radio.scan_records(limit);

    // Scan data has either been fetched or lost at this point, so clear the
    // flags regardless of the outcome.
    shared.flags.clear(BIT_SCAN_RUNNING | BIT_SCAN_DONE);

    let records = match records {
        Ok(records) => records,
        Err(err) => {
            error!("manager: Error getting scan results: {}", err);
            return;
        }
    };

    info!("manager: Scan done: found {} APs.", records.len());

    // Publish. Readers still holding the previous snapshot keep it alive;
    // replacing the slot only drops the manager's own reference.
    inner.scan_ref = Some(Arc::new(ScanData {
        tstamp: now,
        records,
    }));
}
