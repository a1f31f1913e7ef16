//! Persistence adapter: fixed-layout records in a key-value store.
//!
//! Scalar fields (`mode`, `sta_static`, `sta_connect`) are stored as u32
//! values; aggregate fields (`ap`, `sta`, `ap_ip`, `sta_ip`, `sta_dns`) as
//! blobs with a fixed layout. A stored blob whose length differs from the
//! expected record size is treated as "no valid config" — the loader never
//! guesses.
//!
//! The save protocol erases the namespace before writing and erases it again
//! if any write fails, so the store always holds either a complete config or
//! nothing. The empty-store case is handled at boot by materialising the
//! compiled-in defaults.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use log::error;

use crate::config::{
    ApConfig, IpInfo, StaConfig, WifiConfig, WifiMode, MAX_DNS_SERVERS, MAX_PASSPHRASE_LEN,
    MAX_SSID_LEN,
};
use crate::error::{Error, Result};

/// Namespace all records live under.
pub const NVS_NAMESPACE: &str = "esp_wmngr";

pub const AP_BLOB_LEN: usize = MAX_SSID_LEN + 1 + MAX_PASSPHRASE_LEN + 1 + 3;
pub const STA_BLOB_LEN: usize = MAX_SSID_LEN + 1 + MAX_PASSPHRASE_LEN + 1 + 7;
pub const IP_BLOB_LEN: usize = 12;
pub const DNS_BLOB_LEN: usize = MAX_DNS_SERVERS * 5;

/// Typed key-value surface of the non-volatile store.
///
/// Backends map this onto their native storage (NVS on esp-idf, a file or
/// flash sector elsewhere). Missing keys report [`Error::NotFound`]; every
/// other failure is [`Error::Io`].
pub trait NvsStore: Send {
    fn get_u32(&self, key: &str) -> Result<u32>;
    fn set_u32(&mut self, key: &str, value: u32) -> Result<()>;
    fn get_blob(&self, key: &str) -> Result<Vec<u8>>;
    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()>;
    /// Remove every record in the namespace.
    fn erase_all(&mut self) -> Result<()>;
    /// Flush pending writes to stable storage.
    fn commit(&mut self) -> Result<()>;
}

/// Save a configuration.
///
/// The previously stored configuration is erased first and not recovered on
/// error, so on return the store holds either a complete valid config or no
/// config at all. This guarantees the device is either reachable by the last
/// valid configuration or recoverable through the factory defaults.
pub fn save_config(store: &mut dyn NvsStore, cfg: &WifiConfig) -> Result<()> {
    let result = save_fields(store, cfg);
    if result.is_err() {
        // Never leave a half-written config behind.
        error!("nvs: Writing config failed.");
        let _ = store.erase_all();
    }
    let _ = store.commit();
    result
}

fn save_fields(store: &mut dyn NvsStore, cfg: &WifiConfig) -> Result<()> {
    store.erase_all()?;
    store.commit()?;

    // No point in saving the factory default settings.
    if cfg.is_default {
        return Ok(());
    }

    store.set_u32("mode", cfg.mode.as_u32())?;
    store.set_u32("sta_static", cfg.sta_static as u32)?;
    store.set_u32("sta_connect", cfg.sta_connect as u32)?;
    store.set_blob("ap", &encode_ap(&cfg.ap))?;
    store.set_blob("sta", &encode_sta(&cfg.sta))?;
    store.set_blob("ap_ip", &encode_ip(&cfg.ap_ip))?;
    store.set_blob("sta_ip", &encode_ip(&cfg.sta_ip))?;
    store.set_blob("sta_dns", &encode_dns(&cfg.sta_dns))?;
    Ok(())
}

/// Load the stored configuration. Any missing or size-mismatched field makes
/// the whole record invalid.
pub fn load_config(store: &dyn NvsStore) -> Result<WifiConfig> {
    let mode = WifiMode::from_u32(store.get_u32("mode")?).ok_or(Error::NotFound)?;

    let cfg = WifiConfig {
        is_default: false,
        mode,
        sta_static: store.get_u32("sta_static")? != 0,
        sta_connect: store.get_u32("sta_connect")? != 0,
        ap: decode_ap(&store.get_blob("ap")?)?,
        sta: decode_sta(&store.get_blob("sta")?)?,
        ap_ip: decode_ip(&store.get_blob("ap_ip")?)?,
        sta_ip: decode_ip(&store.get_blob("sta_ip")?)?,
        sta_dns: decode_dns(&store.get_blob("sta_dns")?)?,
    };

    Ok(cfg)
}

fn encode_ap(ap: &ApConfig) -> [u8; AP_BLOB_LEN] {
    let mut out = [0u8; AP_BLOB_LEN];
    out[..ap.ssid.len()].copy_from_slice(ap.ssid.as_bytes());
    out[MAX_SSID_LEN] = ap.ssid.len() as u8;
    let pass = MAX_SSID_LEN + 1;
    out[pass..pass + ap.passphrase.len()].copy_from_slice(ap.passphrase.as_bytes());
    out[pass + MAX_PASSPHRASE_LEN] = ap.passphrase.len() as u8;
    out[AP_BLOB_LEN - 3] = ap.channel;
    out[AP_BLOB_LEN - 2] = ap.auth_mode.as_u8();
    out[AP_BLOB_LEN - 1] = ap.max_clients;
    out
}

fn decode_ap(blob: &[u8]) -> Result<ApConfig> {
    if blob.len() != AP_BLOB_LEN {
        return Err(Error::NotFound);
    }
    let pass = MAX_SSID_LEN + 1;
    Ok(ApConfig {
        ssid: decode_str(&blob[..MAX_SSID_LEN], blob[MAX_SSID_LEN])?,
        passphrase: decode_str(&blob[pass..pass + MAX_PASSPHRASE_LEN], blob[pass + MAX_PASSPHRASE_LEN])?,
        channel: blob[AP_BLOB_LEN - 3],
        auth_mode: crate::config::AuthMode::from_u8(blob[AP_BLOB_LEN - 2]).ok_or(Error::NotFound)?,
        max_clients: blob[AP_BLOB_LEN - 1],
    })
}

fn encode_sta(sta: &StaConfig) -> [u8; STA_BLOB_LEN] {
    let mut out = [0u8; STA_BLOB_LEN];
    out[..sta.ssid.len()].copy_from_slice(sta.ssid.as_bytes());
    out[MAX_SSID_LEN] = sta.ssid.len() as u8;
    let pass = MAX_SSID_LEN + 1;
    out[pass..pass + sta.passphrase.len()].copy_from_slice(sta.passphrase.as_bytes());
    out[pass + MAX_PASSPHRASE_LEN] = sta.passphrase.len() as u8;
    let bssid = pass + MAX_PASSPHRASE_LEN + 1;
    if let Some(addr) = sta.bssid {
        out[bssid..bssid + 6].copy_from_slice(&addr);
        out[STA_BLOB_LEN - 1] = 1;
    }
    out
}

fn decode_sta(blob: &[u8]) -> Result<StaConfig> {
    if blob.len() != STA_BLOB_LEN {
        return Err(Error::NotFound);
    }
    let pass = MAX_SSID_LEN + 1;
    let bssid_at = pass + MAX_PASSPHRASE_LEN + 1;
    let bssid = if blob[STA_BLOB_LEN - 1] != 0 {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&blob[bssid_at..bssid_at + 6]);
        Some(addr)
    } else {
        None
    };
    Ok(StaConfig {
        ssid: decode_str(&blob[..MAX_SSID_LEN], blob[MAX_SSID_LEN])?,
        passphrase: decode_str(&blob[pass..pass + MAX_PASSPHRASE_LEN], blob[pass + MAX_PASSPHRASE_LEN])?,
        bssid,
    })
}

fn encode_ip(info: &IpInfo) -> [u8; IP_BLOB_LEN] {
    let mut out = [0u8; IP_BLOB_LEN];
    out[0..4].copy_from_slice(&info.ip.octets());
    out[4..8].copy_from_slice(&info.netmask.octets());
    out[8..12].copy_from_slice(&info.gateway.octets());
    out
}

fn decode_ip(blob: &[u8]) -> Result<IpInfo> {
    if blob.len() != IP_BLOB_LEN {
        return Err(Error::NotFound);
    }
    let addr = |at: usize| Ipv4Addr::new(blob[at], blob[at + 1], blob[at + 2], blob[at + 3]);
    Ok(IpInfo {
        ip: addr(0),
        netmask: addr(4),
        gateway: addr(8),
    })
}

fn encode_dns(slots: &[Option<Ipv4Addr>; MAX_DNS_SERVERS]) -> [u8; DNS_BLOB_LEN] {
    let mut out = [0u8; DNS_BLOB_LEN];
    for (idx, slot) in slots.iter().enumerate() {
        if let Some(addr) = slot {
            let at = idx * 5;
            out[at..at + 4].copy_from_slice(&addr.octets());
            out[at + 4] = 1;
        }
    }
    out
}

fn decode_dns(blob: &[u8]) -> Result<[Option<Ipv4Addr>; MAX_DNS_SERVERS]> {
    if blob.len() != DNS_BLOB_LEN {
        return Err(Error::NotFound);
    }
    let mut slots = [None; MAX_DNS_SERVERS];
    for (idx, slot) in slots.iter_mut().enumerate() {
        let at = idx * 5;
        if blob[at + 4] != 0 {
            *slot = Some(Ipv4Addr::new(blob[at], blob[at + 1], blob[at + 2], blob[at + 3]));
        }
    }
    Ok(slots)
}

fn decode_str<const N: usize>(bytes: &[u8], len: u8) -> Result<heapless::String<N>> {
    let len = len as usize;
    if len > N {
        return Err(Error::NotFound);
    }
    let text = core::str::from_utf8(&bytes[..len]).map_err(|_| Error::NotFound)?;
    heapless::String::try_from(text).map_err(|_| Error::NotFound)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    U32(u32),
    Blob(Vec<u8>),
}

/// In-memory [`NvsStore`]. Cloning yields another handle onto the same
/// storage, which lets a test or host binary inspect what the manager wrote.
#[derive(Clone, Default)]
pub struct MemNvs {
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl MemNvs {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the namespace holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}

impl NvsStore for MemNvs {
    fn get_u32(&self, key: &str) -> Result<u32> {
        match self.records.lock().unwrap().get(key) {
            Some(Record::U32(value)) => Ok(*value),
            _ => Err(Error::NotFound),
        }
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_owned(), Record::U32(value));
        Ok(())
    }

    fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
        match self.records.lock().unwrap().get(key) {
            Some(Record::Blob(data)) => Ok(data.clone()),
            _ => Err(Error::NotFound),
        }
    }

    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(key.to_owned(), Record::Blob(data.to_vec()));
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, Passphrase, Ssid};

    fn sample_config() -> WifiConfig {
        let mut cfg = WifiConfig::default();
        cfg.mode = WifiMode::ApSta;
        cfg.ap.ssid = Ssid::try_from("device-ap").unwrap();
        cfg.ap.passphrase = Passphrase::try_from("hunter22").unwrap();
        cfg.ap.channel = 11;
        cfg.ap.auth_mode = AuthMode::Wpa2Psk;
        cfg.ap.max_clients = 3;
        cfg.ap_ip = IpInfo {
            ip: Ipv4Addr::new(192, 168, 4, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 4, 1),
        };
        cfg.sta.ssid = Ssid::try_from("home").unwrap();
        cfg.sta.passphrase = Passphrase::try_from("secret").unwrap();
        cfg.sta.bssid = Some([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        cfg.sta_static = true;
        cfg.sta_ip = IpInfo {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
        };
        cfg.sta_dns = [Some(Ipv4Addr::new(9, 9, 9, 9)), None, Some(Ipv4Addr::new(1, 1, 1, 1))];
        cfg.sta_connect = true;
        cfg
    }

    #[test]
    fn save_then_load_roundtrips_every_field() {
        let mut store = MemNvs::new();
        let cfg = sample_config();
        save_config(&mut store, &cfg).unwrap();
        let loaded = load_config(&store).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn default_config_leaves_store_empty() {
        let mut store = MemNvs::new();
        // Populate first to prove the save erases it.
        save_config(&mut store, &sample_config()).unwrap();
        let mut cfg = WifiConfig::compiled_defaults();
        cfg.sta_connect = true;
        save_config(&mut store, &cfg).unwrap();
        assert!(store.is_empty());
        assert_eq!(load_config(&store), Err(Error::NotFound));
    }

    #[test]
    fn blob_length_mismatch_is_not_found() {
        let mut store = MemNvs::new();
        save_config(&mut store, &sample_config()).unwrap();

        let mut tampered = store.get_blob("sta").unwrap();
        tampered.pop();
        store.set_blob("sta", &tampered).unwrap();

        assert_eq!(load_config(&store), Err(Error::NotFound));
    }

    #[test]
    fn missing_field_is_not_found() {
        let store = MemNvs::new();
        assert_eq!(load_config(&store), Err(Error::NotFound));
    }

    #[test]
    fn failed_write_erases_the_namespace() {
        // Store wrapper that rejects the last record written by the
        // protocol, leaving a partial config behind on the inner store.
        struct Flaky {
            inner: MemNvs,
        }
        impl NvsStore for Flaky {
            fn get_u32(&self, key: &str) -> Result<u32> {
                self.inner.get_u32(key)
            }
            fn set_u32(&mut self, key: &str, value: u32) -> Result<()> {
                self.inner.set_u32(key, value)
            }
            fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
                self.inner.get_blob(key)
            }
            fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()> {
                if key == "sta_dns" {
                    return Err(Error::Io);
                }
                self.inner.set_blob(key, data)
            }
            fn erase_all(&mut self) -> Result<()> {
                self.inner.erase_all()
            }
            fn commit(&mut self) -> Result<()> {
                self.inner.commit()
            }
        }

        let mut store = Flaky { inner: MemNvs::new() };
        assert_eq!(save_config(&mut store, &sample_config()), Err(Error::Io));
        assert!(store.inner.is_empty());
    }

    #[test]
    fn blob_lengths_match_layout() {
        assert_eq!(AP_BLOB_LEN, 101);
        assert_eq!(STA_BLOB_LEN, 105);
        assert_eq!(encode_ap(&ApConfig::default()).len(), AP_BLOB_LEN);
        assert_eq!(encode_sta(&StaConfig::default()).len(), STA_BLOB_LEN);
    }
}
