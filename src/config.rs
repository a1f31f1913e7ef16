//! WiFi configuration value types and compiled-in defaults.
//!
//! A [`WifiConfig`] describes everything the manager needs to bring the
//! radio into a desired shape: the mode, the hosted-network (AP) parameters,
//! the station (STA) credentials and the IP setup for both sides. The same
//! struct is what gets persisted to NVS and what the fall-back mechanism
//! restores.

use std::net::Ipv4Addr;

use log::error;

/// Maximum SSID length in bytes (802.11 limit).
pub const MAX_SSID_LEN: usize = 32;
/// Maximum WPA passphrase length in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 64;
/// Number of DNS server slots carried in static STA mode.
pub const MAX_DNS_SERVERS: usize = 3;
/// Client limit forced onto the AP interface whenever a config is applied.
pub const MAX_AP_CLIENTS: u8 = 3;

/// SSID storage, bounded to the 802.11 maximum.
pub type Ssid = heapless::String<MAX_SSID_LEN>;
/// Passphrase storage, bounded to the WPA maximum.
pub type Passphrase = heapless::String<MAX_PASSPHRASE_LEN>;

// Compiled-in defaults. Each one is validated at runtime; an invalid value
// is replaced by its hard-coded fallback with a logged substitution, so a
// bad build-time setting can never leave the device unreachable.
pub const DEFAULT_AP_IP: &str = "192.168.4.1";
pub const DEFAULT_AP_NETMASK: &str = "255.255.255.0";
pub const DEFAULT_AP_GATEWAY: &str = "192.168.4.1";
pub const DEFAULT_AP_SSID: &str = "ESP WiFi Manager";
pub const DEFAULT_AP_PASSPHRASE: &str = "";

const FALLBACK_AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
const FALLBACK_AP_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const FALLBACK_AP_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
const FALLBACK_AP_SSID: &str = "ESP WiFi Manager";

/// Role of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiMode {
    /// Device hosts its own network.
    Ap,
    /// Device joins an existing network.
    Sta,
    /// Both roles simultaneously on the same radio.
    #[default]
    ApSta,
}

impl WifiMode {
    /// True if the mode brings up the AP interface.
    pub fn has_ap(self) -> bool {
        matches!(self, WifiMode::Ap | WifiMode::ApSta)
    }

    /// True if the mode brings up the STA interface.
    pub fn has_sta(self) -> bool {
        matches!(self, WifiMode::Sta | WifiMode::ApSta)
    }

    /// Persistent representation.
    pub fn as_u32(self) -> u32 {
        match self {
            WifiMode::Sta => 1,
            WifiMode::Ap => 2,
            WifiMode::ApSta => 3,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(WifiMode::Sta),
            2 => Some(WifiMode::Ap),
            3 => Some(WifiMode::ApSta),
            _ => None,
        }
    }
}

/// Authentication mode of the hosted network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa3Psk,
}

impl AuthMode {
    pub fn as_u8(self) -> u8 {
        match self {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa3Psk => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AuthMode::Open),
            1 => Some(AuthMode::Wep),
            2 => Some(AuthMode::WpaPsk),
            3 => Some(AuthMode::Wpa2Psk),
            4 => Some(AuthMode::WpaWpa2Psk),
            5 => Some(AuthMode::Wpa3Psk),
            _ => None,
        }
    }
}

/// Parameters of the hosted (AP) network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApConfig {
    pub ssid: Ssid,
    /// Empty passphrase means an open network.
    pub passphrase: Passphrase,
    /// 0 lets the radio pick.
    pub channel: u8,
    pub auth_mode: AuthMode,
    /// Overwritten with [`MAX_AP_CLIENTS`] when the config is applied.
    pub max_clients: u8,
}

/// Parameters for joining an existing (STA) network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaConfig {
    pub ssid: Ssid,
    pub passphrase: Passphrase,
    /// Pin the association to a specific BSSID.
    pub bssid: Option<[u8; 6]>,
}

/// IPv4 setup of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Default for IpInfo {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Complete WiFi configuration: what gets applied, persisted and restored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiConfig {
    /// True iff synthesized from compiled-in defaults. Never persisted.
    pub is_default: bool,
    pub mode: WifiMode,
    pub ap: ApConfig,
    pub ap_ip: IpInfo,
    pub sta: StaConfig,
    /// Use `sta_ip`/`sta_dns` verbatim and suppress the DHCP client.
    pub sta_static: bool,
    pub sta_ip: IpInfo,
    pub sta_dns: [Option<Ipv4Addr>; MAX_DNS_SERVERS],
    /// Attempt to join the target network after the config is applied.
    pub sta_connect: bool,
}

impl WifiConfig {
    /// Configuration synthesized from the compiled-in defaults.
    ///
    /// APSTA mode, so a fresh device is reachable both through its own
    /// network and through any pre-provisioned one. Invalid compiled-in
    /// values are substituted with hard-coded fallbacks.
    pub fn compiled_defaults() -> Self {
        let mut cfg = WifiConfig {
            is_default: true,
            mode: WifiMode::ApSta,
            ..WifiConfig::default()
        };

        cfg.ap_ip.ip = parse_ip_or(DEFAULT_AP_IP, FALLBACK_AP_IP, "AP IP");
        cfg.ap_ip.netmask = parse_ip_or(DEFAULT_AP_NETMASK, FALLBACK_AP_NETMASK, "AP netmask");
        cfg.ap_ip.gateway = parse_ip_or(DEFAULT_AP_GATEWAY, FALLBACK_AP_GATEWAY, "AP gateway");

        if DEFAULT_AP_SSID.is_empty() || cfg.ap.ssid.push_str(DEFAULT_AP_SSID).is_err() {
            error!(
                "config: Invalid default AP SSID: {:?}. Using {:?} instead.",
                DEFAULT_AP_SSID, FALLBACK_AP_SSID
            );
            cfg.ap.ssid = Ssid::try_from(FALLBACK_AP_SSID).unwrap_or_default();
        }

        if !DEFAULT_AP_PASSPHRASE.is_empty() {
            if cfg.ap.passphrase.push_str(DEFAULT_AP_PASSPHRASE).is_ok() {
                cfg.ap.auth_mode = AuthMode::WpaWpa2Psk;
            } else {
                error!("config: Default AP passphrase too long, running open network.");
            }
        }

        cfg
    }
}

fn parse_ip_or(value: &str, fallback: Ipv4Addr, what: &str) -> Ipv4Addr {
    match value.parse() {
        Ok(addr) => addr,
        Err(_) => {
            error!(
                "config: Invalid default {}: {:?}. Using {} instead.",
                what, value, fallback
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_apsta_with_default_ssid() {
        let cfg = WifiConfig::compiled_defaults();
        assert!(cfg.is_default);
        assert_eq!(cfg.mode, WifiMode::ApSta);
        assert_eq!(cfg.ap.ssid.as_str(), "ESP WiFi Manager");
        assert_eq!(cfg.ap_ip.ip, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(cfg.ap_ip.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(cfg.ap_ip.gateway, Ipv4Addr::new(192, 168, 4, 1));
        assert!(!cfg.sta_connect);
        assert!(cfg.sta.ssid.is_empty());
    }

    #[test]
    fn invalid_ip_string_substitutes_fallback() {
        assert_eq!(
            parse_ip_or("not-an-ip", FALLBACK_AP_IP, "AP IP"),
            Ipv4Addr::new(192, 168, 4, 1)
        );
        assert_eq!(
            parse_ip_or("10.0.0.7", FALLBACK_AP_IP, "AP IP"),
            Ipv4Addr::new(10, 0, 0, 7)
        );
    }

    #[test]
    fn mode_roundtrip_and_interface_predicates() {
        for mode in [WifiMode::Ap, WifiMode::Sta, WifiMode::ApSta] {
            assert_eq!(WifiMode::from_u32(mode.as_u32()), Some(mode));
        }
        assert_eq!(WifiMode::from_u32(0), None);
        assert!(WifiMode::Ap.has_ap() && !WifiMode::Ap.has_sta());
        assert!(!WifiMode::Sta.has_ap() && WifiMode::Sta.has_sta());
        assert!(WifiMode::ApSta.has_ap() && WifiMode::ApSta.has_sta());
    }
}
