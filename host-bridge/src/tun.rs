//! TUN configuration built from the host's VPN parameters
//!
//! The host opens the VPN interface itself and passes the file descriptor
//! together with comma-separated address and DNS lists.

use crate::types::{BridgeError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_MTU: u32 = 9000;
pub const DEFAULT_DEVICE: &str = "tun0";
pub const DNS_PORT: u16 = 53;

/// Userspace network stack driving the TUN device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunStack {
    #[default]
    System,
    Gvisor,
    Mixed,
}

impl TunStack {
    /// Case-insensitive lookup; unknown names fall back to `System`
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gvisor" => TunStack::Gvisor,
            "mixed" => TunStack::Mixed,
            _ => TunStack::System,
        }
    }
}

/// An address with prefix length, e.g. `172.19.0.1/30`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    pub addr: IpAddr,
    pub len: u8,
}

impl IpPrefix {
    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

impl FromStr for IpPrefix {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BridgeError::InvalidTunConfig(format!("invalid prefix {:?}", s));

        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        // Plain decimal only: no sign, no leading zeros
        if !len.bytes().all(|b| b.is_ascii_digit()) || (len.len() > 1 && len.starts_with('0')) {
            return Err(invalid());
        }
        let len: u8 = len.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(invalid());
        }
        Ok(Self { addr, len })
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for IpPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Settings for the TUN listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TunConfig {
    pub enable: bool,
    pub device: String,
    pub stack: TunStack,
    pub dns_hijack: Vec<String>,
    pub auto_route: bool,
    pub auto_detect_interface: bool,
    pub inet4_address: Vec<IpPrefix>,
    pub inet6_address: Vec<IpPrefix>,
    pub mtu: u32,
    pub file_descriptor: i32,
}

impl TunConfig {
    /// Build the configuration from host parameters
    ///
    /// # Arguments
    /// * `fd` - VPN interface file descriptor opened by the host
    /// * `stack` - stack name (`system`, `gvisor`, `mixed`)
    /// * `addresses` - comma-separated CIDR prefixes, IPv4 and IPv6 mixed
    /// * `dns` - comma-separated DNS server addresses to hijack
    pub fn build(fd: i32, stack: &str, addresses: &str, dns: &str) -> Result<Self> {
        if fd <= 0 {
            return Err(BridgeError::InvalidTunConfig(format!(
                "invalid TUN file descriptor {}",
                fd
            )));
        }

        let mut inet4_address = Vec::new();
        let mut inet6_address = Vec::new();
        for prefix in split_list(addresses) {
            let prefix: IpPrefix = prefix.parse()?;
            if prefix.is_ipv4() {
                inet4_address.push(prefix);
            } else {
                inet6_address.push(prefix);
            }
        }

        let dns_hijack = split_list(dns).map(dns_target).collect();

        let config = Self {
            enable: true,
            device: DEFAULT_DEVICE.to_string(),
            stack: TunStack::from_name(stack),
            dns_hijack,
            auto_route: false,
            auto_detect_interface: false,
            inet4_address,
            inet6_address,
            mtu: DEFAULT_MTU,
            file_descriptor: fd,
        };
        log::debug!("Built TUN config: {:?}", config);
        Ok(config)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn dns_target(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, DNS_PORT)
    } else {
        format!("{}:{}", host, DNS_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_splits_address_families() {
        let config = TunConfig::build(
            12,
            "gVisor",
            "172.19.0.1/30, fdfe:dcba:9876::1/126,",
            "172.19.0.2, fdfe:dcba:9876::2",
        )
        .unwrap();

        assert_eq!(config.file_descriptor, 12);
        assert_eq!(config.stack, TunStack::Gvisor);
        assert_eq!(config.inet4_address.len(), 1);
        assert_eq!(config.inet4_address[0].to_string(), "172.19.0.1/30");
        assert_eq!(config.inet6_address[0].to_string(), "fdfe:dcba:9876::1/126");
        assert_eq!(
            config.dns_hijack,
            vec!["172.19.0.2:53".to_string(), "[fdfe:dcba:9876::2]:53".to_string()]
        );
        assert_eq!(config.mtu, DEFAULT_MTU);
        assert!(config.enable);
        assert!(!config.auto_route);
    }

    #[test]
    fn test_invalid_fd_rejected() {
        assert!(matches!(
            TunConfig::build(0, "system", "", ""),
            Err(BridgeError::InvalidTunConfig(_))
        ));
        assert!(TunConfig::build(-1, "system", "", "").is_err());
    }

    #[test]
    fn test_unknown_stack_falls_back_to_system() {
        let config = TunConfig::build(3, "lwip", "", "").unwrap();
        assert_eq!(config.stack, TunStack::System);
        assert!(config.dns_hijack.is_empty());
    }

    #[test]
    fn test_malformed_prefix_rejected() {
        assert!(TunConfig::build(3, "system", "10.0.0.1", "").is_err());
        assert!(TunConfig::build(3, "system", "10.0.0.1/33", "").is_err());
        assert!(TunConfig::build(3, "system", "not-an-ip/24", "").is_err());
    }

    #[test]
    fn test_prefix_length_is_plain_decimal() {
        assert!("10.0.0.1/024".parse::<IpPrefix>().is_err());
        assert!("10.0.0.1/+24".parse::<IpPrefix>().is_err());
        assert!("10.0.0.1/".parse::<IpPrefix>().is_err());
        assert_eq!("10.0.0.1/0".parse::<IpPrefix>().unwrap().len, 0);
        assert_eq!("fd00::1/64".parse::<IpPrefix>().unwrap().len, 64);
    }

    #[test]
    fn test_device_name() {
        let config = TunConfig::build(3, "system", "", "").unwrap();
        assert_eq!(config.device, DEFAULT_DEVICE);
        assert_eq!(config.device, "tun0");
    }

    #[test]
    fn test_config_serialises_prefixes_as_strings() {
        let config = TunConfig::build(5, "mixed", "10.0.0.1/24", "").unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["inet4-address"][0], "10.0.0.1/24");
        assert_eq!(value["stack"], "mixed");

        let back: TunConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }
}
