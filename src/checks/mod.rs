//! Check definitions and the registry that moves them on and off the wire
//!
//! Every configured probe is a [`CheckSpec`]: one variant per [`CheckType`], each
//! carrying exactly the fields its type declares. Types that address a host and
//! port embed a shared [`NetworkTarget`] instead of inheriting from each other.
//!
//! ```text
//! {"TCP": [{"ip_address": "127.0.0.1", "port": 9999, "interval": 1}]}
//!    │                         │
//!    └── CheckType::Tcp        └── registry::decode ──► CheckSpec::Tcp(TcpCheck { .. })
//! ```

pub mod error;
pub mod registry;
pub mod spec;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::DecodeError;
pub use registry::AgentConfig;
pub use spec::{
    CheckSpec, DnsCheck, EchoCheck, HttpCheck, HttpsCheck, IcmpCheck, NetworkTarget, NtpCheck,
    TcpCheck, UdpCheck,
};

/// Shortest allowed check interval in seconds
pub const MIN_INTERVAL: u64 = 1;

/// Longest allowed check interval in seconds
pub const MAX_INTERVAL: u64 = 600;

/// Longest allowed probe timeout in seconds
pub const MAX_TIMEOUT: u64 = 300;

/// Largest allowed ICMP time-to-live
pub const MAX_TTL: u64 = 500;

/// Upper bound for ports and ICMP sequence numbers
pub const MAX_16B: u64 = 65535;

/// The fixed set of check types an agent knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckType {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "NTP")]
    Ntp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "Echo")]
    Echo,
}

impl CheckType {
    pub const ALL: [CheckType; 8] = [
        CheckType::Http,
        CheckType::Https,
        CheckType::Icmp,
        CheckType::Dns,
        CheckType::Ntp,
        CheckType::Tcp,
        CheckType::Udp,
        CheckType::Echo,
    ];

    /// Tag used as the key of the configuration message
    pub fn tag(self) -> &'static str {
        match self {
            CheckType::Http => "HTTP",
            CheckType::Https => "HTTPS",
            CheckType::Icmp => "ICMP",
            CheckType::Dns => "DNS",
            CheckType::Ntp => "NTP",
            CheckType::Tcp => "TCP",
            CheckType::Udp => "UDP",
            CheckType::Echo => "Echo",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|check_type| check_type.tag() == tag)
    }

    /// The fields a check of this type carries, no more and no fewer.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            CheckType::Http => &["url", "interval"],
            CheckType::Https => &["url", "timeout", "interval"],
            CheckType::Icmp => &["host", "ttl", "timeout", "sequence_number", "interval"],
            CheckType::Dns => &["server", "query", "record_type", "interval"],
            CheckType::Ntp => &["server", "interval"],
            CheckType::Tcp => &["ip_address", "port", "interval"],
            CheckType::Udp => &["ip_address", "port", "timeout", "interval"],
            CheckType::Echo => &["ip_address", "port", "interval"],
        }
    }

    /// Prefix of every result line produced by a check of this type
    pub fn label(self) -> &'static str {
        match self {
            CheckType::Http => "HTTP check",
            CheckType::Https => "HTTPS check",
            CheckType::Icmp => "ICMP check",
            CheckType::Dns => "DNS check",
            CheckType::Ntp => "NTP check",
            CheckType::Tcp => "TCP check",
            CheckType::Udp => "UDP check",
            CheckType::Echo => "Echo server check",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CheckType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for check_type in CheckType::ALL {
            assert_eq!(CheckType::from_tag(check_type.tag()), Some(check_type));
        }
    }

    #[test]
    fn test_tags_are_case_sensitive() {
        assert_eq!(CheckType::from_tag("Echo"), Some(CheckType::Echo));
        assert_eq!(CheckType::from_tag("ECHO"), None);
        assert_eq!(CheckType::from_tag("http"), None);
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&CheckType::Echo).unwrap();
        assert_eq!(json, r#""Echo""#);

        let parsed: CheckType = serde_json::from_str(r#""HTTPS""#).unwrap();
        assert_eq!(parsed, CheckType::Https);
    }

    #[test]
    fn test_every_type_declares_an_interval() {
        for check_type in CheckType::ALL {
            assert!(check_type.fields().contains(&"interval"), "{check_type}");
        }
    }
}
