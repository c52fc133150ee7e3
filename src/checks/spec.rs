use std::time::Duration;

use serde::Deserialize;

use super::{CheckType, DecodeError, MAX_16B, MAX_INTERVAL, MAX_TIMEOUT, MAX_TTL, MIN_INTERVAL};

/// Host and port shared by the transport-level checks (TCP, UDP, Echo)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct NetworkTarget {
    pub ip_address: String,
    pub port: u16,
}

impl NetworkTarget {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct HttpCheck {
    pub url: String,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct HttpsCheck {
    pub url: String,
    pub timeout: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct IcmpCheck {
    pub host: String,
    pub ttl: u32,
    pub timeout: u64,
    pub sequence_number: u16,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct DnsCheck {
    pub server: String,
    pub query: String,
    pub record_type: String,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct NtpCheck {
    pub server: String,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct TcpCheck {
    #[serde(flatten)]
    pub target: NetworkTarget,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct UdpCheck {
    #[serde(flatten)]
    pub target: NetworkTarget,
    pub timeout: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct EchoCheck {
    #[serde(flatten)]
    pub target: NetworkTarget,
    pub interval: u64,
}

/// One configured probe instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckSpec {
    Http(HttpCheck),
    Https(HttpsCheck),
    Icmp(IcmpCheck),
    Dns(DnsCheck),
    Ntp(NtpCheck),
    Tcp(TcpCheck),
    Udp(UdpCheck),
    Echo(EchoCheck),
}

impl CheckSpec {
    pub fn check_type(&self) -> CheckType {
        match self {
            CheckSpec::Http(_) => CheckType::Http,
            CheckSpec::Https(_) => CheckType::Https,
            CheckSpec::Icmp(_) => CheckType::Icmp,
            CheckSpec::Dns(_) => CheckType::Dns,
            CheckSpec::Ntp(_) => CheckType::Ntp,
            CheckSpec::Tcp(_) => CheckType::Tcp,
            CheckSpec::Udp(_) => CheckType::Udp,
            CheckSpec::Echo(_) => CheckType::Echo,
        }
    }

    /// Seconds between two firings
    pub fn interval(&self) -> u64 {
        match self {
            CheckSpec::Http(check) => check.interval,
            CheckSpec::Https(check) => check.interval,
            CheckSpec::Icmp(check) => check.interval,
            CheckSpec::Dns(check) => check.interval,
            CheckSpec::Ntp(check) => check.interval,
            CheckSpec::Tcp(check) => check.interval,
            CheckSpec::Udp(check) => check.interval,
            CheckSpec::Echo(check) => check.interval,
        }
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval())
    }

    /// The probe's own timeout, for the types that configure one
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            CheckSpec::Https(check) => Some(Duration::from_secs(check.timeout)),
            CheckSpec::Icmp(check) => Some(Duration::from_secs(check.timeout)),
            CheckSpec::Udp(check) => Some(Duration::from_secs(check.timeout)),
            _ => None,
        }
    }

    /// What the check is pointed at, as it appears in result lines.
    pub fn target(&self) -> String {
        match self {
            CheckSpec::Http(check) => check.url.clone(),
            CheckSpec::Https(check) => check.url.clone(),
            CheckSpec::Icmp(check) => check.host.clone(),
            CheckSpec::Dns(check) => check.server.clone(),
            CheckSpec::Ntp(check) => check.server.clone(),
            CheckSpec::Tcp(check) => check.target.address(),
            CheckSpec::Udp(check) => check.target.address(),
            CheckSpec::Echo(check) => check.target.address(),
        }
    }

    /// Checks value bounds that the field types alone cannot express.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let check_type = self.check_type();
        let in_range = |field: &'static str, value: u64, min: u64, max: u64| {
            if (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(DecodeError::OutOfRange {
                    check_type,
                    field,
                    value,
                    min,
                    max,
                })
            }
        };
        let not_empty = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(DecodeError::InvalidValue {
                    check_type,
                    reason: format!("field `{field}` must not be empty"),
                })
            } else {
                Ok(())
            }
        };

        in_range("interval", self.interval(), MIN_INTERVAL, MAX_INTERVAL)?;

        match self {
            CheckSpec::Http(check) => not_empty("url", &check.url),
            CheckSpec::Https(check) => {
                not_empty("url", &check.url)?;
                in_range("timeout", check.timeout, 1, MAX_TIMEOUT)
            }
            CheckSpec::Icmp(check) => {
                not_empty("host", &check.host)?;
                in_range("ttl", u64::from(check.ttl), 1, MAX_TTL)?;
                in_range("timeout", check.timeout, 1, MAX_TIMEOUT)?;
                in_range(
                    "sequence_number",
                    u64::from(check.sequence_number),
                    1,
                    MAX_16B,
                )
            }
            CheckSpec::Dns(check) => {
                not_empty("server", &check.server)?;
                not_empty("query", &check.query)?;
                not_empty("record_type", &check.record_type)
            }
            CheckSpec::Ntp(check) => not_empty("server", &check.server),
            CheckSpec::Tcp(TcpCheck { target, .. }) | CheckSpec::Echo(EchoCheck { target, .. }) => {
                not_empty("ip_address", &target.ip_address)?;
                in_range("port", u64::from(target.port), 1, MAX_16B)
            }
            CheckSpec::Udp(check) => {
                not_empty("ip_address", &check.target.ip_address)?;
                in_range("port", u64::from(check.target.port), 1, MAX_16B)?;
                in_range("timeout", check.timeout, 1, MAX_TIMEOUT)
            }
        }
    }
}
