use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const AGENT_PORT: &str = "NETWATCH_AGENT_PORT";

const DEFAULT_PORT: u16 = 45000;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(AGENT_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const AGENT_ADDR: &str = "NETWATCH_AGENT_ADDR";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

pub fn get_addr() -> IpAddr {
    let addr_from_env = std::env::var(AGENT_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

const RETRY_SECS: &str = "NETWATCH_RETRY_SECS";

const DEFAULT_RETRY_SECS: u64 = 5;

/// Delay between two connection attempts of a manager session
pub fn get_retry_delay() -> Duration {
    let secs = std::env::var(RETRY_SECS)
        .ok()
        .and_then(|res| res.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_RETRY_SECS);
    Duration::from_secs(secs)
}
