//! Probe capability: the code that actually touches the network for a check
//!
//! The scheduler only sees the [`Probe`] trait. [`NetworkProbes`] is the real
//! implementation and dispatches each [`CheckSpec`] variant to a free function
//! that returns the status part of the result line; the dispatcher prefixes it
//! with the check label and target:
//!
//! ```text
//! TCP check -- 127.0.0.1:9999 -- port closed: Connection refused (os error 111)
//! └ label ─┘    └─ target ──┘    └──────────────── status ──────────────────┘
//! ```

mod dns;
mod http;
mod icmp;
mod ntp;
mod transport;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::checks::CheckSpec;

/// Deadline for probes whose check type configures no timeout of its own
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack added on top of a probe's own timeout before the scheduler gives up on it
pub const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Runs one check invocation.
///
/// An `Err` means the probe itself could not run; an unreachable target is a
/// regular outcome and is reported through `Ok`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, spec: &CheckSpec) -> Result<String>;
}

/// Upper bound on a single invocation of `spec`'s probe
pub fn deadline(spec: &CheckSpec) -> Duration {
    spec.timeout().unwrap_or(DEFAULT_PROBE_TIMEOUT) + PROBE_GRACE
}

/// Result line for a probe that completed
pub fn describe(spec: &CheckSpec, status: &str) -> String {
    format!("{} -- {} -- {status}", spec.check_type().label(), spec.target())
}

/// Result line for a probe that failed to run
pub fn describe_failure(spec: &CheckSpec, err: &anyhow::Error) -> String {
    describe(spec, &format!("Error: {err:#}"))
}

/// Probes backed by real sockets, HTTP requests and the system `ping`
#[derive(Debug, Clone)]
pub struct NetworkProbes {
    client: reqwest::Client,
}

impl NetworkProbes {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PROBE_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for NetworkProbes {
    async fn probe(&self, spec: &CheckSpec) -> Result<String> {
        let status = match spec {
            CheckSpec::Http(check) => http::http(&self.client, check).await?,
            CheckSpec::Https(check) => http::https(&self.client, check).await?,
            CheckSpec::Icmp(check) => icmp::ping(check).await?,
            CheckSpec::Dns(check) => dns::dns(check).await?,
            CheckSpec::Ntp(check) => ntp::ntp(check).await?,
            CheckSpec::Tcp(check) => transport::tcp(&check.target).await?,
            CheckSpec::Udp(check) => transport::udp(check).await?,
            CheckSpec::Echo(check) => transport::echo(&check.target).await?,
        };

        Ok(describe(spec, &status))
    }
}

/// A UDP socket of the right address family, connected to `host:port`.
async fn connected_udp(host: &str, port: u16) -> Result<UdpSocket> {
    let remote = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .next()
        .ok_or_else(|| anyhow!("{host} did not resolve to any address"))?;

    let local: SocketAddr = if remote.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local).await.context("failed to bind UDP socket")?;
    socket
        .connect(remote)
        .await
        .with_context(|| format!("failed to connect UDP socket to {remote}"))?;

    Ok(socket)
}
