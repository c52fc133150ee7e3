//! Helper functions for integration tests

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use netwatch::{
    ResultEnvelope,
    agent::{AgentHandle, AgentServer, AgentSettings},
    checks::{AgentConfig, CheckSpec, EchoCheck, NetworkTarget, TcpCheck},
    manager::SessionSettings,
    probes::{self, Probe},
    protocol::{self, FrameReader, FrameWriter},
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Probe that answers instantly and remembers how often each target was fired
#[derive(Default)]
pub struct CountingProbe {
    firings: AtomicU64,
    per_target: Mutex<HashMap<String, u64>>,
}

impl CountingProbe {
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::SeqCst)
    }

    pub fn per_target(&self) -> HashMap<String, u64> {
        self.per_target.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for CountingProbe {
    async fn probe(&self, spec: &CheckSpec) -> anyhow::Result<String> {
        self.firings.fetch_add(1, Ordering::SeqCst);
        *self
            .per_target
            .lock()
            .unwrap()
            .entry(spec.target())
            .or_default() += 1;
        Ok(probes::describe(spec, "ok"))
    }
}

pub fn tcp_check(port: u16, interval: u64) -> CheckSpec {
    CheckSpec::Tcp(TcpCheck {
        target: NetworkTarget::new("127.0.0.1", port),
        interval,
    })
}

pub fn echo_check(port: u16, interval: u64) -> CheckSpec {
    CheckSpec::Echo(EchoCheck {
        target: NetworkTarget::new("127.0.0.1", port),
        interval,
    })
}

pub fn tcp_config(ports: &[u16], interval: u64) -> AgentConfig {
    ports
        .iter()
        .fold(AgentConfig::new(), |config, port| config.with(tcp_check(*port, interval)))
}

pub fn fast_agent_settings() -> AgentSettings {
    AgentSettings {
        poll_interval: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(2),
        echo_results: false,
    }
}

pub fn fast_session_settings() -> SessionSettings {
    SessionSettings {
        retry_delay: Duration::from_millis(200),
        read_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(1),
    }
}

pub async fn start_agent_at(addr: SocketAddr, probe: Arc<dyn Probe>) -> AgentHandle {
    AgentServer::bind(addr, probe, fast_agent_settings())
        .await
        .unwrap()
        .spawn(&CancellationToken::new())
}

pub async fn start_agent(probe: Arc<dyn Probe>) -> AgentHandle {
    start_agent_at(([127, 0, 0, 1], 0).into(), probe).await
}

/// A port nothing listens on (right now)
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Plays the manager side by hand: connects, sends `config`, returns the acknowledgement.
pub async fn handshake(
    addr: SocketAddr,
    config: &AgentConfig,
) -> (FrameReader, FrameWriter, ResultEnvelope) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = protocol::framed(stream);

    writer.send(config).await.unwrap();
    let ack = next_envelope(&mut reader).await;

    (reader, writer, ack)
}

pub async fn next_envelope(reader: &mut FrameReader) -> ResultEnvelope {
    tokio::time::timeout(Duration::from_secs(5), reader.next_message())
        .await
        .expect("no message within 5s")
        .unwrap()
}

/// Polls `condition` every 10ms until it holds; panics after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(limit, polling)
        .await
        .expect("condition not reached in time");
}

/// Awaits `future`, returning how long it took.
pub async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let started = std::time::Instant::now();
    let output = future.await;
    (output, started.elapsed())
}
