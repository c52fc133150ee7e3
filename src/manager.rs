//! Manager Transport - one client session per configured agent
//!
//! ## Session flow
//!
//! ```text
//! Connecting ──connected──► Handshaking ──config sent──► Streaming
//!   ▲    │ refused / timed out                               │ closed / reset
//!   │    └──── sleep retry_delay ───┐                        │
//!   └───────────────────────────────┴────────────────────────┘
//!
//! stop (any phase) ──► Stopped
//! ```
//!
//! Every decoded result is tagged with the agent's name and address and pushed
//! into the shared [`ResultSink`](crate::sink::ResultSink). Stopping the manager
//! joins every session first; the sink then sees its queue close, renders what
//! is left and exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::ResultEnvelope;
use crate::config::ManagerConfig;
use crate::protocol::{self, FrameReader, ProtocolError};
use crate::session::{SessionPhase, StateCell, StateWatch};
use crate::sink::{Renderer, SinkSender, result_sink};
use crate::tasks::TaskGroup;

/// Upper bound on how long [`ManagerHandle::stop`] waits for the sink to drain
pub const SINK_DRAIN_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Pause between two connection attempts
    pub retry_delay: Duration,

    /// How long one read waits before polling again
    pub read_timeout: Duration,

    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionSettings {
    /// Defaults with the retry delay taken from the environment
    pub fn from_env() -> Self {
        Self {
            retry_delay: crate::util::get_retry_delay(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStats {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    received: AtomicU64,
}

impl SessionStats {
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Successful connections, handshake included
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Messages decoded and handed to the sink
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

enum StreamEnd {
    Disconnected,
    Cancelled,
}

struct AgentSession {
    name: String,
    address: String,
    message: Value,
    settings: SessionSettings,
    sink: SinkSender,
    state: StateCell<SessionPhase>,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
}

impl AgentSession {
    #[instrument(skip_all, fields(agent = %self.name, addr = %self.address))]
    async fn run(self) {
        debug!("starting session");

        while let Some(stream) = self.connect().await {
            self.state.transition(SessionPhase::Handshaking);
            let (mut reader, mut writer) = protocol::framed(stream);

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = writer.send(&self.message) => sent,
            };
            if let Err(e) = sent {
                info!("failed to send configuration: {e}, reconnecting");
                self.state.transition(SessionPhase::Connecting);
                continue;
            }

            self.stats.connections.fetch_add(1, Ordering::Relaxed);
            self.state.transition(SessionPhase::Streaming);

            match self.stream(&mut reader).await {
                StreamEnd::Disconnected => {
                    info!("lost connection to agent, reconnecting");
                    self.state.transition(SessionPhase::Connecting);
                }
                StreamEnd::Cancelled => break,
            }
        }

        self.state.transition(SessionPhase::Stopped);
        debug!("session stopped");
    }

    /// Connects to the agent, retrying until stopped; `None` once stopping.
    async fn connect(&self) -> Option<TcpStream> {
        let retry = self.settings.retry_delay;

        loop {
            self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
            let connect = TcpStream::connect(self.address.as_str());

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                attempt = tokio::time::timeout(self.settings.connect_timeout, connect) => attempt,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    info!("connected to agent");
                    return Some(stream);
                }
                Ok(Err(e)) => {
                    info!("could not connect: {e}, retrying in {}s", retry.as_secs_f32())
                }
                Err(_) => {
                    info!("connection attempt timed out, retrying in {}s", retry.as_secs_f32())
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(retry) => {}
            }
        }
    }

    /// Reads results until the connection drops or the session is stopped.
    async fn stream(&self, reader: &mut FrameReader) -> StreamEnd {
        let read_timeout = self.settings.read_timeout;

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                frame = tokio::time::timeout(read_timeout, reader.next_frame()) => frame,
            };

            let frame = match frame {
                Err(_) => {
                    trace!("nothing received within read timeout");
                    continue;
                }
                Ok(Ok(frame)) => frame,
                Ok(Err(ProtocolError::Closed)) => return StreamEnd::Disconnected,
                Ok(Err(ProtocolError::FrameTooLong)) => {
                    warn!("discarding oversized message");
                    continue;
                }
                Ok(Err(e)) => {
                    debug!("connection error: {e}");
                    return StreamEnd::Disconnected;
                }
            };

            match serde_json::from_str::<ResultEnvelope>(&frame) {
                Ok(envelope) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    self.sink.push(&self.name, &self.address, envelope);
                }
                Err(e) => warn!("discarding undecodable message: {e}"),
            }
        }
    }
}

/// What the manager exposes about one agent link
#[derive(Debug, Clone)]
pub struct AgentLink {
    pub name: String,
    pub address: String,
    state: StateWatch<SessionPhase>,
    stats: Arc<SessionStats>,
}

impl AgentLink {
    pub fn state(&self) -> StateWatch<SessionPhase> {
        self.state.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.current()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }
}

/// Handle to a running manager
pub struct ManagerHandle {
    sessions: TaskGroup,
    sink: JoinHandle<usize>,
    agents: Vec<AgentLink>,
}

impl ManagerHandle {
    /// Starts one session per agent in `config` plus the sink rendering into `renderer`.
    pub fn spawn<R>(
        config: &ManagerConfig,
        renderer: R,
        settings: SessionSettings,
        cancel: &CancellationToken,
    ) -> Self
    where
        R: Renderer + 'static,
    {
        let (sink_tx, sink) = result_sink();
        let sessions = TaskGroup::new(cancel);
        let mut agents = Vec::with_capacity(config.len());

        for (name, entry) in config.iter() {
            let state = StateCell::new(SessionPhase::Connecting);
            let stats = Arc::new(SessionStats::default());
            let address = entry.socket.to_string();

            agents.push(AgentLink {
                name: name.to_string(),
                address: address.clone(),
                state: state.subscribe(),
                stats: stats.clone(),
            });

            let session = AgentSession {
                name: name.to_string(),
                address,
                message: entry.checks.to_wire(),
                settings: settings.clone(),
                sink: sink_tx.clone(),
                state,
                stats,
                cancel: sessions.token(),
            };
            sessions.spawn(session.run());
        }

        info!("manager started {} agent sessions", agents.len());

        Self {
            sessions,
            sink: tokio::spawn(sink.run(renderer)),
            agents,
        }
    }

    pub fn agents(&self) -> &[AgentLink] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<&AgentLink> {
        self.agents.iter().find(|link| link.name == name)
    }

    /// Stops every session, then waits for the sink to render what is left.
    ///
    /// A sink still busy after [`SINK_DRAIN_LIMIT`] is aborted and joined.
    /// Returns the number of lines the sink rendered.
    pub async fn stop(self) -> usize {
        self.sessions.shutdown().await;
        debug!("all agent sessions joined");

        let mut sink = self.sink;
        match tokio::time::timeout(SINK_DRAIN_LIMIT, &mut sink).await {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(e)) => {
                warn!("result sink failed: {e}");
                0
            }
            Err(_) => {
                warn!("result sink did not drain within {}s", SINK_DRAIN_LIMIT.as_secs());
                sink.abort();
                match sink.await {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        debug!("result sink aborted: {e}");
                        0
                    }
                }
            }
        }
    }
}
