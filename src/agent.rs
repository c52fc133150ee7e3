//! Agent Transport - the server end of a manager link
//!
//! ## Session flow
//!
//! ```text
//! Listening ──accept──► AwaitingConfig ──config + ack──► Streaming ──peer gone──► Reaccepting
//!     ▲                      │ bad config                    ▲                        │
//!     └──────────────────────┘                               └──────accept + ack──────┘
//!
//! stop (any phase) ──► Draining ──scheduler joined──► Closed
//! ```
//!
//! The listening socket is bound once and reused for every reaccept. The
//! scheduler keeps running while no manager is connected; its tasks simply
//! block on the full telemetry slot until delivery resumes. A manager sends its
//! configuration on every connect: an identical configuration keeps the running
//! scheduler, a different one replaces it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::ResultEnvelope;
use crate::checks::AgentConfig;
use crate::probes::Probe;
use crate::protocol::{self, FrameReader, FrameWriter, ProtocolError};
use crate::scheduler::{self, SchedulerHandle};
use crate::session::{AgentPhase, StateCell, StateWatch};
use crate::telemetry::{QueueClosed, TelemetryReceiver, telemetry_queue};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// How long the forwarder waits on an empty queue before looking around again
    pub poll_interval: Duration,

    /// How long a fresh connection may take to deliver its configuration
    pub handshake_timeout: Duration,

    /// Print every forwarded result to stdout as well
    pub echo_results: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            echo_results: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentStats {
    connections: AtomicU64,
    rejected: AtomicU64,
    scheduler_starts: AtomicU64,
    forwarded: AtomicU64,
}

impl AgentStats {
    /// Manager connections accepted so far
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Connections dropped because their configuration did not decode
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn scheduler_starts(&self) -> u64 {
        self.scheduler_starts.load(Ordering::Relaxed)
    }

    /// Results written to a manager
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

/// A bound agent that has not started serving yet
pub struct AgentServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    probe: Arc<dyn Probe>,
    settings: AgentSettings,
}

impl AgentServer {
    /// Binds the agent's port. Failing to bind is fatal; nothing retries it.
    pub async fn bind(
        addr: SocketAddr,
        probe: Arc<dyn Probe>,
        settings: AgentSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind agent to {addr}"))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            probe,
            settings,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving; the agent stops when `cancel` fires or through the handle.
    pub fn spawn(self, cancel: &CancellationToken) -> AgentHandle {
        let cancel = cancel.child_token();
        let state = StateCell::new(AgentPhase::Listening);
        let watch = state.subscribe();
        let stats = Arc::new(AgentStats::default());

        let actor = AgentActor {
            listener: self.listener,
            local_addr: self.local_addr,
            probe: self.probe,
            settings: self.settings,
            state,
            stats: stats.clone(),
            cancel: cancel.clone(),
            scheduler: None,
            queue: None,
            pending: None,
        };

        AgentHandle {
            task: tokio::spawn(actor.run()),
            local_addr: self.local_addr,
            state: watch,
            stats,
            cancel,
        }
    }
}

enum StreamEnd {
    Disconnected,
    Cancelled,
}

struct AgentActor {
    listener: TcpListener,
    local_addr: SocketAddr,
    probe: Arc<dyn Probe>,
    settings: AgentSettings,
    state: StateCell<AgentPhase>,
    stats: Arc<AgentStats>,
    cancel: CancellationToken,

    scheduler: Option<SchedulerHandle>,
    queue: Option<TelemetryReceiver>,

    /// Taken from the queue but not yet written; first in line after a reaccept
    pending: Option<ResultEnvelope>,
}

impl AgentActor {
    #[instrument(skip_all, fields(addr = %self.local_addr))]
    async fn run(mut self) {
        info!("agent listening");

        while let Some((stream, peer)) = self.accept().await {
            self.stats.connections.fetch_add(1, Ordering::Relaxed);
            info!("manager connected from {peer}");

            if self.scheduler.is_none() {
                self.state.transition(AgentPhase::AwaitingConfig);
            }

            let (mut reader, mut writer) = protocol::framed(stream);

            match self.handshake(&mut reader, &mut writer).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("rejecting manager {peer}: {e:#}");
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    self.state.transition(self.waiting_phase());
                    continue;
                }
            }

            self.state.transition(AgentPhase::Streaming);

            match self.stream(&mut reader, &mut writer).await {
                StreamEnd::Disconnected => {
                    info!("manager {peer} disconnected, waiting for a new connection");
                    self.state.transition(AgentPhase::Reaccepting);
                }
                StreamEnd::Cancelled => break,
            }
        }

        self.drain().await;
    }

    /// Phase to fall back to when a connection is lost or refused
    fn waiting_phase(&self) -> AgentPhase {
        if self.scheduler.is_some() {
            AgentPhase::Reaccepting
        } else {
            AgentPhase::Listening
        }
    }

    /// Next manager connection; `None` once the agent is stopping.
    async fn accept(&self) -> Option<(TcpStream, SocketAddr)> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                accepted = self.listener.accept() => match accepted {
                    Ok(connection) => return Some(connection),
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                        tokio::select! {
                            _ = self.cancel.cancelled() => return None,
                            _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        }
                    }
                },
            }
        }
    }

    /// Reads the configuration, acknowledges it and (re)starts the checks.
    ///
    /// `Ok(false)` means the agent was stopped in the meantime.
    async fn handshake(
        &mut self,
        reader: &mut FrameReader,
        writer: &mut FrameWriter,
    ) -> Result<bool> {
        let timeout = self.settings.handshake_timeout;

        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(false),
            frame = tokio::time::timeout(timeout, reader.next_frame()) => frame
                .map_err(|_| anyhow!("no configuration within {}s", timeout.as_secs()))?
                .context("failed to read configuration")?,
        };

        let config = AgentConfig::parse(&frame).context("invalid configuration message")?;
        info!("received configuration with {} checks", config.len());

        writer
            .send(&ResultEnvelope::acknowledgement())
            .await
            .context("failed to acknowledge configuration")?;

        let unchanged = self
            .scheduler
            .as_ref()
            .is_some_and(|running| running.config() == &config);

        if unchanged {
            debug!("configuration unchanged, keeping running checks");
        } else {
            self.restart_scheduler(config).await;
        }

        Ok(true)
    }

    async fn restart_scheduler(&mut self, config: AgentConfig) {
        if let Some(running) = self.scheduler.take() {
            info!("configuration changed, restarting checks");
            running.stop().await;
        }

        self.pending = None;
        let (emit, queue) = telemetry_queue();
        self.scheduler = Some(scheduler::start(&config, self.probe.clone(), emit, &self.cancel));
        self.queue = Some(queue);
        self.stats.scheduler_starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Forwards results until the manager goes away or the agent is stopped.
    async fn stream(&mut self, reader: &mut FrameReader, writer: &mut FrameWriter) -> StreamEnd {
        let poll = self.settings.poll_interval;

        loop {
            if self.cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }

            if let Some(envelope) = self.pending.take() {
                let sent = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    sent = writer.send(&envelope) => Some(sent),
                };

                match sent {
                    None => return StreamEnd::Cancelled,
                    Some(Ok(())) => self.forwarded(&envelope),
                    Some(Err(e)) => {
                        debug!("failed to forward result: {e}");
                        self.pending = Some(envelope);
                        return StreamEnd::Disconnected;
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                frame = reader.next_frame() => match frame {
                    Ok(frame) => debug!("ignoring unexpected message from manager: {frame}"),
                    Err(ProtocolError::Closed) => return StreamEnd::Disconnected,
                    Err(e) => {
                        debug!("connection lost: {e}");
                        return StreamEnd::Disconnected;
                    }
                },
                taken = take_from(&mut self.queue, poll) => {
                    if let Some(envelope) = taken {
                        self.pending = Some(envelope);
                    }
                }
            }
        }
    }

    fn forwarded(&self, envelope: &ResultEnvelope) {
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        trace!("forwarded result from {}", envelope.time);

        if self.settings.echo_results {
            println!("[{}]: {}", envelope.time, envelope.results_text());
        }
    }

    async fn drain(&mut self) {
        self.state.transition(AgentPhase::Draining);

        if let Some(running) = self.scheduler.take() {
            running.stop().await;
        }
        self.queue = None;
        self.pending = None;

        self.state.transition(AgentPhase::Closed);
        info!("agent stopped");
    }
}

/// Waits up to `poll` for the next result; forgets the queue once every check task is gone.
async fn take_from(
    queue: &mut Option<TelemetryReceiver>,
    poll: Duration,
) -> Option<ResultEnvelope> {
    let Some(receiver) = queue else {
        tokio::time::sleep(poll).await;
        return None;
    };

    match receiver.take(poll).await {
        Ok(envelope) => envelope,
        Err(QueueClosed) => {
            debug!("no check tasks left to forward results from");
            *queue = None;
            None
        }
    }
}

/// Handle to a running agent
pub struct AgentHandle {
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    state: StateWatch<AgentPhase>,
    stats: Arc<AgentStats>,
    cancel: CancellationToken,
}

impl AgentHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> StateWatch<AgentPhase> {
        self.state.clone()
    }

    pub fn phase(&self) -> AgentPhase {
        self.state.current()
    }

    pub fn stats(&self) -> Arc<AgentStats> {
        self.stats.clone()
    }

    /// Stops the checks, releases the port and waits for the agent to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("agent task failed: {e}");
        }
    }
}
