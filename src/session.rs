//! Link state machines shared by both transports
//!
//! Each transport publishes its current phase through a [`StateCell`]. Phases
//! collapse onto the coarse [`LinkState`]; once a link reaches
//! [`LinkState::Draining`] it never leaves it.

use std::fmt::Debug;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Coarse connection state of one agent or manager link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Draining,
}

pub trait Phase: Debug + Clone + Copy + PartialEq + Eq + Send + Sync + 'static {
    fn link_state(self) -> LinkState;
}

/// Agent-side session phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Listening,
    AwaitingConfig,
    Streaming,
    Reaccepting,
    Draining,
    Closed,
}

impl Phase for AgentPhase {
    fn link_state(self) -> LinkState {
        match self {
            AgentPhase::Listening | AgentPhase::Reaccepting => LinkState::Disconnected,
            AgentPhase::AwaitingConfig | AgentPhase::Streaming => LinkState::Connected,
            AgentPhase::Draining | AgentPhase::Closed => LinkState::Draining,
        }
    }
}

/// Manager-side phases of one agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Handshaking,
    Streaming,
    Stopped,
}

impl Phase for SessionPhase {
    fn link_state(self) -> LinkState {
        match self {
            SessionPhase::Connecting => LinkState::Disconnected,
            SessionPhase::Handshaking | SessionPhase::Streaming => LinkState::Connected,
            SessionPhase::Stopped => LinkState::Draining,
        }
    }
}

/// Holder of a link's current phase
#[derive(Debug)]
pub struct StateCell<P: Phase> {
    tx: watch::Sender<P>,
}

impl<P: Phase> StateCell<P> {
    pub fn new(initial: P) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> P {
        *self.tx.borrow()
    }

    /// Moves to `next`; refused once the link is draining and `next` would leave that state.
    pub fn transition(&self, next: P) -> bool {
        let current = self.current();
        if current == next {
            return true;
        }

        if current.link_state() == LinkState::Draining && next.link_state() != LinkState::Draining {
            warn!("refusing transition {current:?} -> {next:?} after draining started");
            return false;
        }

        debug!("{current:?} -> {next:?}");
        self.tx.send_replace(next);
        true
    }

    pub fn subscribe(&self) -> StateWatch<P> {
        StateWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a [`StateCell`]
#[derive(Debug, Clone)]
pub struct StateWatch<P: Phase> {
    rx: watch::Receiver<P>,
}

impl<P: Phase> StateWatch<P> {
    pub fn current(&self) -> P {
        *self.rx.borrow()
    }

    /// Waits until the phase is `phase`, giving up after `timeout`.
    pub async fn wait_for(&mut self, phase: P, timeout: Duration) -> bool {
        let reached = tokio::time::timeout(timeout, self.rx.wait_for(|current| *current == phase));
        matches!(reached.await, Ok(Ok(_)))
    }

    /// Waits for the next phase change.
    pub async fn changed(&mut self) -> Option<P> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
