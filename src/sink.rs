//! Result Sink - the manager-side consumer of every agent's results
//!
//! Sessions push into an unbounded queue so that a slow renderer never stalls
//! an agent connection. The queue closes once every [`SinkSender`] is dropped;
//! [`ResultSink::run`] renders what is left and returns.

use std::io::Write;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::ResultEnvelope;

/// One decoded result, tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub agent: String,
    pub address: String,
    pub envelope: ResultEnvelope,
}

impl SinkRecord {
    /// `[time]: name (ip:port) -- result`
    pub fn render_line(&self) -> String {
        format!(
            "[{}]: {} ({}) -- {}",
            self.envelope.time,
            self.agent,
            self.address,
            self.envelope.results_text()
        )
    }
}

/// Destination of rendered lines
pub trait Renderer: Send {
    fn render(&mut self, line: &str);
}

/// Writes every line to stdout
#[derive(Debug, Default)]
pub struct StdoutRenderer;

impl Renderer for StdoutRenderer {
    fn render(&mut self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            error!("failed to write result line: {e}");
        }
    }
}

impl Renderer for mpsc::UnboundedSender<String> {
    fn render(&mut self, line: &str) {
        let _ = self.send(line.to_string());
    }
}

pub fn result_sink() -> (SinkSender, ResultSink) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SinkSender { tx }, ResultSink { rx })
}

/// Producer side, one clone per agent session
#[derive(Debug, Clone)]
pub struct SinkSender {
    tx: mpsc::UnboundedSender<SinkRecord>,
}

impl SinkSender {
    pub fn push(&self, agent: &str, address: &str, envelope: ResultEnvelope) {
        let record = SinkRecord {
            agent: agent.to_string(),
            address: address.to_string(),
            envelope,
        };

        if self.tx.send(record).is_err() {
            debug!("result sink already gone, dropping result from {agent}");
        }
    }
}

#[derive(Debug)]
pub struct ResultSink {
    rx: mpsc::UnboundedReceiver<SinkRecord>,
}

impl ResultSink {
    /// Renders records until every sender is dropped and the queue is empty.
    ///
    /// Returns the number of rendered lines.
    pub async fn run<R: Renderer>(mut self, mut renderer: R) -> usize {
        let mut rendered = 0;
        while let Some(record) = self.rx.recv().await {
            renderer.render(&record.render_line());
            rendered += 1;
        }

        debug!("result sink drained after {rendered} lines");
        rendered
    }
}
