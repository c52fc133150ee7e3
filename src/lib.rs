pub mod agent;
pub mod checks;
pub mod config;
pub mod console;
pub mod echo;
pub mod manager;
pub mod probes;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod tasks;
pub mod telemetry;
pub mod util;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp layout used on the wire and in rendered result lines.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text of the envelope an agent sends right after accepting a configuration.
pub const ACKNOWLEDGEMENT: &str = "Configuration received! Beginning checks...";

/// A timestamped probe outcome in transit between agent and manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub time: String,
    pub results: Value,
}

impl ResultEnvelope {
    pub fn new(time: DateTime<Local>, results: impl Into<Value>) -> Self {
        Self {
            time: time.format(TIME_FORMAT).to_string(),
            results: results.into(),
        }
    }

    pub fn now(results: impl Into<Value>) -> Self {
        Self::new(Local::now(), results)
    }

    pub fn acknowledgement() -> Self {
        Self::now(ACKNOWLEDGEMENT)
    }

    /// Renders the result payload for display: strings verbatim, anything else as JSON.
    pub fn results_text(&self) -> String {
        match &self.results {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
