//! Process-level command prompt shared by the binaries
//!
//! Prompts go to stderr so stdout carries nothing but result lines.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tracing::debug;

pub const STOP_COMMAND: &str = "stop";

/// Why [`Console::wait_for_stop`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Command,
    EndOfInput,
}

pub struct Console<R = Stdin> {
    lines: Lines<BufReader<R>>,
}

impl Console<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> Console<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Reads commands until `stop` (any case) or the end of input.
    pub async fn wait_for_stop(&mut self, prompt: &str) -> Result<StopReason> {
        loop {
            show_prompt(prompt);

            let Some(line) = self.lines.next_line().await? else {
                return Ok(StopReason::EndOfInput);
            };

            let command = line.trim();
            if command.eq_ignore_ascii_case(STOP_COMMAND) {
                return Ok(StopReason::Command);
            }
            if !command.is_empty() {
                eprintln!("Unknown command `{command}`");
                debug!("ignored console input {command:?}");
            }
        }
    }

    /// Like [`Console::wait_for_stop`], with Ctrl-C counting as the end of input.
    pub async fn wait_for_stop_or_interrupt(&mut self, prompt: &str) -> Result<StopReason> {
        tokio::select! {
            reason = self.wait_for_stop(prompt) => reason,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                Ok(StopReason::EndOfInput)
            }
        }
    }

    /// Asks a yes/no question; only `y`/`yes` count as yes, end of input as no.
    pub async fn confirm(&mut self, question: &str) -> Result<bool> {
        show_prompt(&format!("{question} [y/N] "));

        Ok(match self.lines.next_line().await? {
            Some(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            None => false,
        })
    }
}

fn show_prompt(prompt: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "{prompt}");
    let _ = stderr.flush();
}
