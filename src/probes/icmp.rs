use std::process::Output;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use crate::checks::IcmpCheck;

static REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"from ([^\s:]+).*?time[=<]\s*([\d.]+)\s*ms").expect("valid reply pattern")
});

static TTL_EXCEEDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)from ([^\s:]+).*time to live exceeded").expect("valid ttl pattern")
});

/// Sends one ICMP echo request through the system `ping`.
pub(super) async fn ping(check: &IcmpCheck) -> Result<String> {
    let output = ping_command(check)
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to run ping")?;

    trace!("ping {} exited with {}", check.host, output.status);

    interpret(check, &output)
}

#[cfg(target_os = "macos")]
fn ping_command(check: &IcmpCheck) -> Command {
    let mut command = Command::new("ping");
    command
        .arg("-c")
        .arg("1")
        .arg("-m")
        .arg(check.ttl.to_string())
        .arg("-W")
        .arg((check.timeout * 1000).to_string())
        .arg(&check.host);
    command
}

#[cfg(not(target_os = "macos"))]
fn ping_command(check: &IcmpCheck) -> Command {
    let mut command = Command::new("ping");
    command
        .arg("-n")
        .arg("-c")
        .arg("1")
        .arg("-t")
        .arg(check.ttl.to_string())
        .arg("-W")
        .arg(check.timeout.to_string())
        .arg(&check.host);
    command
}

fn interpret(check: &IcmpCheck, output: &Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    summarize(check, &stdout, output.status.code()).map_err(|_| {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow!("ping failed: {}", stderr.trim())
    })
}

/// Turns ping's report into a status line; `Err` when ping itself broke.
fn summarize(check: &IcmpCheck, stdout: &str, exit_code: Option<i32>) -> Result<String> {
    if let Some(captures) = REPLY.captures(stdout) {
        return Ok(format!(
            "reply from {} (seq {}) received in {}ms",
            &captures[1], check.sequence_number, &captures[2]
        ));
    }

    if let Some(captures) = TTL_EXCEEDED.captures(stdout) {
        return Ok(format!(
            "time to live ({}) exceeded at {}",
            check.ttl, &captures[1]
        ));
    }

    match exit_code {
        // ping ran, but nothing answered
        Some(1) => Ok("request timed out!".to_string()),
        Some(0) => Ok("no response!".to_string()),
        _ => bail!("unexpected ping result"),
    }
}
