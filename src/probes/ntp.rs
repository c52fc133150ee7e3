use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use chrono::{DateTime, Utc};

use crate::checks::NtpCheck;

const NTP_PORT: u16 = 123;
const NTP_TIMEOUT: Duration = Duration::from_secs(5);
const PACKET_LEN: usize = 48;

/// Seconds between the NTP era (1900) and the Unix epoch
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

pub(super) async fn ntp(check: &NtpCheck) -> Result<String> {
    Ok(match query(&check.server, NTP_PORT).await? {
        Some(time) => format!(
            "Server is up -- Current time: {} UTC",
            time.format(crate::TIME_FORMAT)
        ),
        None => "Server is unreachable".to_string(),
    })
}

/// Asks `server` for its time; `None` if it never answered.
async fn query(server: &str, port: u16) -> Result<Option<DateTime<Utc>>> {
    let socket = super::connected_udp(server, port).await?;

    let mut request = [0u8; PACKET_LEN];
    // LI = 0, version 3, mode 3 (client)
    request[0] = 0x1b;
    socket.send(&request).await?;

    let mut response = [0u8; PACKET_LEN];
    let len = match tokio::time::timeout(NTP_TIMEOUT, socket.recv(&mut response)).await {
        Ok(received) => received?,
        Err(_) => return Ok(None),
    };

    Ok(Some(transmit_time(&response[..len])?))
}

fn transmit_time(packet: &[u8]) -> Result<DateTime<Utc>> {
    ensure!(packet.len() >= PACKET_LEN, "short NTP response ({} bytes)", packet.len());
    ensure!(packet[1] != 0, "server sent a kiss-o'-death packet");

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);

    let unix_seconds = i64::from(seconds) - NTP_UNIX_OFFSET;
    let nanos = ((u64::from(fraction) * 1_000_000_000) >> 32) as u32;

    DateTime::from_timestamp(unix_seconds, nanos)
        .ok_or_else(|| anyhow!("NTP timestamp out of range"))
}
