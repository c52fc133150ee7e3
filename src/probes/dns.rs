//! Minimal DNS client: one recursive query over UDP, first answer rendered

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow, bail, ensure};
use tracing::trace;

use crate::checks::DnsCheck;

const DNS_PORT: u16 = 53;
const DNS_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PACKET: usize = 4096;
const MAX_POINTER_JUMPS: usize = 16;

/// Outcome of a query that got an answer packet back
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Answers(Vec<String>),
    Failed(String),
}

pub(super) async fn dns(check: &DnsCheck) -> Result<String> {
    let resolution = query(&check.server, DNS_PORT, &check.query, &check.record_type).await?;

    Ok(match resolution {
        Resolution::Answers(answers) => format!(
            "Server is up -- {} resolved to {}",
            check.query,
            answers.first().map(String::as_str).unwrap_or_default()
        ),
        Resolution::Failed(reason) => format!("Could not resolve {}: {reason}", check.query),
    })
}

async fn query(server: &str, port: u16, name: &str, record_type: &str) -> Result<Resolution> {
    let qtype = record_type_code(record_type)
        .ok_or_else(|| anyhow!("unsupported record type `{record_type}`"))?;
    let id = query_id();
    let packet = build_query(id, name, qtype)?;

    let socket = super::connected_udp(server, port).await?;
    socket.send(&packet).await?;

    let mut buf = vec![0u8; MAX_PACKET];
    let len = match tokio::time::timeout(DNS_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(received) => received?,
        Err(_) => {
            return Ok(Resolution::Failed(format!(
                "no response within {}s",
                DNS_TIMEOUT.as_secs()
            )));
        }
    };

    trace!("received {len} byte DNS response from {server}");
    parse_response(&buf[..len], id)
}

/// Numeric QTYPE for the record types the probe can render
fn record_type_code(record_type: &str) -> Option<u16> {
    let code = match record_type.to_ascii_uppercase().as_str() {
        "A" => 1,
        "NS" => 2,
        "CNAME" => 5,
        "SOA" => 6,
        "PTR" => 12,
        "MX" => 15,
        "TXT" => 16,
        "AAAA" => 28,
        _ => return None,
    };
    Some(code)
}

fn query_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    (nanos & 0xffff) as u16
}

fn build_query(id: u16, name: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(12 + name.len() + 6);
    packet.extend_from_slice(&id.to_be_bytes());
    // standard query, recursion desired
    packet.extend_from_slice(&0x0100u16.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0; 6]);

    for label in name.trim_end_matches('.').split('.') {
        ensure!(
            !label.is_empty() && label.len() <= 63,
            "invalid domain name `{name}`"
        );
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes());
    Ok(packet)
}

fn parse_response(packet: &[u8], id: u16) -> Result<Resolution> {
    ensure!(packet.len() >= 12, "truncated DNS header");
    ensure!(u16_at(packet, 0)? == id, "DNS response id does not match the query");

    let flags = u16_at(packet, 2)?;
    let rcode = flags & 0x000f;
    if rcode != 0 {
        return Ok(Resolution::Failed(rcode_name(rcode).to_string()));
    }

    let questions = u16_at(packet, 4)?;
    let answers = u16_at(packet, 6)?;

    let mut offset = 12;
    for _ in 0..questions {
        let (_, next) = read_name(packet, offset)?;
        offset = next + 4;
    }

    let mut rendered = Vec::with_capacity(answers as usize);
    for _ in 0..answers {
        let (_, next) = read_name(packet, offset)?;
        let rtype = u16_at(packet, next)?;
        let rdlength = u16_at(packet, next + 8)? as usize;
        let rdata = next + 10;
        ensure!(rdata + rdlength <= packet.len(), "truncated DNS answer");

        rendered.push(render_record(packet, rtype, rdata, rdlength)?);
        offset = rdata + rdlength;
    }

    if rendered.is_empty() {
        return Ok(Resolution::Failed("no answer records".to_string()));
    }

    Ok(Resolution::Answers(rendered))
}

fn render_record(packet: &[u8], rtype: u16, start: usize, len: usize) -> Result<String> {
    let rdata = &packet[start..start + len];

    Ok(match rtype {
        1 if len == 4 => Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string(),
        28 if len == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ipv6Addr::from(octets).to_string()
        }
        2 | 5 | 6 | 12 => read_name(packet, start)?.0,
        15 => {
            let preference = u16_at(packet, start)?;
            let (exchange, _) = read_name(packet, start + 2)?;
            format!("{preference} {exchange}")
        }
        16 => {
            let mut text = String::new();
            let mut cursor = 0;
            while cursor < rdata.len() {
                let chunk = rdata[cursor] as usize;
                let end = (cursor + 1 + chunk).min(rdata.len());
                text.push_str(&String::from_utf8_lossy(&rdata[cursor + 1..end]));
                cursor = end;
            }
            text
        }
        other => format!("<type {other} record, {len} bytes>"),
    })
}

/// Reads a possibly compressed name; returns it with the offset just past it.
fn read_name(packet: &[u8], start: usize) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut offset = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *packet
            .get(offset)
            .ok_or_else(|| anyhow!("truncated DNS name"))? as usize;

        if len & 0xc0 == 0xc0 {
            let pointer = (u16_at(packet, offset)? & 0x3fff) as usize;
            end.get_or_insert(offset + 2);
            jumps += 1;
            ensure!(jumps <= MAX_POINTER_JUMPS, "DNS name compression loop");
            offset = pointer;
            continue;
        }

        if len == 0 {
            let end = end.unwrap_or(offset + 1);
            let name = if labels.is_empty() {
                ".".to_string()
            } else {
                labels.join(".")
            };
            return Ok((name, end));
        }

        let label = packet
            .get(offset + 1..offset + 1 + len)
            .ok_or_else(|| anyhow!("truncated DNS label"))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        offset += 1 + len;
    }
}

fn u16_at(packet: &[u8], offset: usize) -> Result<u16> {
    match packet.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => bail!("truncated DNS packet"),
    }
}

fn rcode_name(rcode: u16) -> &'static str {
    match rcode {
        1 => "format error",
        2 => "server failure",
        3 => "no such domain",
        4 => "not implemented",
        5 => "query refused",
        _ => "unknown error",
    }
}
