use std::io::ErrorKind;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::checks::{NetworkTarget, UdpCheck};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const ECHO_TOKEN: &[u8] = b"netwatch echo check\n";

pub(super) async fn tcp(target: &NetworkTarget) -> Result<String> {
    let address = target.address();
    debug!("TCP probe connecting to {address}");

    let connect = TcpStream::connect((target.ip_address.as_str(), target.port));

    let status = match timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok(_stream)) => format!("port {} is open", target.port),
        Ok(Err(e)) => format!("port {} is closed: {e}", target.port),
        Err(_) => format!(
            "port {} is filtered: no answer within {}s",
            target.port,
            CONNECT_TIMEOUT.as_secs()
        ),
    };

    Ok(status)
}

pub(super) async fn udp(check: &UdpCheck) -> Result<String> {
    let target = &check.target;
    let socket = super::connected_udp(&target.ip_address, target.port).await?;
    socket.send(b"netwatch").await?;

    let mut buf = [0u8; 512];
    let status = match timeout(Duration::from_secs(check.timeout), socket.recv(&mut buf)).await {
        Ok(Ok(len)) => format!("port {} is open: received {len} bytes", target.port),
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            format!("port {} is closed", target.port)
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => format!(
            "port {} is open|filtered: no response within {}s",
            target.port, check.timeout
        ),
    };

    Ok(status)
}

/// Sends a token to an echo server and checks that the same bytes come back.
pub(super) async fn echo(target: &NetworkTarget) -> Result<String> {
    let started = Instant::now();
    let connect = TcpStream::connect((target.ip_address.as_str(), target.port));

    let mut stream = match timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Ok(format!("server unreachable: {e}")),
        Err(_) => return Ok("server unreachable: connection timed out".to_string()),
    };

    stream.write_all(ECHO_TOKEN).await?;

    let mut reply = vec![0u8; ECHO_TOKEN.len()];
    match timeout(CONNECT_TIMEOUT, stream.read_exact(&mut reply)).await {
        Ok(Ok(_)) if reply == ECHO_TOKEN => Ok(format!(
            "echo received in {}ms",
            started.elapsed().as_millis()
        )),
        Ok(Ok(_)) => Ok("response did not match the request".to_string()),
        Ok(Err(e)) => Ok(format!("connection dropped before echo: {e}")),
        Err(_) => Ok("no echo within timeout".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket};

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_tcp_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = tcp(&NetworkTarget::new("127.0.0.1", port)).await.unwrap();
        assert_eq!(status, format!("port {port} is open"));
    }

    #[tokio::test]
    async fn test_tcp_closed() {
        let port = closed_port().await;

        let status = tcp(&NetworkTarget::new("127.0.0.1", port)).await.unwrap();
        assert!(status.starts_with(&format!("port {port} is closed")), "{status}");
    }

    #[tokio::test]
    async fn test_udp_open_when_peer_answers() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..len], peer).await.unwrap();
        });

        let check = UdpCheck {
            target: NetworkTarget::new("127.0.0.1", port),
            timeout: 2,
            interval: 5,
        };
        let status = udp(&check).await.unwrap();
        assert_eq!(status, format!("port {port} is open: received 8 bytes"));
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = socket.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });

        let status = echo(&NetworkTarget::new("127.0.0.1", port)).await.unwrap();
        assert!(status.starts_with("echo received in"), "{status}");
    }

    #[tokio::test]
    async fn test_echo_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; ECHO_TOKEN.len()];
            socket.read_exact(&mut buf).await.unwrap();
            buf.reverse();
            socket.write_all(&buf).await.unwrap();
        });

        let status = echo(&NetworkTarget::new("127.0.0.1", port)).await.unwrap();
        assert_eq!(status, "response did not match the request");
    }

    #[tokio::test]
    async fn test_echo_unreachable() {
        let port = closed_port().await;

        let status = echo(&NetworkTarget::new("127.0.0.1", port)).await.unwrap();
        assert!(status.starts_with("server unreachable"), "{status}");
    }
}
