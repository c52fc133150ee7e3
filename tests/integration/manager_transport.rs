//! Manager side of the link: retries, reconnects, fan-in and shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netwatch::{
    ResultEnvelope,
    checks::AgentConfig,
    config::{AgentAddress, ManagerConfig},
    manager::ManagerHandle,
    protocol,
    session::SessionPhase,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

fn manager_for(
    agents: &[(&str, u16, AgentConfig)],
) -> (ManagerHandle, mpsc::UnboundedReceiver<String>) {
    let config = agents
        .iter()
        .fold(ManagerConfig::new(), |config, (name, port, checks)| {
            config.with(*name, AgentAddress::new("127.0.0.1", *port), checks.clone())
        });
    let (lines, lines_rx) = mpsc::unbounded_channel();

    let handle = ManagerHandle::spawn(
        &config,
        lines,
        fast_session_settings(),
        &CancellationToken::new(),
    );
    (handle, lines_rx)
}

async fn next_line(lines: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.recv())
        .await
        .expect("no line within 5s")
        .expect("sink closed")
}

#[tokio::test]
async fn test_retries_until_agent_comes_up() {
    let port = free_port().await;
    let (manager, mut lines) = manager_for(&[("late", port, tcp_config(&[9999], 1))]);
    let link = manager.agent("late").unwrap().clone();

    // refused for a while, retried at the fixed delay
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(link.phase(), SessionPhase::Connecting);
    let attempts = link.stats().connect_attempts();
    assert!((4..=7).contains(&attempts), "{attempts} attempts");

    let probe = Arc::new(CountingProbe::default());
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let agent = start_agent_at(addr, probe).await;

    let ack = next_line(&mut lines).await;
    let expected = format!("late (127.0.0.1:{port}) -- {}", netwatch::ACKNOWLEDGEMENT);
    assert!(ack.ends_with(&expected), "{ack}");
    let result = next_line(&mut lines).await;
    assert!(result.ends_with("-- TCP check -- 127.0.0.1:9999 -- ok"), "{result}");
    assert_eq!(link.phase(), SessionPhase::Streaming);

    manager.stop().await;
    agent.stop().await;
}

#[tokio::test]
async fn test_reconnects_after_agent_restart() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;
    let addr = agent.local_addr();

    let (manager, mut lines) = manager_for(&[("lab", addr.port(), tcp_config(&[9999], 1))]);
    let link = manager.agent("lab").unwrap().clone();
    next_line(&mut lines).await;
    next_line(&mut lines).await;

    agent.stop().await;
    let mut state = link.state();
    assert!(state.wait_for(SessionPhase::Connecting, Duration::from_secs(2)).await);

    let agent = start_agent_at(addr, probe).await;
    assert!(state.wait_for(SessionPhase::Streaming, Duration::from_secs(3)).await);
    assert_eq!(link.stats().connections(), 2);

    // results from before the restart may still be queued ahead of the new acknowledgement
    let mut acknowledged = false;
    for _ in 0..10 {
        if next_line(&mut lines).await.ends_with(netwatch::ACKNOWLEDGEMENT) {
            acknowledged = true;
            break;
        }
    }
    assert!(acknowledged);

    manager.stop().await;
    agent.stop().await;
}

#[tokio::test]
async fn test_results_from_all_agents_reach_one_sink() {
    let first = start_agent(Arc::new(CountingProbe::default())).await;
    let second = start_agent(Arc::new(CountingProbe::default())).await;

    let (manager, mut lines) = manager_for(&[
        ("first", first.local_addr().port(), tcp_config(&[1001], 1)),
        ("second", second.local_addr().port(), tcp_config(&[1002], 1)),
    ]);

    let mut from_first = false;
    let mut from_second = false;
    while !(from_first && from_second) {
        let line = next_line(&mut lines).await;
        from_first |= line.contains("first (") && line.contains("127.0.0.1:1001 -- ok");
        from_second |= line.contains("second (") && line.contains("127.0.0.1:1002 -- ok");
    }

    manager.stop().await;
    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_undecodable_messages_are_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let fake_agent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, writer) = stream.into_split();
        let mut reader = protocol::FrameReader::new(&mut reader);
        reader.next_frame().await.unwrap();

        let mut raw = writer;
        raw.write_all(b"this is not json\n").await.unwrap();
        let mut writer = protocol::FrameWriter::new(raw);
        writer.send(&ResultEnvelope::now("still here")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (manager, mut lines) = manager_for(&[("odd", port, AgentConfig::new())]);

    let line = next_line(&mut lines).await;
    assert!(line.ends_with(&format!("odd (127.0.0.1:{port}) -- still here")), "{line}");
    assert_eq!(manager.agent("odd").unwrap().stats().received(), 1);

    manager.stop().await;
    fake_agent.abort();
}

#[tokio::test]
async fn test_stop_is_bounded_and_sink_drains() {
    let agent = start_agent(Arc::new(CountingProbe::default())).await;
    let port = agent.local_addr().port();
    let (manager, mut lines) = manager_for(&[("lab", port, tcp_config(&[1, 2, 3], 1))]);
    let link = manager.agent("lab").unwrap().clone();

    next_line(&mut lines).await;
    next_line(&mut lines).await;

    let (rendered, elapsed) = timed(manager.stop()).await;
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(link.phase(), SessionPhase::Stopped);

    // every line the sink rendered is delivered, then the sink is gone
    let mut delivered = 0;
    while lines.recv().await.is_some() {
        delivered += 1;
    }
    assert_eq!(delivered + 2, rendered);

    let mut state = agent.state();
    assert!(state
        .wait_for(netwatch::session::AgentPhase::Reaccepting, Duration::from_secs(1))
        .await);
    agent.stop().await;
}
