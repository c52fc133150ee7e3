//! Agent side of the link: handshake, streaming, reaccept and shutdown

use std::sync::Arc;
use std::time::Duration;

use netwatch::{
    ACKNOWLEDGEMENT,
    protocol::ProtocolError,
    session::{AgentPhase, LinkState, Phase},
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::helpers::*;

#[tokio::test]
async fn test_acknowledges_then_streams_results() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;

    let (mut reader, _writer, ack) = handshake(agent.local_addr(), &tcp_config(&[9999], 1)).await;
    assert_eq!(ack.results_text(), ACKNOWLEDGEMENT);

    for _ in 0..2 {
        let envelope = next_envelope(&mut reader).await;
        assert_eq!(envelope.results_text(), "TCP check -- 127.0.0.1:9999 -- ok");
    }

    assert_eq!(agent.phase(), AgentPhase::Streaming);
    assert_eq!(agent.phase().link_state(), LinkState::Connected);
    assert_eq!(agent.stats().scheduler_starts(), 1);
    agent.stop().await;
}

#[tokio::test]
async fn test_one_task_per_configured_check() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;

    let (mut reader, _writer, _) =
        handshake(agent.local_addr(), &tcp_config(&[7001, 7002, 7003], 1)).await;

    for _ in 0..6 {
        next_envelope(&mut reader).await;
    }

    let per_target = probe.per_target();
    assert_eq!(per_target.len(), 3, "{per_target:?}");
    for count in per_target.values() {
        assert!((1..=3).contains(count), "{per_target:?}");
    }
    agent.stop().await;
}

#[tokio::test]
async fn test_reaccept_keeps_running_scheduler() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;
    let config = tcp_config(&[9999], 1);

    let (mut reader, writer, _) = handshake(agent.local_addr(), &config).await;
    next_envelope(&mut reader).await;
    drop(reader);
    drop(writer);

    let mut state = agent.state();
    assert!(state.wait_for(AgentPhase::Reaccepting, Duration::from_secs(2)).await);
    assert_eq!(agent.phase().link_state(), LinkState::Disconnected);
    let fired_before = probe.firings();

    let (mut reader, _writer, ack) = handshake(agent.local_addr(), &config).await;
    assert_eq!(ack.results_text(), ACKNOWLEDGEMENT);
    next_envelope(&mut reader).await;
    next_envelope(&mut reader).await;

    assert_eq!(agent.phase(), AgentPhase::Streaming);
    assert_eq!(agent.stats().connections(), 2);
    assert_eq!(agent.stats().scheduler_starts(), 1);

    // the same tasks pick up where they paused
    let counter = probe.clone();
    wait_until(Duration::from_secs(3), || counter.firings() > fired_before).await;
    assert_eq!(probe.per_target().len(), 1);
    agent.stop().await;
}

#[tokio::test]
async fn test_new_configuration_replaces_scheduler() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;

    let (reader, writer, _) = handshake(agent.local_addr(), &tcp_config(&[9999], 1)).await;
    drop(reader);
    drop(writer);

    let mut state = agent.state();
    assert!(state.wait_for(AgentPhase::Reaccepting, Duration::from_secs(2)).await);

    let (mut reader, _writer, _) = handshake(agent.local_addr(), &tcp_config(&[8888], 1)).await;

    // a result taken before the restart may still be in flight
    let mut seen_new_target = false;
    for _ in 0..3 {
        let envelope = next_envelope(&mut reader).await;
        if envelope.results_text() == "TCP check -- 127.0.0.1:8888 -- ok" {
            seen_new_target = true;
            break;
        }
    }

    assert!(seen_new_target);
    assert_eq!(agent.stats().scheduler_starts(), 2);
    agent.stop().await;
}

#[tokio::test]
async fn test_undecodable_configuration_rejected_then_recovers() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;

    let mut bad = TcpStream::connect(agent.local_addr()).await.unwrap();
    bad.write_all(b"{\"TCP\": [{\"ip_address\": \"127.0.0.1\", \"interval\": 1}]}\n")
        .await
        .unwrap();

    let stats = agent.stats();
    wait_until(Duration::from_secs(2), || stats.rejected() == 1).await;
    assert_eq!(agent.phase(), AgentPhase::Listening);
    assert_eq!(probe.firings(), 0);

    let (mut reader, _writer, ack) = handshake(agent.local_addr(), &tcp_config(&[9999], 1)).await;
    assert_eq!(ack.results_text(), ACKNOWLEDGEMENT);
    next_envelope(&mut reader).await;
    agent.stop().await;
}

#[tokio::test]
async fn test_stop_drains_and_closes_link() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;
    let state = agent.state();

    let (mut reader, _writer, _) = handshake(agent.local_addr(), &tcp_config(&[1, 2], 1)).await;
    next_envelope(&mut reader).await;

    let ((), elapsed) = timed(agent.stop()).await;
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(state.current(), AgentPhase::Closed);

    // anything still buffered was written before draining; then the link ends
    loop {
        match reader.next_frame().await {
            Ok(_) => continue,
            Err(ProtocolError::Closed) | Err(ProtocolError::Io(_)) => break,
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    let fired = probe.firings();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(probe.firings(), fired);
}
