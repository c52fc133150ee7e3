//! Real probes, real sockets: manager → agent → checks → agent → manager → sink

use std::sync::Arc;
use std::time::Duration;

use netwatch::{
    agent::{AgentServer, AgentSettings},
    checks::AgentConfig,
    config::{AgentAddress, ManagerConfig},
    echo::EchoServer,
    manager::{ManagerHandle, SessionSettings},
    probes::NetworkProbes,
    session::AgentPhase,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

async fn real_agent() -> netwatch::agent::AgentHandle {
    let probe = Arc::new(NetworkProbes::new().unwrap());
    AgentServer::bind(([127, 0, 0, 1], 0).into(), probe, AgentSettings::default())
        .await
        .unwrap()
        .spawn(&CancellationToken::new())
}

#[tokio::test]
async fn test_tcp_check_streams_to_manager_sink() {
    let agent = real_agent().await;
    let checks = AgentConfig::parse(
        r#"{"TCP": [{"ip_address": "127.0.0.1", "port": 9999, "interval": 1}]}"#,
    )
    .unwrap();
    let config = ManagerConfig::new().with(
        "local",
        AgentAddress::new("127.0.0.1", agent.local_addr().port()),
        checks,
    );

    let (lines_tx, mut lines) = mpsc::unbounded_channel::<String>();
    let manager = ManagerHandle::spawn(
        &config,
        lines_tx,
        SessionSettings::default(),
        &CancellationToken::new(),
    );

    let window = tokio::time::timeout(Duration::from_millis(3500), async {
        let mut results = 0;
        while let Some(line) = lines.recv().await {
            let from_local = line.contains("local (127.0.0.1:");
            if from_local && line.contains("-- TCP check -- 127.0.0.1:9999 -- ") {
                results += 1;
            }
            if results == 3 {
                break;
            }
        }
        results
    });
    assert_eq!(window.await.unwrap(), 3);

    let mut state = agent.state();
    manager.stop().await;
    assert!(state.wait_for(AgentPhase::Reaccepting, Duration::from_secs(1)).await);

    agent.stop().await;
}

#[tokio::test]
async fn test_echo_check_against_echo_server() {
    let echo = EchoServer::bind(([127, 0, 0, 1], 0).into())
        .await
        .unwrap()
        .spawn(&CancellationToken::new());
    let agent = real_agent().await;

    let config = AgentConfig::new().with(echo_check(echo.local_addr().port(), 1));
    let (mut reader, _writer, _) = handshake(agent.local_addr(), &config).await;

    let envelope = next_envelope(&mut reader).await;
    let port = echo.local_addr().port();
    let expected = format!("Echo server check -- 127.0.0.1:{port} -- echo received in");
    assert!(envelope.results_text().starts_with(&expected), "{}", envelope.results_text());

    agent.stop().await;
    echo.stop().await;
}
