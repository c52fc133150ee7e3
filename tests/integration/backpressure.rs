//! The single telemetry slot pauses the checks while nobody takes results

use std::sync::Arc;
use std::time::Duration;

use netwatch::session::AgentPhase;

use crate::helpers::*;

#[tokio::test]
async fn test_checks_pause_while_disconnected() {
    let probe = Arc::new(CountingProbe::default());
    let agent = start_agent(probe.clone()).await;

    let (mut reader, writer, _) = handshake(agent.local_addr(), &tcp_config(&[9999], 1)).await;
    next_envelope(&mut reader).await;
    drop(reader);
    drop(writer);

    let mut state = agent.state();
    assert!(state.wait_for(AgentPhase::Reaccepting, Duration::from_secs(2)).await);

    // let the slot fill and the next put block
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let paused_at = probe.firings();
    tokio::time::sleep(Duration::from_millis(3000)).await;

    // free running this would be three more firings
    assert_eq!(probe.firings(), paused_at);
    assert_eq!(agent.phase(), AgentPhase::Reaccepting);

    // delivery resumes without restarting anything
    let (mut reader, _writer, _) = handshake(agent.local_addr(), &tcp_config(&[9999], 1)).await;
    next_envelope(&mut reader).await;
    let counter = probe.clone();
    wait_until(Duration::from_secs(3), || counter.firings() > paused_at).await;
    assert_eq!(agent.stats().scheduler_starts(), 1);

    agent.stop().await;
}
