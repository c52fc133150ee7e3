//! Echo server for exercising Echo checks: every byte received is sent back.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::tasks::TaskGroup;

/// Port the echo server listens on unless told otherwise
pub const DEFAULT_ECHO_PORT: u16 = 45446;

pub struct EchoServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl EchoServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind echo server to {addr}"))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn spawn(self, cancel: &CancellationToken) -> EchoHandle {
        let cancel = cancel.child_token();
        let local_addr = self.local_addr;

        EchoHandle {
            task: tokio::spawn(self.serve(cancel.clone())),
            local_addr,
            cancel,
        }
    }

    #[instrument(skip_all, fields(addr = %self.local_addr))]
    async fn serve(self, cancel: CancellationToken) {
        info!("echo server listening");
        let connections = TaskGroup::new(&cancel);

        loop {
            let (mut socket, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                        continue;
                    }
                },
            };

            debug!("client {peer} connected");
            let token = connections.token();
            connections.spawn(async move {
                let (mut reader, mut writer) = socket.split();
                tokio::select! {
                    _ = token.cancelled() => {}
                    copied = tokio::io::copy(&mut reader, &mut writer) => match copied {
                        Ok(bytes) => trace!("echoed {bytes} bytes to {peer}"),
                        Err(e) => debug!("connection to {peer} failed: {e}"),
                    },
                }
            });
        }

        connections.shutdown().await;
        info!("echo server stopped");
    }
}

pub struct EchoHandle {
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl EchoHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and every open connection.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("echo server task failed: {e}");
        }
    }
}
