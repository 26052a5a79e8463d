//! Agent main loop and reconnect policy

use crate::config::{AgentConfig, DisconnectPolicy};
use crate::router::CommandRouter;
use anyhow::{Context, Result};
use std::sync::Arc;
use tether_net::{Connection, Dialer, Received, TcpDialer};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Why a connection cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server sent the exit command
    Exit,
    /// The connection failed or could not be established
    Abandoned,
}

/// Main agent loop: connect, receive, route, reconnect
pub struct AgentLoop {
    /// Agent configuration
    config: AgentConfig,
    /// Dialer used for every connection cycle
    dialer: Arc<dyn Dialer>,
    /// Command router
    router: CommandRouter,
    /// Shutdown signal receiver
    shutdown_rx: Option<oneshot::Receiver<()>>,
    /// Shutdown signal sender (kept for graceful shutdown)
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AgentLoop {
    /// Create an agent dialing the configured server over TCP
    pub fn new(config: AgentConfig, router: CommandRouter) -> Self {
        let dialer = Arc::new(TcpDialer::new(
            &config.server_host,
            config.server_port,
            config.connection.connect_timeout(),
        ));
        Self::with_dialer(config, router, dialer)
    }

    /// Create an agent with a custom dialer
    pub fn with_dialer(config: AgentConfig, router: CommandRouter, dialer: Arc<dyn Dialer>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            config,
            dialer,
            router,
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get shutdown sender for graceful shutdown
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Run until the server sends the exit command or shutdown is signalled.
    ///
    /// Every connection cycle that ends without an exit command is followed
    /// by the reconnect cool-down.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting agent loop for {}", self.dialer.target());

        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .context("Shutdown receiver already taken")?;

        loop {
            let mut connection =
                Connection::new(self.config.connection.clone(), Arc::clone(&self.dialer));

            let outcome = tokio::select! {
                _ = &mut shutdown_rx => None,
                end = self.run_cycle(&mut connection) => Some(end),
            };
            connection.close().await;

            match outcome {
                None => {
                    info!("Received shutdown signal, stopping agent loop");
                    return Ok(());
                }
                Some(SessionEnd::Exit) => {
                    info!("Exit requested by server, stopping agent loop");
                    return Ok(());
                }
                Some(SessionEnd::Abandoned) => {}
            }

            let cooldown = self.config.reconnect_cooldown();
            info!("Connection abandoned, next connect cycle in {:?}", cooldown);
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Received shutdown signal, stopping agent loop");
                    return Ok(());
                }
                _ = tokio::time::sleep(cooldown) => {}
            }
        }
    }

    /// Connect once and serve commands until the connection is abandoned or
    /// the exit command arrives
    pub async fn run_cycle(&self, connection: &mut Connection) -> SessionEnd {
        if !connection.connect().await {
            return SessionEnd::Abandoned;
        }

        let handle = connection.handle();
        let threshold = self.config.receive_failure_threshold;
        let mut failures = 0u32;

        loop {
            let received = connection.receive_frame().await;
            match received {
                Received::Batch(batch) => {
                    failures = 0;
                    debug!("Routing batch of {} commands", batch.len());
                    let report = self.router.route(&batch, &handle).await;
                    if report.exit_requested {
                        return SessionEnd::Exit;
                    }
                }
                Received::Empty | Received::Keepalive => {}
                other => {
                    if other.is_disconnect()
                        && self.config.disconnect_policy == DisconnectPolicy::Reconnect
                    {
                        warn!("Connection lost ({:?}), reconnecting", other);
                        return SessionEnd::Abandoned;
                    }

                    failures += 1;
                    debug!("Receive failed ({}/{}): {:?}", failures, threshold, other);
                    if failures >= threshold {
                        warn!("{} consecutive receive failures, forcing reconnect", failures);
                        return SessionEnd::Abandoned;
                    }
                }
            }
        }
    }
}
