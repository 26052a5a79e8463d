//! Accept loop and per-client reader tasks

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::output::{ClientOutput, OutputSink};
use crate::registry::{ClientId, ClientRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tether_net::Connection;
use tether_proto::frame::{FRAME_END, FRAME_START, FRAME_TERMINATOR, KEEPALIVE_PAYLOAD};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Listening server
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    output: Arc<dyn OutputSink>,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(
        config: ServerConfig,
        registry: Arc<ClientRegistry>,
        output: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            registry,
            output,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared client registry
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept clients until the shutdown token is cancelled.
    ///
    /// Accept errors are logged and followed by a short pause.
    pub async fn run(self) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let connection = Connection::from_stream(stream, self.config.connection_config());
                    let id = self.registry.add(connection.handle(), addr).await;
                    debug!("Client #{} registered from {}", id, addr);

                    tokio::spawn(client_read_loop(
                        id,
                        connection,
                        Arc::clone(&self.registry),
                        Arc::clone(&self.output),
                        self.config.buffer_size,
                    ));
                }
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(self.config.accept_backoff()).await;
                }
            }
        }
        info!("Accept loop stopped");
    }
}

/// Forward everything a client sends to `output` until the connection ends,
/// then unregister and close it
pub async fn client_read_loop(
    id: ClientId,
    mut connection: Connection,
    registry: Arc<ClientRegistry>,
    output: Arc<dyn OutputSink>,
    buffer_size: usize,
) {
    loop {
        let chunk = match connection.receive_raw().await {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Client #{} read ended: {}", id, e);
                break;
            }
        };

        let text = strip_keepalives(&String::from_utf8_lossy(&chunk));
        if text.trim().is_empty() {
            continue;
        }

        let record = ClientOutput {
            id,
            text,
            continues: chunk.len() == buffer_size,
        };
        if let Err(e) = output.record(&record).await {
            warn!("Failed to record output from client #{}: {}", id, e);
        }
    }

    registry.remove(id).await;
    connection.close().await;
}

/// Remove keepalive frames from client text
pub fn strip_keepalives(text: &str) -> String {
    let ping = format!("{}{}{}", FRAME_START, KEEPALIVE_PAYLOAD, FRAME_END);
    text.replace(&format!("{}{}", ping, FRAME_TERMINATOR), "")
        .replace(&ping, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct ChannelSink(mpsc::UnboundedSender<ClientOutput>);

    #[async_trait]
    impl OutputSink for ChannelSink {
        async fn record(&self, output: &ClientOutput) -> Result<()> {
            let _ = self.0.send(output.clone());
            Ok(())
        }
    }

    type Started = (
        SocketAddr,
        Arc<ClientRegistry>,
        mpsc::UnboundedReceiver<ClientOutput>,
        CancellationToken,
    );

    async fn start(config: ServerConfig) -> Started {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ClientRegistry::new());
        let server = Server::bind(config, Arc::clone(&registry), Arc::new(ChannelSink(tx)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let token = server.shutdown_token();
        tokio::spawn(server.run());
        (addr, registry, rx, token)
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    async fn wait_for_clients(registry: &ClientRegistry, count: usize) {
        timeout(Duration::from_secs(5), async {
            while registry.len() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_strip_keepalives() {
        assert_eq!(strip_keepalives(">>ping<<\n"), "");
        assert_eq!(strip_keepalives(">>ping<<"), "");
        assert_eq!(
            strip_keepalives(">>ping<<\nOutput:\nhi\n>>ping<<\n"),
            "Output:\nhi\n"
        );
        assert_eq!(strip_keepalives("Output:\nping\n"), "Output:\nping\n");
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let (addr, _registry, _rx, _token) = start(local_config()).await;
        let config = ServerConfig {
            port: addr.port(),
            ..local_config()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Server::bind(config, Arc::new(ClientRegistry::new()), Arc::new(ChannelSink(tx))).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_client_output_recorded_and_pings_dropped() {
        let (addr, registry, mut rx, _token) = start(local_config()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 1).await;
        let id = registry.ids()[0];

        client.write_all(b">>ping<<\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"Output:\nhello\n").await.unwrap();

        let record = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.text, "Output:\nhello\n");
        assert!(!record.continues);
    }

    #[tokio::test]
    async fn test_full_buffer_read_continues() {
        let config = ServerConfig {
            buffer_size: 8,
            ..local_config()
        };
        let (addr, registry, mut rx, _token) = start(config).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 1).await;
        client.write_all(b"12345678").await.unwrap();

        let record = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.text, "12345678");
        assert!(record.continues);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let (addr, registry, _rx, _token) = start(local_config()).await;

        let client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 1).await;
        drop(client);
        wait_for_clients(&registry, 0).await;
    }

    #[tokio::test]
    async fn test_commands_reach_client_and_kick_closes_it() {
        let (addr, registry, _rx, _token) = start(local_config()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 1).await;
        let session = registry.get(registry.ids()[0]).unwrap();

        assert!(session.handle.send_command("whoami").await.unwrap());
        let mut buf = vec![0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b">>whoami<<\n");

        session.handle.close().await;
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        wait_for_clients(&registry, 0).await;
    }

    #[tokio::test]
    async fn test_idle_client_times_out() {
        let config = ServerConfig {
            idle_timeout_secs: 1,
            ..local_config()
        };
        let (addr, registry, _rx, _token) = start(config).await;

        let _client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(&registry, 1).await;
        timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, registry, _rx, token) = start(local_config()).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The listener is gone once the accept loop returns
        let connect = TcpStream::connect(addr).await;
        assert!(connect.is_err());
        assert!(registry.is_empty());
    }
}
