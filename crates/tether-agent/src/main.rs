//! Tether Agent Binary
//!
//! Connects to a Tether server and executes the commands it sends.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tether_agent::{AgentConfig, AgentLoop, CommandRouter, DisconnectPolicy};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tether-agent", version, about = "Command agent for Tether")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server host name or address
    #[arg(long, env = "TETHER_SERVER")]
    server: Option<String>,
    /// Server port
    #[arg(long, env = "TETHER_PORT")]
    port: Option<u16>,
    /// Shell command timeout in seconds
    #[arg(long)]
    command_timeout: Option<u64>,
    /// What a lost connection does to the current cycle
    #[arg(long, value_enum)]
    disconnect_policy: Option<DisconnectPolicy>,
}

impl Args {
    fn into_config(self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_json_file(path)?,
            None => AgentConfig::default(),
        };
        if let Some(server) = self.server {
            config.server_host = server;
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(secs) = self.command_timeout {
            config.command_timeout_secs = secs;
        }
        if let Some(policy) = self.disconnect_policy {
            config.disconnect_policy = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting Tether agent for {}:{}",
        config.server_host, config.server_port
    );

    // No utility handlers are built in; `use ...` commands report as unsupported
    let router = CommandRouter::new(config.command_timeout(), config.utility_timeout());
    let mut agent = AgentLoop::new(config, router);

    if let Some(shutdown) = agent.shutdown_sender() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown.send(());
            }
        });
    }

    if let Err(e) = agent.run().await {
        error!("Agent error: {:#}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
