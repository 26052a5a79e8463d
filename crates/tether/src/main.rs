//! Tether Server Binary
//!
//! Accepts agent connections and runs the operator console on stdin.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tether::{
    ClientRegistry, Console, ConsoleOutputSink, FanoutSink, FileOutputSink, Notifier, Outcome,
    Server, ServerConfig, SessionEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tether-server", version, about = "Multi-client command server")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bind address
    #[arg(long)]
    host: Option<String>,
    /// Listening port
    #[arg(long)]
    port: Option<u16>,
    /// Socket read size
    #[arg(long)]
    buffer: Option<usize>,
    /// Output log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(buffer) = self.buffer {
            config.buffer_size = buffer;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = log_file;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Prints connects and disconnects for the operator
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, event: &SessionEvent) {
        info!("{}", event);
        let marker = match event {
            SessionEvent::Connected(_) => '+',
            SessionEvent::Disconnected(_) => '-',
        };
        println!("\n[{}] {}", marker, event);
    }
}

fn show_prompt(console: &Console) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{}", console.prompt());
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they do not mix with console output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    let registry = Arc::new(ClientRegistry::with_notifier(Arc::new(ConsoleNotifier)));
    let output = FanoutSink::new()
        .with(Arc::new(FileOutputSink::new(config.log_file.clone())))
        .with(Arc::new(ConsoleOutputSink));

    let server = Server::bind(config, Arc::clone(&registry), Arc::new(output)).await?;
    println!("[+] Listening on {}", server.local_addr()?);
    let shutdown = server.shutdown_token();
    let accept_task = tokio::spawn(server.run());

    let mut console = Console::new(Arc::clone(&registry));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Tether server - type help or ? to list commands.");

    loop {
        show_prompt(&console);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match console.execute_line(&line).await {
            Outcome::Continue(text) if text.is_empty() => {}
            Outcome::Continue(text) => println!("{}", text),
            Outcome::Clear => print!("\x1B[2J\x1B[1;1H"),
            Outcome::Quit => break,
        }
    }

    println!("Shutting down...");
    shutdown.cancel();
    registry.close_all().await;
    let _ = accept_task.await;
    Ok(())
}
