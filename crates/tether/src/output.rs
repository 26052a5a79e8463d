//! Where client output goes: the append-only log and the operator console

use crate::error::ServerError;
use crate::registry::ClientId;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One read from a client, with keepalive frames removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOutput {
    /// Client that sent the data
    pub id: ClientId,
    /// Decoded text
    pub text: String,
    /// The read filled the whole buffer, so the text continues in the next read
    pub continues: bool,
}

impl ClientOutput {
    /// Log record for this read, `Client #<id>: <text>\n\n`, or the bare
    /// text when it continues in the next read
    pub fn log_record(&self) -> String {
        if self.continues {
            self.text.clone()
        } else {
            format!("Client #{}: {}\n\n", self.id, self.text)
        }
    }
}

/// Consumer of client output
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Record one read
    async fn record(&self, output: &ClientOutput) -> Result<(), ServerError>;
}

/// Appends every read to a log file
#[derive(Debug)]
pub struct FileOutputSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileOutputSink {
    /// Append to `path`, creating it on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutputSink for FileOutputSink {
    async fn record(&self, output: &ClientOutput) -> Result<(), ServerError> {
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(output.log_record().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Prints every read to stdout under a `[#id output]` header
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutputSink;

#[async_trait]
impl OutputSink for ConsoleOutputSink {
    async fn record(&self, output: &ClientOutput) -> Result<(), ServerError> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "\n[#{} output]\n{}\n> ", output.id, output.text)?;
        stdout.flush()?;
        Ok(())
    }
}

/// Forwards every read to several sinks; one failing sink does not stop the rest
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl FanoutSink {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl OutputSink for FanoutSink {
    async fn record(&self, output: &ClientOutput) -> Result<(), ServerError> {
        for sink in &self.sinks {
            if let Err(e) = sink.record(output).await {
                warn!("Output sink failed for client #{}: {}", output.id, e);
            }
        }
        Ok(())
    }
}
