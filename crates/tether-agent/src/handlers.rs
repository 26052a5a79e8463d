//! Shell execution

use crate::router::CommandOutput;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Runs commands as external processes under a hard timeout
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    /// Create an executor that kills processes running longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Execution timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` with `args`, merging stdout and stderr.
    ///
    /// Every failure, including spawn errors and timeouts, is turned into an
    /// output value. A non-zero exit keeps the captured output and appends
    /// the exit status.
    pub async fn run(&self, program: &str, args: &[String]) -> CommandOutput {
        debug!("Executing process: {} {:?}", program, args);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput::Error(format!("Failed to run `{}`: {}", program, e));
            }
        };

        // Lines from both pipes arrive on one channel in the order they are read
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let outcome = tokio::time::timeout(self.timeout, async {
            let mut output = String::new();
            while let Some(chunk) = rx.recv().await {
                output.push_str(&chunk);
            }
            (output, child.wait().await)
        })
        .await;

        match outcome {
            Ok((output, Ok(status))) if status.success() => CommandOutput::Text(output),
            Ok((output, Ok(status))) => {
                let status = match status.code() {
                    Some(code) => format!("[exit status: {}]", code),
                    None => "[terminated by signal]".to_string(),
                };
                let output = output.trim_end();
                if output.is_empty() {
                    CommandOutput::Text(status)
                } else {
                    CommandOutput::Text(format!("{}\n{}", output, status))
                }
            }
            Ok((_, Err(e))) => {
                CommandOutput::Error(format!("Failed waiting for `{}`: {}", program, e))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out process {}: {}", program, e);
                }
                CommandOutput::Error(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs_f64()
                ))
            }
        }
    }
}

/// Forward `reader` line by line until EOF or until nobody listens
async fn pump_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Pipe read failed: {}", e);
                break;
            }
        }
    }
}
