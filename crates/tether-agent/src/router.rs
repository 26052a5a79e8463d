//! Command routing to the shell and to utility handlers

use crate::handlers::ShellExecutor;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether_net::ConnectionHandle;
use tether_proto::{Command, CommandBatch, CommandKind, Utility};
use tracing::{debug, error, info, warn};

/// Handler for one named utility.
///
/// Receives the tokens following the `use` prefix, its own name first, and
/// returns a single text result. Unknown sub-commands should produce an
/// "unsupported" text rather than an error.
#[async_trait]
pub trait UtilityHandler: Send + Sync {
    /// Handle a utility command
    async fn handle(&self, tokens: &[String]) -> Result<String>;
}

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Captured output
    Text(String),
    /// Description of why the command produced no output
    Error(String),
}

impl CommandOutput {
    /// The text to report
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Error(text) => text,
        }
    }

    /// Check if this is an error result
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether there is nothing worth sending
    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// Outcome of dispatching one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The exit control token was received
    Exit,
    /// The command ran
    Output(CommandOutput),
}

/// Everything a batch produced, in order
#[derive(Debug, Clone, Default)]
pub struct RouteReport {
    /// Commands that ran, with their results
    pub results: Vec<(Command, CommandOutput)>,
    /// Routing stopped at an exit command
    pub exit_requested: bool,
}

/// Receives each result as soon as its command completes
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one non-empty result
    async fn deliver(&self, command: &Command, output: &CommandOutput);
}

#[async_trait]
impl ResultSink for ConnectionHandle {
    async fn deliver(&self, command: &Command, output: &CommandOutput) {
        if !self.send_output(output.text()).await {
            debug!("Could not report output of `{}`", command);
        }
    }
}

/// Routes commands to the shell or to registered utility handlers
pub struct CommandRouter {
    /// Shell execution path
    shell: ShellExecutor,
    /// Registered utility handlers
    utilities: HashMap<Utility, Arc<dyn UtilityHandler>>,
    /// Limit on a single utility call
    utility_timeout: Duration,
}

impl CommandRouter {
    /// Create a router with no utilities registered
    pub fn new(command_timeout: Duration, utility_timeout: Duration) -> Self {
        Self {
            shell: ShellExecutor::new(command_timeout),
            utilities: HashMap::new(),
            utility_timeout,
        }
    }

    /// Register the handler for a utility, replacing any previous one
    pub fn register_utility(&mut self, utility: Utility, handler: Arc<dyn UtilityHandler>) {
        debug!("Registered handler for utility: {}", utility);
        self.utilities.insert(utility, handler);
    }

    /// Check if a utility has a handler
    pub fn has_utility(&self, utility: &Utility) -> bool {
        self.utilities.contains_key(utility)
    }

    /// Dispatch a single command
    pub async fn dispatch(&self, command: &Command) -> Dispatch {
        match command.kind() {
            CommandKind::Exit => Dispatch::Exit,
            CommandKind::Utility { utility, tokens } => {
                Dispatch::Output(self.run_utility(&utility, tokens).await)
            }
            CommandKind::Shell { program, args } => Dispatch::Output(self.shell.run(program, args).await),
        }
    }

    async fn run_utility(&self, utility: &Utility, tokens: &[String]) -> CommandOutput {
        let handler = match (utility, self.utilities.get(utility)) {
            (Utility::Unrecognized(_), _) | (_, None) => {
                warn!("No handler registered for utility: {}", utility);
                return CommandOutput::Error(format!(
                    "Unsupported utility command: `{}`",
                    tokens.join(" ")
                ));
            }
            (_, Some(handler)) => Arc::clone(handler),
        };

        // Run on its own task so a panicking handler cannot take the loop down
        let owned = tokens.to_vec();
        let task = tokio::spawn(async move { handler.handle(&owned).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.utility_timeout, task).await {
            Ok(Ok(Ok(text))) => CommandOutput::Text(text),
            Ok(Ok(Err(e))) => {
                error!("Handler error for utility {}: {:#}", utility, e);
                CommandOutput::Error(format!("{:#}", e))
            }
            Ok(Err(e)) => {
                error!("Handler for utility {} failed: {}", utility, e);
                CommandOutput::Error(format!("Utility `{}` failed unexpectedly", utility))
            }
            Err(_) => {
                abort.abort();
                CommandOutput::Error(format!(
                    "Utility `{}` timed out after {} seconds",
                    utility,
                    self.utility_timeout.as_secs_f64()
                ))
            }
        }
    }

    /// Run a batch in order, delivering each non-empty result to `sink`
    /// before the next command starts.
    ///
    /// Stops at the first exit command; the commands after it never run.
    pub async fn route<S>(&self, batch: &CommandBatch, sink: &S) -> RouteReport
    where
        S: ResultSink + ?Sized,
    {
        let mut report = RouteReport::default();

        for command in batch {
            match self.dispatch(command).await {
                Dispatch::Exit => {
                    info!("Exit command received");
                    report.exit_requested = true;
                    break;
                }
                Dispatch::Output(output) => {
                    if !output.is_empty() {
                        sink.deliver(command, &output).await;
                    }
                    report.results.push((command.clone(), output));
                }
            }
        }

        report
    }
}
