//! Operator console: line commands against the client registry

use crate::error::{Result, ServerError};
use crate::registry::{ClientId, ClientRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Console help text
pub const HELP: &str = "\
Commands:
  list                  Show all active clients
  select <id>           Choose a client for subsequent send commands
  send <command>        Send a command to the selected client
  broadcast <command>   Send a command to all clients
  kick <id>             Disconnect a client
  clear                 Clear the screen
  help                  Show this help
  quit | exit           Shut the server down";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Blank line
    Empty,
    /// `list`
    List,
    /// `select <id>`
    Select(ClientId),
    /// `send <command>`
    Send(String),
    /// `broadcast <command>`
    Broadcast(String),
    /// `kick <id>`
    Kick(ClientId),
    /// `clear`
    Clear,
    /// `help` or `?`
    Help,
    /// `quit`, `exit`, or end of input
    Quit,
}

impl ConsoleCommand {
    /// Parse one console line.
    ///
    /// Everything after `send` or `broadcast` is forwarded verbatim.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };

        match verb {
            "" => Ok(Self::Empty),
            "list" => Ok(Self::List),
            "select" => parse_id(arg, "select").map(Self::Select),
            "kick" => parse_id(arg, "kick").map(Self::Kick),
            "send" if arg.is_empty() => Err(usage("send <command>")),
            "send" => Ok(Self::Send(arg.to_string())),
            "broadcast" if arg.is_empty() => Err(usage("broadcast <command>")),
            "broadcast" => Ok(Self::Broadcast(arg.to_string())),
            "clear" => Ok(Self::Clear),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "EOF" => Ok(Self::Quit),
            other => Err(ServerError::Usage(format!(
                "Unknown command: {} (type help for a list)",
                other
            ))),
        }
    }
}

fn usage(syntax: &str) -> ServerError {
    ServerError::Usage(format!("Usage: {}", syntax))
}

fn parse_id(arg: &str, verb: &str) -> Result<ClientId> {
    arg.parse()
        .map_err(|_| usage(&format!("{} <id>", verb)))
}

/// What the console loop should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Print the text (if any) and read the next line
    Continue(String),
    /// Clear the screen
    Clear,
    /// Shut the server down
    Quit,
}

/// Console state: the registry and the current selection
pub struct Console {
    registry: Arc<ClientRegistry>,
    selected: Option<ClientId>,
}

impl Console {
    /// Create a console with nothing selected
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            selected: None,
        }
    }

    /// Currently selected client
    pub fn selected(&self) -> Option<ClientId> {
        self.selected
    }

    /// Prompt showing the selection, `[3]> ` or `[null]> `
    pub fn prompt(&self) -> String {
        match self.selected {
            Some(id) => format!("[{}]> ", id),
            None => "[null]> ".to_string(),
        }
    }

    /// Parse and run one line
    pub async fn execute_line(&mut self, line: &str) -> Outcome {
        match ConsoleCommand::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => Outcome::Continue(e.to_string()),
        }
    }

    /// Run one command
    pub async fn execute(&mut self, command: ConsoleCommand) -> Outcome {
        debug!("Console command: {:?}", command);
        let text = match command {
            ConsoleCommand::Empty => String::new(),
            ConsoleCommand::List => self.list(),
            ConsoleCommand::Select(id) => self.select(id),
            ConsoleCommand::Send(raw) => match self.selected {
                Some(id) => self.send_to(id, &raw).await,
                None => "Select a client first (select <id>)".to_string(),
            },
            ConsoleCommand::Broadcast(raw) => self.broadcast(&raw).await,
            ConsoleCommand::Kick(id) => self.kick(id).await,
            ConsoleCommand::Clear => return Outcome::Clear,
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Outcome::Quit,
        };
        Outcome::Continue(text)
    }

    fn list(&self) -> String {
        let sessions = self.registry.enumerate();
        if sessions.is_empty() {
            return "No clients connected.".to_string();
        }
        sessions
            .iter()
            .map(|s| {
                let marker = if Some(s.id) == self.selected { '*' } else { ' ' };
                format!("[{}] {}", marker, s)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn select(&mut self, id: ClientId) -> String {
        if self.registry.get(id).is_some() {
            self.selected = Some(id);
            format!("Selected client #{}", id)
        } else {
            "No such client id".to_string()
        }
    }

    async fn send_to(&self, id: ClientId, raw: &str) -> String {
        let Some(session) = self.registry.get(id) else {
            return ServerError::UnknownClient(id).to_string();
        };
        match session.handle.send_command(raw).await {
            Ok(true) => format!("[>] Sent to #{}: {}", id, raw),
            Ok(false) => format!("Send error to #{}: connection closed", id),
            Err(e) => format!("Send error to #{}: {}", id, e),
        }
    }

    async fn broadcast(&self, raw: &str) -> String {
        let ids = self.registry.ids();
        if ids.is_empty() {
            return "No clients connected.".to_string();
        }
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            lines.push(self.send_to(id, raw).await);
        }
        lines.join("\n")
    }

    async fn kick(&mut self, id: ClientId) -> String {
        let Some(session) = self.registry.get(id) else {
            return "No such client id".to_string();
        };
        // The reader task unregisters the client once its read is woken
        session.handle.close().await;
        if self.selected == Some(id) {
            self.selected = None;
        }
        format!("Kicked client #{}", id)
    }
}
