//! Command batches, commands and their dispatch kinds

use std::fmt;

/// Separator between commands of a batch
pub const BATCH_SEPARATOR: char = ';';

/// Control token that ends the agent loop
pub const EXIT_TOKEN: &str = "exit-shell";

/// Namespace prefix routing a command to a named utility handler
pub const UTILITY_PREFIX: &str = "use";

/// Named utility handlers a command can address.
///
/// Unknown names are kept as `Unrecognized` so the router can answer with an
/// explicit "unsupported" result instead of falling back to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Utility {
    /// Screen and camera capture
    Photographer,
    /// UI input simulation
    UiManager,
    /// File transfer
    FileManager,
    /// Any other name, including a missing one
    Unrecognized(String),
}

impl Utility {
    /// Resolve a utility from its wire token
    pub fn from_token(token: &str) -> Self {
        match token {
            "photographer" => Self::Photographer,
            "ui_manager" => Self::UiManager,
            "file_manager" => Self::FileManager,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// The wire token for this utility
    pub fn name(&self) -> &str {
        match self {
            Self::Photographer => "photographer",
            Self::UiManager => "ui_manager",
            Self::FileManager => "file_manager",
            Self::Unrecognized(name) => name,
        }
    }
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a command is dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind<'a> {
    /// Terminate the agent loop
    Exit,
    /// Forward to a named utility handler
    Utility {
        /// Selected utility
        utility: Utility,
        /// Tokens after the prefix, the utility name first
        tokens: &'a [String],
    },
    /// Run an external process
    Shell {
        /// Program to execute
        program: &'a str,
        /// Program arguments
        args: &'a [String],
    },
}

/// A single command: a non-empty sequence of whitespace-separated tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    tokens: Vec<String>,
}

impl Command {
    /// Parse one command, returning `None` when it has no tokens
    pub fn parse(text: &str) -> Option<Self> {
        let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            None
        } else {
            Some(Self { tokens })
        }
    }

    /// Build a command from already split tokens
    pub fn from_tokens<I, S>(tokens: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            None
        } else {
            Some(Self { tokens })
        }
    }

    /// All tokens of the command
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Classify the command for dispatch
    pub fn kind(&self) -> CommandKind<'_> {
        // parse() never builds an empty command
        let Some((first, rest)) = self.tokens.split_first() else {
            return CommandKind::Shell {
                program: "",
                args: &[],
            };
        };

        match first.as_str() {
            EXIT_TOKEN => CommandKind::Exit,
            UTILITY_PREFIX => {
                let utility = rest
                    .first()
                    .map(|name| Utility::from_token(name))
                    .unwrap_or_else(|| Utility::Unrecognized(String::new()));
                CommandKind::Utility {
                    utility,
                    tokens: rest,
                }
            }
            program => CommandKind::Shell {
                program,
                args: rest,
            },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// An ordered sequence of commands decoded from one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    /// Split a frame payload on `;`, skipping empty commands
    pub fn parse(payload: &str) -> Self {
        let commands = payload
            .split(BATCH_SEPARATOR)
            .filter_map(Command::parse)
            .collect();
        Self { commands }
    }

    /// Commands in execution order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch holds no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate commands in order
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl<'a> IntoIterator for &'a CommandBatch {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for CommandBatch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_preserves_order() {
        let batch = CommandBatch::parse("cmd1;cmd2 -a;cmd3");
        let rendered: Vec<String> = batch.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["cmd1", "cmd2 -a", "cmd3"]);
    }

    #[test]
    fn test_batch_skips_empty_commands() {
        let batch = CommandBatch::parse(" ; ls ;;  \t ;pwd;");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.commands()[0].tokens(), ["ls"]);
        assert_eq!(batch.commands()[1].tokens(), ["pwd"]);
    }

    #[test]
    fn test_whitespace_tokenization() {
        let command = Command::parse("  echo   hello\tworld ").unwrap();
        assert_eq!(command.tokens(), ["echo", "hello", "world"]);
    }

    #[test]
    fn test_exit_kind() {
        let command = Command::parse("exit-shell now").unwrap();
        assert_eq!(command.kind(), CommandKind::Exit);
    }

    #[test]
    fn test_utility_kind() {
        let command = Command::parse("use photographer take-screenshot").unwrap();
        match command.kind() {
            CommandKind::Utility { utility, tokens } => {
                assert_eq!(utility, Utility::Photographer);
                assert_eq!(tokens, ["photographer", "take-screenshot"]);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_utility() {
        let command = Command::parse("use telescope zoom").unwrap();
        match command.kind() {
            CommandKind::Utility { utility, .. } => {
                assert_eq!(utility, Utility::Unrecognized("telescope".to_string()));
            }
            other => panic!("unexpected kind: {:?}", other),
        }

        let bare = Command::parse("use").unwrap();
        assert!(matches!(
            bare.kind(),
            CommandKind::Utility { utility: Utility::Unrecognized(name), tokens } if name.is_empty() && tokens.is_empty()
        ));
    }

    #[test]
    fn test_shell_kind() {
        let command = Command::parse("ls -la /tmp").unwrap();
        assert_eq!(
            command.kind(),
            CommandKind::Shell {
                program: "ls",
                args: &["-la".to_string(), "/tmp".to_string()],
            }
        );
    }

    #[test]
    fn test_utility_name_roundtrip() {
        for utility in [Utility::Photographer, Utility::UiManager, Utility::FileManager] {
            assert_eq!(Utility::from_token(utility.name()), utility);
        }
    }
}
