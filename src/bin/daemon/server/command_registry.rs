//! Command Registry Module
//!
//! This module provides the command registration and execution system behind
//! the operator console. Commands are registered by name with a handler; the
//! registry splits a command line into words, validates argument counts and
//! dispatches to the handler.

use crate::utils::error::ChatError;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Result type for command execution
///
/// Represents the result of executing a command, containing either a success message string
/// or a command error.
pub type CommandResult = Result<String, CommandError>;

/// Error type for command handling
///
/// Enumerates possible errors that can occur during command processing:
/// - InvalidArguments: When commands receive incorrect or missing arguments
/// - UnknownCommand: When an unrecognized command is received
/// - ExecutionError: When command execution fails due to an underlying error
/// - EmptyCommand: When an empty command string is received
#[derive(Debug)]
pub enum CommandError {
    InvalidArguments(String),
    UnknownCommand(String),
    ExecutionError(Box<dyn std::error::Error + Send + Sync>),
    EmptyCommand,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            CommandError::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            CommandError::ExecutionError(err) => write!(f, "Execution error: {}", err),
            CommandError::EmptyCommand => write!(f, "Empty command"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ChatError> for CommandError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::InvalidArguments(msg) => CommandError::InvalidArguments(msg),
            other => CommandError::ExecutionError(Box::new(other)),
        }
    }
}

/// Trait for command handlers
///
/// Defines the interface that all command handlers must implement to be registered
/// in the command registry.
pub trait CommandHandler: Send + Sync {
    /// Execute the command with given arguments
    ///
    /// # Arguments
    /// * `args` - A slice of string arguments to pass to the command
    ///
    /// # Returns
    /// * `CommandResult` - The result of command execution
    fn execute(&self, args: &[&str]) -> CommandResult;

    /// Get command description
    fn description(&self) -> &str;

    /// Get expected argument count (None = any number)
    fn expected_args(&self) -> Option<usize> {
        None
    }

    /// Execute with both the split arguments and the untouched text after
    /// the command name. Handlers that need the operator's spacing override this.
    fn execute_line(&self, args: &[&str], _text: &str) -> CommandResult {
        self.execute(args)
    }
}

/// Command registry for dynamic command management
///
/// Manages a collection of registered commands, allowing for dynamic registration
/// and execution of commands by name. `help` and `listCommands` are answered by
/// the registry itself.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn CommandHandler>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Create a new command registry
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a command handler
    ///
    /// # Arguments
    /// * `name` - The name of the command to register
    /// * `handler` - The command handler to register
    pub fn register<S: Into<String>>(&mut self, name: S, handler: Box<dyn CommandHandler>) {
        let name = name.into();
        debug!("Registering command: {}", name);
        self.commands.insert(name, handler);
    }

    /// Handle a command string
    ///
    /// Parses and executes a command from a string, validating argument counts
    /// and returning appropriate results or errors.
    ///
    /// # Arguments
    /// * `cmdline` - The command line string to execute
    ///
    /// # Returns
    /// * `CommandResult` - The result of command execution
    pub fn handle(&self, cmdline: &str) -> CommandResult {
        debug!("Handling command: '{}'", cmdline);

        let parts: Vec<&str> = cmdline.split_whitespace().collect();
        let Some((cmd, args)) = parts.split_first() else {
            warn!("Received empty command");
            return Err(CommandError::EmptyCommand);
        };

        if matches!(*cmd, "help" | "listCommands") {
            return Ok(self.list_commands());
        }

        match self.commands.get(*cmd) {
            Some(handler) => {
                // Validate argument count if specified
                if let Some(expected) = handler.expected_args() {
                    if args.len() != expected {
                        return Err(CommandError::InvalidArguments(format!(
                            "{} expects {} arguments, got {}",
                            cmd,
                            expected,
                            args.len()
                        )));
                    }
                }

                info!("Executing command: {} with {} args", cmd, args.len());
                let text = cmdline.trim_start()[cmd.len()..].trim();
                handler.execute_line(args, text)
            }
            None => {
                warn!("Unknown command: {}", cmd);
                Err(CommandError::UnknownCommand(cmd.to_string()))
            }
        }
    }

    /// List all registered commands with descriptions
    ///
    /// # Returns
    /// * `String` - A formatted string listing all registered commands and their descriptions
    pub fn list_commands(&self) -> String {
        let mut commands: Vec<_> = self.commands.iter().collect();
        commands.sort_by_key(|(name, _)| *name);

        commands
            .iter()
            .map(|(name, handler)| format!("{}: {}", name, handler.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Macro to create simple command handlers
///
/// Creates a command handler that takes no arguments and returns a string result.
///
/// # Arguments
/// * `$desc` - Command description
/// * `$func` - Function to execute
#[macro_export]
macro_rules! simple_command {
    ($desc:expr, $func:expr) => {
        Box::new($crate::server::command_registry::SimpleCommand {
            description: $desc.to_string(),
            executor: Box::new($func),
        })
    };
}

/// Simple command handler (no arguments)
///
/// Handles commands that take no arguments and return a string result.
pub struct SimpleCommand {
    pub description: String,
    pub executor: Box<dyn Fn() -> CommandResult + Send + Sync>,
}

impl CommandHandler for SimpleCommand {
    fn execute(&self, _args: &[&str]) -> CommandResult {
        (self.executor)()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn expected_args(&self) -> Option<usize> {
        Some(0)
    }
}

/// Command handler taking a variable number of arguments
///
/// The executor parses its own arguments and reports malformed input as
/// `InvalidArguments`.
pub struct ArgsCommand {
    description: String,
    executor: Box<dyn Fn(&[&str]) -> CommandResult + Send + Sync>,
}

impl CommandHandler for ArgsCommand {
    fn execute(&self, args: &[&str]) -> CommandResult {
        (self.executor)(args)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Helper to create variadic command handlers
///
/// # Arguments
/// * `description` - The command description
/// * `executor` - The function to execute when the command is called
///
/// # Returns
/// * `Box<dyn CommandHandler>` - A boxed command handler
pub fn args_command<F>(description: &str, executor: F) -> Box<dyn CommandHandler>
where
    F: Fn(&[&str]) -> CommandResult + Send + Sync + 'static,
{
    Box::new(ArgsCommand {
        description: description.to_string(),
        executor: Box::new(executor),
    })
}

/// Command handler that receives the rest of the line as typed
pub struct TextCommand {
    description: String,
    executor: Box<dyn Fn(&str) -> CommandResult + Send + Sync>,
}

impl CommandHandler for TextCommand {
    fn execute(&self, args: &[&str]) -> CommandResult {
        (self.executor)(&args.join(" "))
    }

    fn execute_line(&self, _args: &[&str], text: &str) -> CommandResult {
        (self.executor)(text)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Helper to create a handler whose argument is free text, spacing preserved
pub fn text_command<F>(description: &str, executor: F) -> Box<dyn CommandHandler>
where
    F: Fn(&str) -> CommandResult + Send + Sync + 'static,
{
    Box::new(TextCommand {
        description: description.to_string(),
        executor: Box::new(executor),
    })
}
