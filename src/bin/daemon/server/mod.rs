//! Server Module
//!
//! The operator console of the chat hub. One command vocabulary is served on
//! two transports:
//! - command_registry: command registration, argument checks and dispatch
//! - commands: the operator commands mapped onto hub operations
//! - response_handler: reply and table formatting
//! - console: the interactive console on stdin
//! - server: the ZeroMQ console used by the shell and the CLI

/// Command registry module - manages dynamic command registration and execution
pub mod command_registry;

/// Commands module - initializes and registers all operator commands with the registry
pub mod commands;

/// Console module - interactive operator console on stdin
pub mod console;

/// Response handler module - formats command results for the operator
pub mod response_handler;

/// Server module - implements the ZeroMQ communication layer and message handling
pub mod server;
