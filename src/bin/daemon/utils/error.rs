//! Unified Error Handling System
//!
//! This module defines the error type shared by the hub, the settings store and
//! the operator console transports.

use thiserror::Error;

/// Enumeration of all error types in the daemon
#[derive(Error, Debug)]
pub enum ChatError {
    /// Invalid arguments error
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// System I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Data parsing error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Resource not found error (unknown join request slot, unknown host)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Moderation settings file could not be read or written
    #[error("Settings error: {0}")]
    SettingsError(String),

    /// Operator console transport error
    #[error("Console error: {0}")]
    ConsoleError(String),

    /// Generic system error
    #[error("System error: {0}")]
    SystemError(String),
}

impl From<std::num::ParseIntError> for ChatError {
    fn from(error: std::num::ParseIntError) -> Self {
        ChatError::ParseError(error.to_string())
    }
}

impl From<std::net::AddrParseError> for ChatError {
    fn from(error: std::net::AddrParseError) -> Self {
        ChatError::ParseError(error.to_string())
    }
}

impl From<regex::Error> for ChatError {
    fn from(error: regex::Error) -> Self {
        ChatError::InvalidArguments(error.to_string())
    }
}

impl From<toml::ser::Error> for ChatError {
    fn from(error: toml::ser::Error) -> Self {
        ChatError::SettingsError(error.to_string())
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(error: toml::de::Error) -> Self {
        ChatError::SettingsError(error.to_string())
    }
}

impl From<zeromq::ZmqError> for ChatError {
    fn from(error: zeromq::ZmqError) -> Self {
        ChatError::ConsoleError(error.to_string())
    }
}

/// Standardized result type for the entire daemon
pub type Result<T> = std::result::Result<T, ChatError>;
