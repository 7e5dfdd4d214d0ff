//! Configuration Module
//!
//! Startup parameters of the chat hub daemon and the defaults they fall back to.

use crate::utils::error::{ChatError, Result};
use clap::Parser;
use std::fs;
use std::io::BufRead;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Constants for default settings
pub const DEFAULT_SETTINGS_PATH: &str = "config.toml";
pub const DEFAULT_LOG_PATH: &str = "log.txt";
pub const DEFAULT_HINT_PATH: &str = "hint.txt";
pub const DEFAULT_TRACE_PATH: &str = "chathubd.log";
pub const DEFAULT_CONSOLE_ENDPOINT: &str = "ipc:///tmp/chathubd.sock";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_OFFLINE_GRACE_SECS: u64 = 30;

/// Chat room broadcast hub
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Address to bind the chat listener to
    pub host: Option<String>,

    /// Maximum number of connections held at once
    pub capacity: Option<usize>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Moderation settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Activity log file, appended to on flush
    #[arg(long, default_value = DEFAULT_LOG_PATH)]
    pub log_file: PathBuf,

    /// Banner sent to every new connection
    #[arg(long, default_value = DEFAULT_HINT_PATH)]
    pub hint_file: PathBuf,

    /// Diagnostic trace file
    #[arg(long, default_value = DEFAULT_TRACE_PATH)]
    pub trace_file: PathBuf,

    /// ZeroMQ endpoint of the operator console
    #[arg(long, default_value = DEFAULT_CONSOLE_ENDPOINT)]
    pub console_endpoint: String,

    /// Do not serve the operator console over ZeroMQ
    #[arg(long)]
    pub no_ipc: bool,

    /// Seconds between compaction sweeps
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval: u64,

    /// Seconds a connection stays offline before a sweep removes it
    #[arg(long, default_value_t = DEFAULT_OFFLINE_GRACE_SECS)]
    pub offline_grace: u64,
}

/// Where to listen and how many connections to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub bind_addr: SocketAddr,
    pub capacity: usize,
}

impl Args {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace)
    }

    /// Resolve host, capacity and port.
    ///
    /// When any of the three is missing from the command line, all of them are
    /// read as one `host capacity port` line from `input`.
    pub fn endpoint<R: BufRead>(&self, input: R) -> Result<Endpoint> {
        match (&self.host, self.capacity, self.port) {
            (Some(host), Some(capacity), Some(port)) => build_endpoint(host, capacity, port),
            _ => read_endpoint(input),
        }
    }
}

fn build_endpoint(host: &str, capacity: usize, port: u16) -> Result<Endpoint> {
    if capacity == 0 {
        return Err(ChatError::InvalidArguments(
            "capacity must be at least 1".to_string(),
        ));
    }
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ChatError::InvalidArguments(format!("'{}' is not an IP address", host)))?;
    Ok(Endpoint {
        bind_addr: SocketAddr::new(ip, port),
        capacity,
    })
}

/// Parse a `host capacity port` line
pub fn read_endpoint<R: BufRead>(mut input: R) -> Result<Endpoint> {
    let mut line = String::new();
    input.read_line(&mut line)?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    let [host, capacity, port] = parts[..] else {
        return Err(ChatError::InvalidArguments(
            "expected '<host> <capacity> <port>'".to_string(),
        ));
    };
    build_endpoint(host, capacity.parse()?, port.parse()?)
}

/// Load the entry hint banner.
///
/// A missing or blank file means no hint. The hint always ends with a newline.
pub fn read_entry_hint(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    if text.ends_with('\n') {
        Some(text)
    } else {
        Some(format!("{}\n", text))
    }
}
