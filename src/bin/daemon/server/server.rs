//! ZeroMQ operator console
//!
//! Serves the operator command vocabulary on a local REP socket so the shell
//! and the CLI can drive a running hub.

use super::command_registry::CommandRegistry;
use super::response_handler;
use crate::utils::error::{ChatError, Result};
use async_std::channel::Receiver;
use async_std::task;
use futures::FutureExt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use zeromq::prelude::*;
use zeromq::{RepSocket, ZmqMessage};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Maximum message size (1MB)
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Maximum retry attempts for sending replies
const MAX_SEND_RETRIES: usize = 3;

/// Filesystem path behind an `ipc://` endpoint
pub fn ipc_path(endpoint: &str) -> Option<PathBuf> {
    endpoint.strip_prefix("ipc://").map(PathBuf::from)
}

/// Operator console reachable over ZeroMQ
pub struct ConsoleServer {
    /// ZeroMQ reply socket for communication with operator tools
    socket: RepSocket,
    /// Socket file to clean up for `ipc://` endpoints
    socket_path: Option<PathBuf>,
}

impl ConsoleServer {
    /// Bind the console to `endpoint`
    ///
    /// A stale socket file left by a previous run is removed first.
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let socket_path = ipc_path(endpoint);
        if let Some(path) = &socket_path {
            let _ = fs::remove_file(path);
        }

        let mut socket = RepSocket::new();
        socket.bind(endpoint).await?;

        #[cfg(unix)]
        {
            if let Some(path) = &socket_path {
                if let Ok(metadata) = fs::metadata(path) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o660); // rw-rw----
                    let _ = fs::set_permissions(path, perms);
                }
            }
        }

        info!("Operator console listening on {}", endpoint);
        Ok(ConsoleServer {
            socket,
            socket_path,
        })
    }

    /// Close the console and remove its socket file
    pub fn shutdown(self) {
        info!("Shutting down operator console");
        if let Some(path) = &self.socket_path {
            let _ = fs::remove_file(path);
        }
    }

    /// Answer commands until the shutdown channel closes
    pub async fn run(
        &mut self,
        registry: Arc<CommandRegistry>,
        shutdown_rx: Receiver<()>,
    ) -> Result<()> {
        loop {
            futures::select! {
                msg = self.socket.recv().fuse() => {
                    match msg {
                        Ok(cmdline) => {
                            if let Err(e) = self.process_message(cmdline, &registry).await {
                                error!("Error processing console message: {}", e);
                            }
                        }
                        Err(e) => {
                            error!("Error receiving console message: {:?}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv().fuse() => {
                    info!("Shutdown signal received, stopping operator console");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Process a received message
    ///
    /// Commands block on hub I/O, so they run on the blocking pool.
    async fn process_message(
        &mut self,
        cmdline: ZmqMessage,
        registry: &Arc<CommandRegistry>,
    ) -> Result<()> {
        let cmd = match extract_command(&cmdline) {
            Ok(s) => s,
            Err(e) => return self.send_reply(format!("Error: {}", e)).await,
        };

        let registry = Arc::clone(registry);
        let reply =
            task::spawn_blocking(move || response_handler::format_response(registry.handle(&cmd)))
                .await;
        self.send_reply(reply).await
    }

    /// Send a reply with retry logic
    async fn send_reply(&mut self, reply: String) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.socket.send(ZmqMessage::from(reply.clone())).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Reply sent successfully on attempt {}", attempt + 1);
                    }
                    return Ok(());
                }
                Err(e) if attempt + 1 < MAX_SEND_RETRIES => {
                    warn!("Failed to send reply (attempt {}): {:?}", attempt + 1, e);
                    task::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Failed to send reply after {} attempts: {:?}", MAX_SEND_RETRIES, e);
                    return Err(ChatError::from(e));
                }
            }
        }
    }
}

/// Extract the command line from a ZeroMQ message with validation
///
/// # Returns
/// * `Result<String, String>` - The command string or an error message for the client
pub fn extract_command(msg: &ZmqMessage) -> std::result::Result<String, String> {
    let frame = msg
        .get(0)
        .ok_or_else(|| "Received empty message".to_string())?;

    if frame.len() > MAX_MESSAGE_SIZE {
        warn!("Message too large: {} bytes", frame.len());
        return Err(format!(
            "Message too large: {} bytes (max: {})",
            frame.len(),
            MAX_MESSAGE_SIZE
        ));
    }

    String::from_utf8(frame.to_vec()).map_err(|e| format!("Invalid UTF-8 message: {}", e))
}
