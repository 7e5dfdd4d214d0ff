//! Chat Hub Module
//!
//! Shared state of the chat room and the activities that run over it:
//! - registry: admitted connections and per-host history
//! - moderation: ban rules, feature flags and their settings file
//! - join_queue: connections waiting for operator approval
//! - admission: the accept loop
//! - relay: per-connection readers, message filtering and broadcast
//! - operator: the operations behind the operator console
//! - activity: the buffered activity log
//!
//! The registry, the moderation store and the join queue live behind one
//! mutex. It is held only for short read-modify-write steps and never across
//! network I/O; sends work on a snapshot of stream handles.

pub mod activity;
pub mod admission;
pub mod join_queue;
pub mod moderation;
pub mod operator;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod hub_tests;

use activity::ActivityLog;
use async_std::channel::{self, Receiver, Sender};
use async_std::net::TcpStream;
use async_std::io::prelude::WriteExt;
use async_std::task;
use futures::FutureExt;
use join_queue::JoinQueue;
use moderation::ModerationStore;
use registry::{ConnectionId, ConnectionRegistry, ConnectionView};
use std::net::{Shutdown, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound for a single send to one peer
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix of hub-generated notices
pub const SYSTEM_PREFIX: &str = "[system]";

/// Prefix of operator announcements
pub const BROADCAST_PREFIX: &str = "[operator-broadcast]";

/// Prefix of the entry hint banner
pub const HINT_PREFIX: &str = "[operator-hint]";

/// Operator notices held while nobody prints them; newer ones are dropped
const NOTICE_BACKLOG: usize = 256;

/// Static settings of a running hub
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Address the listener is bound to
    pub bind_addr: SocketAddr,
    /// Maximum number of connections in the registry
    pub capacity: usize,
    /// Banner sent to every new connection
    pub entry_hint: Option<String>,
    /// Moderation settings file used by `forever` commands
    pub settings_path: PathBuf,
    /// How long a connection stays offline before the periodic sweep drops it
    pub offline_grace: Duration,
}

/// State guarded by the hub lock
pub struct HubState {
    pub registry: ConnectionRegistry<TcpStream>,
    pub moderation: ModerationStore,
    pub requests: JoinQueue<TcpStream>,
}

/// The chat room: shared state plus the activity log
pub struct Hub {
    options: HubOptions,
    state: Mutex<HubState>,
    activity: ActivityLog,
    /// Serializes broadcasts so every member sees lines in the same order
    broadcast_lock: async_std::sync::Mutex<()>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    notices_tx: Sender<String>,
    notices_rx: Receiver<String>,
}

impl Hub {
    pub fn new(options: HubOptions, moderation: ModerationStore, activity: ActivityLog) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let (notices_tx, notices_rx) = channel::bounded(NOTICE_BACKLOG);
        Arc::new(Self {
            options,
            state: Mutex::new(HubState {
                registry: ConnectionRegistry::new(),
                moderation,
                requests: JoinQueue::new(),
            }),
            activity,
            broadcast_lock: async_std::sync::Mutex::new(()),
            shutdown_tx,
            shutdown_rx,
            notices_tx,
            notices_rx,
        })
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Run `f` with exclusive access to the shared state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut HubState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Number of connections currently held in the registry
    pub fn active_count(&self) -> usize {
        self.with_state(|state| state.registry.len())
    }

    pub fn at_capacity(&self) -> bool {
        self.active_count() >= self.options.capacity
    }

    /// Point-in-time copy of the registry
    pub fn connections(&self) -> Vec<ConnectionView> {
        self.with_state(|state| state.registry.views())
    }

    /// Put a connection into the registry and start relaying its messages
    pub fn register(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> ConnectionId {
        let reader = stream.clone();
        let id = self.with_state(|state| state.registry.insert(stream, peer));
        self.activity.record(format!("User {} connected to server.", peer));
        debug!("Registered connection {} from {}", id, peer);
        relay::spawn_reader(Arc::clone(self), id, reader);
        id
    }

    /// Remove connections that have been offline for at least `grace`.
    ///
    /// # Returns
    /// * `usize` - The number of connections removed
    pub fn compact(&self, grace: Duration) -> usize {
        let removed = self.with_state(|state| state.registry.compact(grace, Instant::now()));
        for connection in &removed {
            let _ = connection.stream.shutdown(Shutdown::Both);
            self.activity.record(format!(
                "User {} ({}) removed from the chatting room.",
                connection.peer, connection.name
            ));
        }
        if !removed.is_empty() {
            info!("Compaction removed {} offline connection(s)", removed.len());
        }
        removed.len()
    }

    /// Tell the operator about something that needs attention
    pub fn notify_operator(&self, notice: String) {
        info!("{}", notice);
        if self.notices_tx.try_send(notice).is_err() {
            debug!("Operator notice dropped");
        }
    }

    /// Notices for the operator, in the order they were raised.
    ///
    /// The channel closes when shutdown is requested.
    pub fn operator_notices(&self) -> Receiver<String> {
        self.notices_rx.clone()
    }

    /// Ask every activity of the hub to stop
    pub fn request_shutdown(&self) {
        self.shutdown_tx.close();
        self.notices_tx.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_tx.is_closed()
    }

    /// Receiver that yields an error once shutdown was requested
    pub fn shutdown_signal(&self) -> Receiver<()> {
        self.shutdown_rx.clone()
    }
}

/// Periodically drop connections that stayed offline past the grace period
pub async fn run_compaction(hub: Arc<Hub>, interval: Duration) {
    let shutdown = hub.shutdown_signal();
    loop {
        futures::select! {
            _ = task::sleep(interval).fuse() => {
                hub.compact(hub.options().offline_grace);
            }
            _ = shutdown.recv().fuse() => break,
        }
    }
    debug!("Compaction task stopped");
}

/// Write one line to a peer, bounded by [`SEND_TIMEOUT`]
pub async fn send_line(stream: &TcpStream, line: &str) -> std::io::Result<()> {
    let mut stream = stream.clone();
    async_std::io::timeout(SEND_TIMEOUT, async move {
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    })
    .await
}

/// Format a hub notice line
pub fn system_line(text: &str) -> String {
    format!("{} {}\n", SYSTEM_PREFIX, text)
}
