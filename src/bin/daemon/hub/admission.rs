//! Admission Manager
//!
//! Accepts incoming connections while the registry has room, greets them with
//! the entry hint, drops banned peers and either admits each connection or
//! parks it as a join request.

use super::{HINT_PREFIX, Hub, send_line, system_line};
use crate::utils::error::Result;
use async_std::net::{TcpListener, TcpStream};
use async_std::task;
use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Idle time before the first keep-alive probe (180 minutes)
const KEEPALIVE_IDLE: Duration = Duration::from_secs(180 * 60);
/// Interval between keep-alive probes
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// How often a paused admission loop checks for free capacity
const CAPACITY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Delay before accepting again after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Notice sent to a connection parked for approval
pub const PENDING_NOTICE: &str = "This chat room requires the operator's approval to join, please wait.";

/// What the admission step decided for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Peer is banned, connection closed
    Dropped,
    /// Held as the join request with this slot number
    Pending(usize),
    /// Registered as a member
    Admitted,
}

/// Bind the chat listener.
///
/// Keep-alive probing is configured on the listening socket; accepted
/// connections inherit it.
pub fn bind_listener(addr: SocketAddr, backlog: usize) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    socket.set_tcp_keepalive(&keepalive)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog.max(1)).unwrap_or(i32::MAX))?;

    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from(listener))
}

/// Accept connections until shutdown is requested.
///
/// Accept errors are never fatal. While the registry is full the loop stops
/// accepting and waits for compaction to free a place.
pub async fn run_admission(hub: Arc<Hub>, listener: TcpListener) {
    let shutdown = hub.shutdown_signal();
    let mut paused = false;

    loop {
        if hub.is_shutting_down() {
            break;
        }

        if hub.at_capacity() {
            if !paused {
                warn!(
                    "Connection capacity ({}) reached, admission paused",
                    hub.options().capacity
                );
                paused = true;
            }
            task::sleep(CAPACITY_POLL_INTERVAL).await;
            continue;
        }
        if paused {
            info!("Capacity available again, admission resumed");
            paused = false;
        }

        futures::select! {
            accepted = listener.accept().fuse() => match accepted {
                Ok((stream, peer)) => {
                    admit(&hub, stream, peer).await;
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    task::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },
            _ = shutdown.recv().fuse() => break,
        }
    }
    debug!("Admission loop stopped");
}

/// Run the admission steps for one accepted connection
pub async fn admit(hub: &Arc<Hub>, stream: TcpStream, peer: SocketAddr) -> Admission {
    if let Some(hint) = &hub.options().entry_hint {
        if let Err(e) = send_line(&stream, &format!("{} {}", HINT_PREFIX, hint)).await {
            debug!("Entry hint to {} not delivered: {}", peer, e);
        }
    }

    let host = peer.ip().to_string();
    let (banned, require_approval, announce) = hub.with_state(|state| {
        let moderation = &state.moderation;
        (
            moderation.is_banned(&host),
            moderation.require_approval(),
            moderation.announce_on_join(),
        )
    });

    if banned {
        debug!("Dropping connection from banned {}", peer);
        let _ = stream.shutdown(Shutdown::Both);
        return Admission::Dropped;
    }

    if require_approval {
        let _ = send_line(&stream, &system_line(PENDING_NOTICE)).await;
        let slot = hub.with_state(|state| state.requests.enqueue(stream, peer));
        hub.activity()
            .record(format!("<{}> User {} requested to enter the chatting room.", slot, peer));
        hub.notify_operator(format!(
            "<{}> User {} requests to join the chat room, please respond.",
            slot, peer
        ));
        return Admission::Pending(slot);
    }

    if announce {
        hub.notify_operator(format!("User {} joined the chat room!", peer));
    }
    hub.register(stream, peer);
    Admission::Admitted
}
