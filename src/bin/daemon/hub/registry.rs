//! Connection Registry
//!
//! The authoritative table of admitted connections, in admission order, and
//! the per-host records that moderation commands address by IP. Host records
//! are only ever written through the registry, in lockstep with the
//! connections of that host, and survive compaction so that a host's history
//! still resolves after it disconnects.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Display name of a connection that has not sent a message yet
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// Stable identifier of an admitted connection
pub type ConnectionId = u64;

/// One admitted client
#[derive(Debug)]
pub struct Connection<S> {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub stream: S,
    pub name: String,
    pub online: bool,
    pub sent: u64,
    /// Set when the reader saw the peer hang up; such connections are no
    /// longer broadcast targets
    pub hung_up: bool,
    /// Set after a send failed or timed out. The outbound stream may hold a
    /// partial line, so nothing more is written to it.
    pub write_closed: bool,
    offline_since: Option<Instant>,
}

impl<S> Connection<S> {
    /// Registry key of the peer host
    pub fn host(&self) -> String {
        self.peer.ip().to_string()
    }

    fn set_online(&mut self, online: bool, now: Instant) {
        if online {
            self.offline_since = None;
        } else if self.online || self.offline_since.is_none() {
            self.offline_since = Some(now);
        }
        self.online = online;
    }
}

/// What the registry remembers about a peer host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub name: String,
    pub online: bool,
    pub sent: u64,
}

impl Default for HostRecord {
    fn default() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            online: true,
            sent: 0,
        }
    }
}

/// Read-only copy of a connection's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionView {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub name: String,
    pub online: bool,
    pub sent: u64,
}

/// Ordered table of admitted connections
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    connections: Vec<Connection<S>>,
    hosts: HashMap<String, HostRecord>,
    next_id: ConnectionId,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            hosts: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection: online, no messages, name `UNKNOWN`.
    ///
    /// The host record of the peer is reset the same way.
    pub fn insert(&mut self, stream: S, peer: SocketAddr) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        let connection = Connection {
            id,
            peer,
            stream,
            name: UNKNOWN_NAME.to_string(),
            online: true,
            sent: 0,
            hung_up: false,
            write_closed: false,
            offline_since: None,
        };
        self.hosts.insert(connection.host(), HostRecord::default());
        self.connections.push(connection);
        id
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    /// Every host ever admitted, including hosts whose connections were compacted
    pub fn hosts(&self) -> impl Iterator<Item = (&str, &HostRecord)> {
        self.hosts.iter().map(|(host, record)| (host.as_str(), record))
    }

    /// Display name for a host, `UNKNOWN` if it was never seen
    pub fn name_of(&self, host: &str) -> String {
        self.hosts
            .get(host)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    pub fn views(&self) -> Vec<ConnectionView> {
        self.connections
            .iter()
            .map(|c| ConnectionView {
                id: c.id,
                peer: c.peer,
                name: c.name.clone(),
                online: c.online,
                sent: c.sent,
            })
            .collect()
    }

    /// Count one received message against the connection and its host
    pub fn record_sent(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.get_mut(id) else {
            return false;
        };
        connection.sent += 1;
        let host = connection.host();
        self.hosts.entry(host).or_default().sent += 1;
        true
    }

    pub fn set_name(&mut self, id: ConnectionId, name: &str) -> bool {
        let Some(connection) = self.get_mut(id) else {
            return false;
        };
        connection.name = name.to_string();
        let host = connection.host();
        self.hosts.entry(host).or_default().name = name.to_string();
        true
    }

    /// Update liveness after a send attempt.
    ///
    /// # Returns
    /// * `Option<bool>` - The previous liveness, or None if the connection is gone
    pub fn set_online(&mut self, id: ConnectionId, online: bool) -> Option<bool> {
        self.set_online_at(id, online, Instant::now())
    }

    pub fn set_online_at(&mut self, id: ConnectionId, online: bool, now: Instant) -> Option<bool> {
        let connection = self.get_mut(id)?;
        let previous = connection.online;
        connection.set_online(online, now);
        let host = connection.host();
        self.hosts.entry(host).or_default().online = online;
        Some(previous)
    }

    /// A send to the connection failed; it goes offline and receives nothing more.
    ///
    /// # Returns
    /// * `Option<bool>` - The previous liveness, or None if the connection is gone
    pub fn mark_send_failed(&mut self, id: ConnectionId) -> Option<bool> {
        let now = Instant::now();
        let connection = self.get_mut(id)?;
        let previous = connection.online;
        connection.write_closed = true;
        connection.set_online(false, now);
        let host = connection.host();
        self.hosts.entry(host).or_default().online = false;
        Some(previous)
    }

    /// The peer closed its side; the connection goes offline for good
    pub fn mark_hung_up(&mut self, id: ConnectionId) -> Option<SocketAddr> {
        let now = Instant::now();
        let connection = self.get_mut(id)?;
        connection.hung_up = true;
        connection.set_online(false, now);
        let (peer, host) = (connection.peer, connection.host());
        self.hosts.entry(host).or_default().online = false;
        Some(peer)
    }

    /// Remove connections that have been offline for at least `grace`.
    ///
    /// Host records are kept. Returns the removed connections in admission order.
    pub fn compact(&mut self, grace: Duration, now: Instant) -> Vec<Connection<S>> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.connections.drain(..).partition(|c| match c.offline_since {
                Some(since) => !c.online && now.saturating_duration_since(since) >= grace,
                None => false,
            });
        self.connections = kept;
        removed
    }
}

impl<S: Clone> ConnectionRegistry<S> {
    /// Snapshot of broadcast targets: connections that are still writable and
    /// whose host passes `allowed`
    pub fn targets<F>(&self, allowed: F) -> Vec<(ConnectionId, SocketAddr, S)>
    where
        F: Fn(&str) -> bool,
    {
        self.connections
            .iter()
            .filter(|c| !c.hung_up && !c.write_closed && allowed(&c.host()))
            .map(|c| (c.id, c.peer, c.stream.clone()))
            .collect()
    }
}
