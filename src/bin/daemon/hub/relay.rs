//! Relay Engine
//!
//! Every admitted connection gets a reader task. Each line it reads is
//! screened against the moderation store and, if accepted, broadcast
//! verbatim to every member, sender included.

use super::moderation::ModerationStore;
use super::registry::ConnectionId;
use super::{Hub, send_line};
use async_std::io::BufReader;
use async_std::io::prelude::{BufReadExt, ReadExt};
use async_std::net::TcpStream;
use async_std::task;
use futures::future::join_all;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest line, terminator excluded, a client may send before its
/// connection is treated as dead (1MB)
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Outcome of screening one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The sender's IP is banned; nothing is counted
    Muted,
    /// Nothing to relay; nothing is counted
    Empty,
    /// Longer than the configured maximum
    TooLong,
    /// Contains the given banned word
    BannedWord(String),
    /// Relay the message; `name` is the sender's display name
    Relay { name: String },
}

impl Verdict {
    /// Whether the message counts against the sender's send counter
    pub fn counts(&self) -> bool {
        !matches!(self, Verdict::Muted | Verdict::Empty)
    }
}

/// Decide what happens to `message` sent from `host`.
///
/// Checks run in order: banned sender, empty message, length limit, banned
/// words. The display name is the text before the first `:`.
pub fn screen(store: &ModerationStore, host: &str, message: &str) -> Verdict {
    if store.is_banned(host) {
        return Verdict::Muted;
    }
    if message.is_empty() {
        return Verdict::Empty;
    }
    if store.exceeds_length(message) {
        return Verdict::TooLong;
    }
    if let Some(word) = store.first_banned_word(message) {
        return Verdict::BannedWord(word.to_string());
    }
    let name = message.split(':').next().unwrap_or(message);
    Verdict::Relay {
        name: name.to_string(),
    }
}

/// Result of delivering one line to the membership snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<SocketAddr>,
}

impl Hub {
    /// Send `line` to every writable member that is not banned.
    ///
    /// A failed send marks that member offline and moves on to the next one.
    /// A send cut short by the timeout may leave part of the line in the
    /// socket, so the write half is shut down and the member gets nothing
    /// more; it stays registered until compaction.
    pub async fn broadcast(&self, line: &str) -> BroadcastReport {
        let _ordered = self.broadcast_lock.lock().await;

        let targets = self.with_state(|state| {
            let moderation = &state.moderation;
            state.registry.targets(|host| !moderation.is_banned(host))
        });

        let outcomes = join_all(targets.into_iter().map(|(id, peer, stream)| async move {
            let result = send_line(&stream, line).await;
            if result.is_err() {
                let _ = stream.shutdown(Shutdown::Write);
            }
            (id, peer, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, peer, result) in outcomes {
            match result {
                Ok(()) => {
                    self.with_state(|state| state.registry.set_online(id, true));
                    report.delivered += 1;
                }
                Err(e) => {
                    debug!("Send to {} failed: {}", peer, e);
                    let previous = self.with_state(|state| state.registry.mark_send_failed(id));
                    if previous == Some(true) {
                        self.activity
                            .record(format!("User {} went offline (send failed).", peer));
                    }
                    report.failed.push(peer);
                }
            }
        }
        report
    }

    /// Screen one line received from connection `id` and relay it if allowed
    pub async fn relay_message(&self, id: ConnectionId, raw: &str) -> Option<Verdict> {
        let message = raw.trim_end_matches(['\n', '\r']);

        let (peer, verdict) = self.with_state(|state| {
            let connection = state.registry.get(id)?;
            let peer = connection.peer;
            let verdict = screen(&state.moderation, &connection.host(), message);
            if verdict.counts() {
                state.registry.record_sent(id);
            }
            if let Verdict::Relay { name } = &verdict {
                state.registry.set_name(id, name);
            }
            Some((peer, verdict))
        })?;

        match &verdict {
            Verdict::Relay { .. } => {
                self.activity
                    .record(format!("User {} sent a message: {}", peer, message));
                self.broadcast(&format!("{}\n", message)).await;
            }
            Verdict::TooLong => debug!("Dropped over-long message from {}", peer),
            Verdict::BannedWord(word) => debug!("Dropped message from {} containing '{}'", peer, word),
            Verdict::Muted => debug!("Dropped message from banned {}", peer),
            Verdict::Empty => {}
        }
        Some(verdict)
    }

    /// The reader of connection `id` stopped; mark it offline for compaction
    fn reader_closed(&self, id: ConnectionId) {
        if let Some(peer) = self.with_state(|state| state.registry.mark_hung_up(id)) {
            self.activity
                .record(format!("User {} disconnected from server.", peer));
        }
    }
}

/// Length of a received line without its `\n` or `\r\n` terminator
fn payload_len(buf: &[u8]) -> usize {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line).len()
}

/// Start the reader task of an admitted connection
pub fn spawn_reader(hub: Arc<Hub>, id: ConnectionId, stream: TcpStream) {
    task::spawn(async move {
        let peer = stream.peer_addr().ok();
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES as u64 + 3)
                .read_until(b'\n', &mut buf)
                .await;

            match read {
                Ok(0) => break,
                Ok(_) if payload_len(&buf) > MAX_LINE_BYTES => {
                    warn!("Line from {:?} exceeds {} bytes, dropping connection", peer, MAX_LINE_BYTES);
                    break;
                }
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    if hub.relay_message(id, &text).await.is_none() {
                        // Connection was compacted away
                        break;
                    }
                }
                Err(e) => {
                    debug!("Read from {:?} failed: {}", peer, e);
                    break;
                }
            }
        }

        hub.reader_closed(id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_relays_and_extracts_name() {
        let store = ModerationStore::default();
        assert_eq!(
            screen(&store, "10.0.0.1", "alice: hello"),
            Verdict::Relay {
                name: "alice".to_string()
            }
        );
        assert_eq!(
            screen(&store, "10.0.0.1", "no delimiter"),
            Verdict::Relay {
                name: "no delimiter".to_string()
            }
        );
    }

    #[test]
    fn test_screen_order() {
        let mut store = ModerationStore::default();
        store.ban_word("spam");
        store.set_max_length(10);

        // Length is checked before words
        assert_eq!(screen(&store, "10.0.0.1", "bob: spam spam spam"), Verdict::TooLong);
        assert_eq!(
            screen(&store, "10.0.0.1", "bob: spam"),
            Verdict::BannedWord("spam".to_string())
        );
        assert_eq!(screen(&store, "10.0.0.1", ""), Verdict::Empty);

        // A banned sender is muted before anything else
        store.ban_ip("10.0.0.1");
        assert_eq!(screen(&store, "10.0.0.1", ""), Verdict::Muted);
        assert_eq!(screen(&store, "10.0.0.1", "bob: spam"), Verdict::Muted);
    }

    #[test]
    fn test_payload_len_ignores_terminator() {
        assert_eq!(payload_len(b"abc\n"), 3);
        assert_eq!(payload_len(b"abc\r\n"), 3);
        assert_eq!(payload_len(b"abc"), 3);
        assert_eq!(payload_len(b"\n"), 0);

        let mut full = vec![b'x'; MAX_LINE_BYTES];
        full.extend_from_slice(b"\r\n");
        assert_eq!(payload_len(&full), MAX_LINE_BYTES);
    }

    #[test]
    fn test_filtered_messages_still_count() {
        assert!(Verdict::TooLong.counts());
        assert!(Verdict::BannedWord("x".to_string()).counts());
        assert!(
            Verdict::Relay {
                name: "a".to_string()
            }
            .counts()
        );
        assert!(!Verdict::Muted.counts());
        assert!(!Verdict::Empty.counts());
    }
}
