//! Operator operations
//!
//! Everything the operator console can do to a running hub. Each operation
//! performs its state change under the hub lock, then does its network I/O
//! (notices, broadcasts) on a snapshot.

use super::join_queue::Resolution;
use super::moderation::{ModerationStore, save_settings};
use super::{BROADCAST_PREFIX, Hub, send_line, system_line};
use crate::utils::error::{ChatError, Result};
use regex::Regex;
use serde::Serialize;
use std::cmp::Reverse;
use std::net::Shutdown;
use std::sync::Arc;
use tracing::{info, warn};

/// Notice sent when a join request is accepted
pub const ACCEPTED_NOTICE: &str = "The operator approved your request to join the chat room.";
/// Notice sent when a join request is rejected
pub const REJECTED_NOTICE: &str = "The operator rejected your request to join the chat room.";

/// Feature flags the operator can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// EAP: joining requires operator approval
    RequireApproval,
    /// SEM: joins are announced to the operator
    AnnounceOnJoin,
}

impl Flag {
    pub fn code(&self) -> &'static str {
        match self {
            Flag::RequireApproval => "EAP",
            Flag::AnnounceOnJoin => "SEM",
        }
    }
}

/// Which members a search selects
#[derive(Debug, Clone)]
pub enum SearchQuery {
    Ip(Regex),
    User(Regex),
    Online,
    Offline,
    Banned,
    SendTimes(u64),
}

/// One line of a search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub ip: String,
    pub username: String,
    pub online: bool,
    pub banned: bool,
    pub send_times: u64,
}

impl Hub {
    /// Persist the store if the command asked for it
    fn persist_if(&self, forever: bool, store: Option<ModerationStore>) -> Result<()> {
        match (forever, store) {
            (true, Some(store)) => save_settings(&self.options.settings_path, &store).map_err(|e| {
                ChatError::SettingsError(format!("change applied but not saved: {}", e))
            }),
            _ => Ok(()),
        }
    }

    fn snapshot_if(forever: bool, store: &ModerationStore) -> Option<ModerationStore> {
        forever.then(|| store.clone())
    }

    /// Ban IPs and tell the room who was banned
    pub async fn ban_ips(&self, ips: &[String], forever: bool) -> Result<String> {
        let (notices, store) = self.with_state(|state| {
            let notices: Vec<String> = ips
                .iter()
                .map(|ip| {
                    state.moderation.ban_ip(ip);
                    system_line(&format!(
                        "The operator banned user {} (username: {}).",
                        ip,
                        state.registry.name_of(ip)
                    ))
                })
                .collect();
            (notices, Self::snapshot_if(forever, &state.moderation))
        });

        for notice in &notices {
            self.broadcast(notice).await;
        }
        self.activity
            .record(format!("You banned ip {}.", ips.join(",")));
        self.persist_if(forever, store)?;
        Ok(format!("Banned IP {}", ips.join(", ")))
    }

    /// Lift IP bans; hosts that were not banned are skipped silently
    pub async fn unban_ips(&self, ips: &[String], forever: bool) -> Result<String> {
        let (notices, store) = self.with_state(|state| {
            let notices: Vec<String> = ips
                .iter()
                .filter(|ip| state.moderation.unban_ip(ip))
                .map(|ip| {
                    system_line(&format!(
                        "The operator lifted the ban on IP {} (username: {}).",
                        ip,
                        state.registry.name_of(ip)
                    ))
                })
                .collect();
            (notices, Self::snapshot_if(forever, &state.moderation))
        });

        for notice in &notices {
            self.broadcast(notice).await;
        }
        self.activity
            .record(format!("You unbanned ip {}.", ips.join(",")));
        self.persist_if(forever, store)?;
        Ok(format!("Unbanned IP {}", ips.join(", ")))
    }

    pub fn ban_words(&self, words: &[String], forever: bool) -> Result<String> {
        let store = self.with_state(|state| {
            for word in words {
                state.moderation.ban_word(word);
            }
            Self::snapshot_if(forever, &state.moderation)
        });
        self.activity
            .record(format!("You banned words {}.", words.join(",")));
        self.persist_if(forever, store)?;
        Ok(format!("Banned words {}", words.join(", ")))
    }

    pub fn unban_words(&self, words: &[String], forever: bool) -> Result<String> {
        let store = self.with_state(|state| {
            for word in words {
                state.moderation.unban_word(word);
            }
            Self::snapshot_if(forever, &state.moderation)
        });
        self.activity
            .record(format!("You unbanned words {}.", words.join(",")));
        self.persist_if(forever, store)?;
        Ok(format!("Unbanned words {}", words.join(", ")))
    }

    /// Limit relayed messages to `max_length` characters
    pub async fn set_max_length(&self, max_length: usize, forever: bool) -> Result<String> {
        let store = self.with_state(|state| {
            state.moderation.set_max_length(max_length);
            Self::snapshot_if(forever, &state.moderation)
        });
        self.broadcast(&system_line(&format!(
            "The operator limited messages to {} characters.",
            max_length
        )))
        .await;
        self.activity
            .record(format!("You limited message length: {}", max_length));
        self.persist_if(forever, store)?;
        Ok(format!("Maximum message length set to {}", max_length))
    }

    pub fn set_flag(&self, flag: Flag, enabled: bool, forever: bool) -> Result<String> {
        let store = self.with_state(|state| {
            match flag {
                Flag::RequireApproval => state.moderation.set_require_approval(enabled),
                Flag::AnnounceOnJoin => state.moderation.set_announce_on_join(enabled),
            }
            Self::snapshot_if(forever, &state.moderation)
        });
        let value = if enabled { "on" } else { "off" };
        let saved = if forever { " and saved it in config" } else { "" };
        self.activity
            .record(format!("You set {} as {}{}.", flag.code(), value, saved));
        self.persist_if(forever, store)?;
        Ok(format!("{} set to {}", flag.code(), value))
    }

    /// Admit the connections waiting in `slots`.
    ///
    /// Every slot is validated before any is resolved.
    pub async fn accept_requests(self: &Arc<Self>, slots: &[usize]) -> Result<String> {
        let resolved =
            self.with_state(|state| state.requests.resolve_batch(slots, Resolution::Accepted))?;

        let mut lines = Vec::with_capacity(resolved.len());
        for request in resolved {
            if let Err(e) = send_line(&request.stream, &system_line(ACCEPTED_NOTICE)).await {
                warn!("Approval notice to {} not delivered: {}", request.peer, e);
            }
            self.activity.record(format!(
                "<{}> User {} was accepted to enter the chatting room.",
                request.slot, request.peer
            ));
            self.register(request.stream, request.peer);
            lines.push(format!("Accepted request {} from {}", request.slot, request.peer));
        }
        Ok(lines.join("\n"))
    }

    /// Turn away the connections waiting in `slots`.
    ///
    /// Every slot is validated before any is resolved.
    pub async fn reject_requests(&self, slots: &[usize]) -> Result<String> {
        let resolved =
            self.with_state(|state| state.requests.resolve_batch(slots, Resolution::Rejected))?;

        let mut lines = Vec::with_capacity(resolved.len());
        for request in resolved {
            if let Err(e) = send_line(&request.stream, &system_line(REJECTED_NOTICE)).await {
                warn!("Rejection notice to {} not delivered: {}", request.peer, e);
            }
            let _ = request.stream.shutdown(Shutdown::Both);
            self.activity.record(format!(
                "<{}> User {} was rejected to enter the chatting room.",
                request.slot, request.peer
            ));
            lines.push(format!("Rejected request {} from {}", request.slot, request.peer));
        }
        Ok(lines.join("\n"))
    }

    /// Announce `message` to every member
    pub async fn operator_broadcast(&self, message: &str) -> String {
        self.activity
            .record(format!("You broadcasted msg '{}'", message));
        let report = self
            .broadcast(&format!("{} {}\n", BROADCAST_PREFIX, message))
            .await;

        let mut lines: Vec<String> = report
            .failed
            .iter()
            .map(|peer| {
                let name = self.with_state(|state| state.registry.name_of(&peer.ip().to_string()));
                format!("Broadcast to {} (username {}) failed.", peer, name)
            })
            .collect();
        lines.push(format!("Broadcast delivered to {} member(s)", report.delivered));
        lines.join("\n")
    }

    /// Select members by `query`, one row per host
    pub fn search(&self, query: &SearchQuery) -> Vec<MemberRow> {
        let mut rows: Vec<MemberRow> = self.with_state(|state| {
            state
                .registry
                .hosts()
                .map(|(ip, record)| MemberRow {
                    ip: ip.to_string(),
                    username: record.name.clone(),
                    online: record.online,
                    banned: state.moderation.is_banned(ip),
                    send_times: record.sent,
                })
                .collect()
        });

        rows.retain(|row| match query {
            SearchQuery::Ip(pattern) => pattern.is_match(&row.ip),
            SearchQuery::User(pattern) => pattern.is_match(&row.username),
            SearchQuery::Online => row.online,
            SearchQuery::Offline => !row.online,
            SearchQuery::Banned => row.banned,
            SearchQuery::SendTimes(min) => row.send_times >= *min,
        });

        match query {
            SearchQuery::Online | SearchQuery::SendTimes(_) => {
                rows.sort_by_key(|row| (Reverse(row.send_times), row.ip.clone()))
            }
            _ => rows.sort_by(|a, b| a.ip.cmp(&b.ip)),
        }
        rows
    }

    /// Write the buffered activity log to its file
    pub fn flush_activity(&self) -> Result<usize> {
        self.activity.flush()
    }

    /// Remove every offline connection now, regardless of grace period
    pub fn sweep(&self) -> usize {
        self.compact(std::time::Duration::ZERO)
    }

    /// Human-readable list of join request slots
    pub fn list_requests(&self) -> String {
        self.with_state(|state| {
            let lines: Vec<String> = state
                .requests
                .slots()
                .map(|(slot, request)| {
                    let status = request
                        .resolution()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "pending".to_string());
                    format!("<{}> {} {}", slot, request.peer, status)
                })
                .collect();
            if lines.is_empty() {
                "No join requests".to_string()
            } else {
                lines.join("\n")
            }
        })
    }

    /// JSON snapshot of the hub
    pub fn status(&self) -> serde_json::Value {
        self.with_state(|state| {
            serde_json::json!({
                "bind": self.options.bind_addr.to_string(),
                "capacity": self.options.capacity,
                "connections": state.registry.len(),
                "pending_requests": state.requests.pending_count(),
                "banned_ips": state.moderation.banned_ips().count(),
                "banned_words": state.moderation.banned_words().count(),
                "max_length": state.moderation.max_length(),
                "require_approval": state.moderation.require_approval(),
                "announce_on_join": state.moderation.announce_on_join(),
                "activity_buffered": self.activity.pending(),
            })
        })
    }

    /// Flush the activity log and stop the hub
    pub fn exit(&self) -> Result<String> {
        let flushed = self.flush_activity();
        info!("Exit requested by operator");
        self.request_shutdown();
        flushed.map(|n| format!("Flushed {} log entries, shutting down", n))
    }
}
