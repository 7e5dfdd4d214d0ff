//! Join Requests
//!
//! Connections waiting for operator approval. Slots are numbered at enqueue
//! time and never removed: once resolved, a slot keeps its number with an
//! accepted/rejected tombstone so the operator can keep referring to it.

use crate::utils::error::{ChatError, Result};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

/// Operator decision on a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Accepted,
    Rejected,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Accepted => write!(f, "accepted"),
            Resolution::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug)]
enum SlotState<S> {
    Pending(S),
    Resolved(Resolution),
}

/// One join request
#[derive(Debug)]
pub struct JoinSlot<S> {
    pub peer: SocketAddr,
    state: SlotState<S>,
}

impl<S> JoinSlot<S> {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::Pending(_))
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self.state {
            SlotState::Pending(_) => None,
            SlotState::Resolved(resolution) => Some(resolution),
        }
    }
}

/// A pending connection handed back when its slot is resolved
#[derive(Debug)]
pub struct ResolvedRequest<S> {
    pub slot: usize,
    pub peer: SocketAddr,
    pub stream: S,
}

/// Arena of join requests indexed by slot number
#[derive(Debug)]
pub struct JoinQueue<S> {
    slots: Vec<JoinSlot<S>>,
}

impl<S> Default for JoinQueue<S> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<S> JoinQueue<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a connection for approval and return its slot number
    pub fn enqueue(&mut self, stream: S, peer: SocketAddr) -> usize {
        self.slots.push(JoinSlot {
            peer,
            state: SlotState::Pending(stream),
        });
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_pending()).count()
    }

    pub fn slots(&self) -> impl Iterator<Item = (usize, &JoinSlot<S>)> {
        self.slots.iter().enumerate()
    }

    /// Check that every slot exists, is still pending and is named once
    pub fn validate(&self, slots: &[usize]) -> Result<()> {
        if slots.is_empty() {
            return Err(ChatError::InvalidArguments(
                "at least one request number is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for &slot in slots {
            if !seen.insert(slot) {
                return Err(ChatError::InvalidArguments(format!(
                    "request {} is listed more than once",
                    slot
                )));
            }
            match self.slots.get(slot) {
                Some(entry) if entry.is_pending() => {}
                Some(_) => {
                    return Err(ChatError::NotFound(format!(
                        "request {} was already handled",
                        slot
                    )));
                }
                None => {
                    return Err(ChatError::NotFound(format!("request {} does not exist", slot)));
                }
            }
        }
        Ok(())
    }

    /// Resolve every slot in `slots`, or none of them if any is invalid
    pub fn resolve_batch(
        &mut self,
        slots: &[usize],
        resolution: Resolution,
    ) -> Result<Vec<ResolvedRequest<S>>> {
        self.validate(slots)?;

        let mut resolved = Vec::with_capacity(slots.len());
        for &slot in slots {
            let entry = &mut self.slots[slot];
            let state = std::mem::replace(&mut entry.state, SlotState::Resolved(resolution));
            if let SlotState::Pending(stream) = state {
                resolved.push(ResolvedRequest {
                    slot,
                    peer: entry.peer,
                    stream,
                });
            }
        }
        Ok(resolved)
    }
}
