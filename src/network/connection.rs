//! Connection State Machine
//!
//! Per-participant connection lifecycle with validated transitions.
//!
//! | From         | Allowed targets              |
//! |--------------|------------------------------|
//! | CONNECTING   | CONNECTED, DISCONNECTED      |
//! | CONNECTED    | DISCONNECTED, RECONNECTING   |
//! | DISCONNECTED | CONNECTING, RECONNECTING     |
//! | RECONNECTING | CONNECTED, DISCONNECTED      |
//!
//! No state is terminal. Requests outside the table are rejected without
//! side effects other than a counter bump.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{ParticipantId, Subscriber, Subscribers, SubscriptionId};

/// Default number of transitions kept per participant.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

// =============================================================================
// STATES
// =============================================================================

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Transport handshake in progress.
    Connecting,
    /// Live and exchanging messages.
    Connected,
    /// Not connected. May always connect or reconnect again.
    Disconnected,
    /// Reconnection pipeline running.
    Reconnecting,
}

impl ConnectionState {
    /// Every state.
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Reconnecting,
    ];

    /// Is `self → to` in the transition table?
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
        )
    }

    /// Uppercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one accepted transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Participant whose connection changed.
    pub participant: ParticipantId,
    /// Previous state.
    pub from: ConnectionState,
    /// New state.
    pub to: ConnectionState,
    /// When the transition was accepted.
    pub timestamp: DateTime<Utc>,
    /// Global, strictly increasing sequence number.
    pub sequence: u64,
    /// Why the transition happened.
    pub reason: Option<String>,
}

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Debug)]
struct ConnectionRecord {
    state: ConnectionState,
    last_liveness: Instant,
    history: VecDeque<StateTransition>,
}

/// Tracks every participant's connection state.
///
/// Safe to share across tasks. Each transition is applied under the
/// participant's entry lock; subscribers are notified after the lock is
/// released, synchronously within the `transition` call.
pub struct ConnectionStateMachine {
    records: DashMap<ParticipantId, ConnectionRecord>,
    sequence: AtomicU64,
    rejected: AtomicU64,
    history_limit: usize,
    subscribers: Subscribers<StateTransition>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConnectionStateMachine {
    /// Create a state machine keeping at most `history_limit` transitions
    /// per participant.
    pub fn new(history_limit: usize) -> Self {
        Self {
            records: DashMap::new(),
            sequence: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            history_limit: history_limit.max(1),
            subscribers: Subscribers::new(),
        }
    }

    /// Register a participant in `state`.
    ///
    /// Re-initializing a known participant forces the new state and resets
    /// liveness but keeps the transition history.
    pub fn initialize(&self, participant: ParticipantId, state: ConnectionState) {
        match self.records.entry(participant) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                warn!(
                    participant = %participant,
                    from = %record.state,
                    to = %state,
                    "Connection re-initialized; keeping history"
                );
                record.state = state;
                record.last_liveness = Instant::now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ConnectionRecord {
                    state,
                    last_liveness: Instant::now(),
                    history: VecDeque::new(),
                });
                debug!(participant = %participant, state = %state, "Connection initialized");
            }
        }
    }

    /// Request a transition. Returns `false` (and changes nothing) if the
    /// participant is unknown or the pair is not in the table.
    pub fn transition(
        &self,
        participant: &ParticipantId,
        to: ConnectionState,
        reason: Option<&str>,
    ) -> bool {
        let accepted = {
            let Some(mut record) = self.records.get_mut(participant) else {
                debug!(participant = %participant, to = %to, "Transition for unknown participant");
                return false;
            };

            let from = record.state;
            if !from.can_transition_to(to) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(participant = %participant, from = %from, to = %to, "Transition rejected");
                return false;
            }

            let transition = StateTransition {
                participant: *participant,
                from,
                to,
                timestamp: Utc::now(),
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                reason: reason.map(str::to_string),
            };

            record.state = to;
            if to == ConnectionState::Connected {
                record.last_liveness = Instant::now();
            }
            if record.history.len() == self.history_limit {
                record.history.pop_front();
            }
            record.history.push_back(transition.clone());
            transition
        };

        info!(
            participant = %participant,
            from = %accepted.from,
            to = %accepted.to,
            seq = accepted.sequence,
            reason = accepted.reason.as_deref().unwrap_or(""),
            "Connection state changed"
        );
        self.subscribers.publish(&accepted);
        true
    }

    /// Current state, if registered.
    pub fn current_state(&self, participant: &ParticipantId) -> Option<ConnectionState> {
        self.records.get(participant).map(|r| r.state)
    }

    /// Unregister a participant. Returns its last state.
    pub fn remove(&self, participant: &ParticipantId) -> Option<ConnectionState> {
        self.records.remove(participant).map(|(_, r)| r.state)
    }

    /// Accepted transitions for a participant, oldest first.
    pub fn history(&self, participant: &ParticipantId) -> Vec<StateTransition> {
        self.records
            .get(participant)
            .map(|r| r.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record liveness for a participant.
    pub fn touch(&self, participant: &ParticipantId) -> bool {
        match self.records.get_mut(participant) {
            Some(mut record) => {
                record.last_liveness = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Last liveness timestamp.
    pub fn last_liveness(&self, participant: &ParticipantId) -> Option<Instant> {
        self.records.get(participant).map(|r| r.last_liveness)
    }

    /// Subscribe to accepted transitions.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>) -> SubscriptionId
    where
        S: Subscriber<StateTransition> + 'static,
    {
        self.subscribers.subscribe(subscriber)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Most recently issued sequence number (0 before any transition).
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of rejected transition requests.
    pub fn rejected_transitions(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No participants registered?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of participants currently in `state`.
    pub fn count_in(&self, state: ConnectionState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    /// Registered participants with their states, sorted by id.
    pub fn snapshot(&self) -> Vec<(ParticipantId, ConnectionState)> {
        let mut all: Vec<_> = self.records.iter().map(|r| (*r.key(), r.state)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("participants", &self.records.len())
            .field("sequence", &self.last_sequence())
            .field("rejected", &self.rejected_transitions())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
