//! Session Collaborator
//!
//! The rules-engine/session side this layer talks to. Transport, state
//! mutation and resync payloads all live behind [`SessionLink`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::{ParticipantId, SessionId};
use crate::security::table::TableState;

/// The authoritative shared state and the participants attached to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Latest table snapshot.
    pub table: TableState,
}

impl Session {
    /// Session over a table.
    pub fn new(id: SessionId, table: TableState) -> Self {
        Self { id, table }
    }

    /// Seated participants.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.table.participants()
    }

    /// Number of seated participants.
    pub fn participant_count(&self) -> usize {
        self.table.seats.len()
    }

    /// Table version.
    pub fn state_version(&self) -> u64 {
        self.table.version
    }
}

/// One participant's connection to the session.
#[async_trait]
pub trait SessionLink: Send + Sync {
    /// Start or verify a transport-level connection.
    async fn attempt_connection(&self) -> bool;

    /// Is the transport up?
    fn is_connected(&self) -> bool;

    /// Reset transient client state before retrying.
    async fn prepare_for_reconnection(&self);

    /// Pull authoritative state after reconnecting.
    async fn request_state_sync(&self) -> bool;

    /// Current session, if any.
    fn current_session(&self) -> Option<Arc<Session>>;
}

// =============================================================================
// SCRIPTED LINK
// =============================================================================

/// In-memory link whose connection and sync outcomes are scripted.
///
/// Each scripted outcome is consumed once; when a script runs dry the link
/// falls back to its default outcome. Used by the demo binary and tests.
#[derive(Debug)]
pub struct ScriptedLink {
    connected: AtomicBool,
    connect_script: Mutex<VecDeque<bool>>,
    sync_script: Mutex<VecDeque<bool>>,
    default_connect: AtomicBool,
    default_sync: AtomicBool,
    latency: RwLock<Duration>,
    session: RwLock<Option<Arc<Session>>>,
    connection_attempts: AtomicU32,
    sync_requests: AtomicU32,
    prepare_calls: AtomicU32,
}

impl ScriptedLink {
    fn with_state(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            connect_script: Mutex::new(VecDeque::new()),
            sync_script: Mutex::new(VecDeque::new()),
            default_connect: AtomicBool::new(true),
            default_sync: AtomicBool::new(true),
            latency: RwLock::new(Duration::ZERO),
            session: RwLock::new(None),
            connection_attempts: AtomicU32::new(0),
            sync_requests: AtomicU32::new(0),
            prepare_calls: AtomicU32::new(0),
        }
    }

    /// A link that is up.
    pub fn connected() -> Self {
        Self::with_state(true)
    }

    /// A link that is down.
    pub fn disconnected() -> Self {
        Self::with_state(false)
    }

    /// Queue connection outcomes.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.connect_script.lock().extend(outcomes);
    }

    /// Queue sync outcomes.
    pub fn script_syncs(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.sync_script.lock().extend(outcomes);
    }

    /// Outcome once the connect script is exhausted.
    pub fn set_default_connect(&self, outcome: bool) {
        self.default_connect.store(outcome, Ordering::SeqCst);
    }

    /// Outcome once the sync script is exhausted.
    pub fn set_default_sync(&self, outcome: bool) {
        self.default_sync.store(outcome, Ordering::SeqCst);
    }

    /// Simulated time each connection attempt takes.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Replace the current session.
    pub fn set_session(&self, session: Session) {
        *self.session.write() = Some(Arc::new(session));
    }

    /// Simulate the transport dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Connection attempts so far.
    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts.load(Ordering::SeqCst)
    }

    /// Sync requests so far.
    pub fn sync_requests(&self) -> u32 {
        self.sync_requests.load(Ordering::SeqCst)
    }

    /// `prepare_for_reconnection` calls so far.
    pub fn prepare_calls(&self) -> u32 {
        self.prepare_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLink for ScriptedLink {
    async fn attempt_connection(&self) -> bool {
        self.connection_attempts.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let outcome = self
            .connect_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_connect.load(Ordering::SeqCst));
        self.connected.store(outcome, Ordering::SeqCst);
        outcome
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn prepare_for_reconnection(&self) {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn request_state_sync(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.sync_requests.fetch_add(1, Ordering::SeqCst);
        self.sync_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_sync.load(Ordering::SeqCst))
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }
}
