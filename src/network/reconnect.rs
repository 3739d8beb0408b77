//! Reconnection Coordinator
//!
//! One pipeline per participant: capture a recovery snapshot, move the
//! connection to RECONNECTING, retry the link with exponential backoff, and on
//! success resync authoritative state. A second request for a participant
//! that is already reconnecting joins the in-flight pipeline.
//!
//! ## Lifecycle Events
//!
//! ```text
//! Started ─► Attempt(1) ─► [Failed(1, will_retry)] ─► Attempt(2) ─► ...
//!                                                    ├─► Succeeded(n)
//!                                                    └─► GivenUp
//! ```
//!
//! `Progress` events are interleaved for UI feedback.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::codec::WireCodec;
use super::connection::{ConnectionState, ConnectionStateMachine};
use super::heartbeat::HeartbeatMonitor;
use super::link::SessionLink;
use super::snapshot::GameStateRecoverySnapshot;
use crate::core::{CancelToken, ParticipantId, Subscriber, Subscribers, SubscriptionId};
use crate::error::{
    AuthenticationFault, ConnectionFault, ErrorKind, SecurityFault, TimeoutFault, TypedError,
};
use crate::recovery::{BackoffPolicy, ErrorRouter};

// =============================================================================
// DISCONNECT REASONS
// =============================================================================

/// Why a connection was lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// Transport failure.
    NetworkError,
    /// Liveness probes went unanswered.
    HeartbeatTimeout,
    /// The server is going away.
    ServerShutdown,
    /// Removed by the server or a moderator.
    Kicked,
    /// The participant left on purpose.
    ClientQuit,
    /// The participant broke protocol.
    ProtocolViolation,
    /// Credentials were refused.
    AuthenticationFailed,
    /// Anything else.
    Unknown,
}

/// Retry policy attached to a [`DisconnectReason`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// May the participant reconnect at all?
    pub can_reconnect: bool,
    /// Should reconnection start without user action?
    pub should_auto_reconnect: bool,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    const fn new(can: bool, auto: bool, initial_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            can_reconnect: can,
            should_auto_reconnect: auto,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_attempts,
        }
    }
}

impl DisconnectReason {
    /// Policy for this reason.
    pub fn policy(self) -> ReconnectPolicy {
        match self {
            DisconnectReason::NetworkError => ReconnectPolicy::new(true, true, 1000, 5),
            DisconnectReason::HeartbeatTimeout => ReconnectPolicy::new(true, true, 1000, 5),
            DisconnectReason::ServerShutdown => ReconnectPolicy::new(true, true, 5000, 3),
            DisconnectReason::Kicked => ReconnectPolicy::new(false, false, 0, 0),
            DisconnectReason::ClientQuit => ReconnectPolicy::new(true, false, 0, 1),
            DisconnectReason::ProtocolViolation => ReconnectPolicy::new(true, false, 2000, 1),
            DisconnectReason::AuthenticationFailed => ReconnectPolicy::new(false, false, 0, 0),
            DisconnectReason::Unknown => ReconnectPolicy::new(true, true, 2000, 3),
        }
    }

    /// Derive the reason from a classified error.
    pub fn from_error(error: &TypedError) -> Self {
        match error.kind() {
            ErrorKind::Connection(_) => DisconnectReason::NetworkError,
            ErrorKind::Timeout(TimeoutFault::Heartbeat) => DisconnectReason::HeartbeatTimeout,
            ErrorKind::Timeout(_) => DisconnectReason::NetworkError,
            ErrorKind::Protocol(_) => DisconnectReason::ProtocolViolation,
            ErrorKind::Authentication(_) | ErrorKind::Security(SecurityFault::Authentication) => {
                DisconnectReason::AuthenticationFailed
            }
            ErrorKind::Security(_) => DisconnectReason::Kicked,
            _ => DisconnectReason::Unknown,
        }
    }

    /// Error kind reported when a pipeline for this reason gives up.
    fn exhausted_kind(self) -> ErrorKind {
        match self {
            DisconnectReason::HeartbeatTimeout => ErrorKind::Timeout(TimeoutFault::Heartbeat),
            DisconnectReason::AuthenticationFailed => {
                ErrorKind::Authentication(AuthenticationFault::InvalidCredentials)
            }
            _ => ErrorKind::Connection(ConnectionFault::Lost),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::NetworkError => "NETWORK_ERROR",
            DisconnectReason::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
            DisconnectReason::ServerShutdown => "SERVER_SHUTDOWN",
            DisconnectReason::Kicked => "KICKED",
            DisconnectReason::ClientQuit => "CLIENT_QUIT",
            DisconnectReason::ProtocolViolation => "PROTOCOL_VIOLATION",
            DisconnectReason::AuthenticationFailed => "AUTHENTICATION_FAILED",
            DisconnectReason::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

// =============================================================================
// EVENTS & OUTCOMES
// =============================================================================

/// Reconnection lifecycle events.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconnectEvent {
    /// Pipeline started.
    Started {
        /// Participant.
        participant: ParticipantId,
        /// Why the connection was lost.
        reason: DisconnectReason,
        /// Attempts this pipeline will make at most.
        max_attempts: u32,
    },
    /// An attempt is scheduled.
    Attempt {
        /// Participant.
        participant: ParticipantId,
        /// 1-based attempt number.
        attempt: u32,
        /// Attempt limit.
        max_attempts: u32,
        /// Wait before this attempt.
        delay: Duration,
    },
    /// Intermediate feedback.
    Progress {
        /// Participant.
        participant: ParticipantId,
        /// Current attempt.
        attempt: u32,
        /// Completion estimate in `[0, 1]`.
        ratio: f32,
        /// What is happening.
        status: String,
    },
    /// An attempt failed.
    Failed {
        /// Participant.
        participant: ParticipantId,
        /// Attempt that failed.
        attempt: u32,
        /// Failure description.
        error: String,
        /// Will another attempt follow?
        will_retry: bool,
    },
    /// Connection restored.
    Succeeded {
        /// Participant.
        participant: ParticipantId,
        /// Successful attempt.
        attempt: u32,
        /// Time since the pipeline started.
        total_duration: Duration,
    },
    /// Every attempt failed. Terminal.
    GivenUp {
        /// Participant.
        participant: ParticipantId,
        /// Last failure, phrased for the user.
        final_error: String,
        /// Time since the pipeline started.
        total_duration: Duration,
    },
}

impl ReconnectEvent {
    /// Participant the event is about.
    pub fn participant(&self) -> ParticipantId {
        match self {
            ReconnectEvent::Started { participant, .. }
            | ReconnectEvent::Attempt { participant, .. }
            | ReconnectEvent::Progress { participant, .. }
            | ReconnectEvent::Failed { participant, .. }
            | ReconnectEvent::Succeeded { participant, .. }
            | ReconnectEvent::GivenUp { participant, .. } => *participant,
        }
    }
}

/// Final result of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Connection restored.
    Reconnected {
        /// Attempts used.
        attempts: u32,
        /// Pipeline duration.
        total_duration: Duration,
        /// Did the post-reconnect resync succeed?
        resynced: bool,
    },
    /// Every attempt failed.
    GaveUp {
        /// Attempts used.
        attempts: u32,
        /// Pipeline duration.
        total_duration: Duration,
        /// Last failure.
        last_error: String,
    },
    /// The pipeline was cancelled.
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
    },
    /// The disconnect reason does not allow reconnection.
    NotPermitted {
        /// Reason that forbade it.
        reason: DisconnectReason,
    },
}

impl ReconnectOutcome {
    /// Is the participant connected again?
    pub fn is_reconnected(&self) -> bool {
        matches!(self, ReconnectOutcome::Reconnected { .. })
    }
}

/// Cancellable handle on a running pipeline. Clones share the same pipeline.
#[derive(Clone)]
pub struct ReconnectHandle {
    id: u64,
    participant: ParticipantId,
    outcome: Shared<BoxFuture<'static, ReconnectOutcome>>,
    cancel: CancelToken,
}

impl ReconnectHandle {
    fn ready(participant: ParticipantId, outcome: ReconnectOutcome) -> Self {
        Self {
            id: 0,
            participant,
            outcome: futures_util::future::ready(outcome).boxed().shared(),
            cancel: CancelToken::new(),
        }
    }

    /// Participant being reconnected.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Wait for the pipeline's outcome.
    pub async fn outcome(&self) -> ReconnectOutcome {
        self.outcome.clone().await
    }

    /// Outcome if already finished.
    pub fn try_outcome(&self) -> Option<ReconnectOutcome> {
        self.outcome.peek().cloned()
    }

    /// Stop further attempts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Do two handles refer to the same pipeline?
    pub fn same_pipeline(&self, other: &ReconnectHandle) -> bool {
        self.id == other.id && self.participant == other.participant
    }
}

impl fmt::Debug for ReconnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectHandle")
            .field("id", &self.id)
            .field("participant", &self.participant)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Coordinator settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectSettings {
    /// Backoff shape. The initial delay is replaced by the reason's policy.
    pub backoff: BackoffPolicy,
    /// Upper bound on attempts regardless of reason.
    pub max_attempts: u32,
    /// Codec for recovery snapshots.
    pub codec: WireCodec,
    /// Oldest snapshot still compared after reconnecting.
    pub snapshot_max_age: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default().with_jitter(0.1),
            max_attempts: 5,
            codec: WireCodec::Json,
            snapshot_max_age: Duration::from_secs(300),
        }
    }
}

/// Counters kept by the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectStats {
    /// Pipelines started.
    pub started: u64,
    /// Requests that joined an in-flight pipeline.
    pub joined: u64,
    /// Pipelines that reconnected.
    pub succeeded: u64,
    /// Pipelines that gave up.
    pub given_up: u64,
    /// Pipelines cancelled.
    pub cancelled: u64,
}

/// Runs reconnection pipelines.
pub struct ReconnectCoordinator {
    settings: ReconnectSettings,
    connections: Arc<ConnectionStateMachine>,
    heartbeat: Option<Arc<HeartbeatMonitor>>,
    router: Arc<ErrorRouter>,
    in_flight: DashMap<ParticipantId, ReconnectHandle>,
    retained: DashMap<ParticipantId, GameStateRecoverySnapshot>,
    subscribers: Subscribers<ReconnectEvent>,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
    succeeded: AtomicU64,
    given_up: AtomicU64,
    cancelled: AtomicU64,
}

impl ReconnectCoordinator {
    /// Create a coordinator.
    pub fn new(
        settings: ReconnectSettings,
        connections: Arc<ConnectionStateMachine>,
        router: Arc<ErrorRouter>,
    ) -> Self {
        Self {
            settings,
            connections,
            heartbeat: None,
            router,
            in_flight: DashMap::new(),
            retained: DashMap::new(),
            subscribers: Subscribers::new(),
            next_id: AtomicU64::new(1),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            given_up: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Stop probing during reconnection and resume tracking afterwards.
    pub fn with_heartbeat(mut self, heartbeat: Arc<HeartbeatMonitor>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Settings in use.
    pub fn settings(&self) -> &ReconnectSettings {
        &self.settings
    }

    /// Start (or join) the pipeline for `participant`.
    pub fn reconnect(
        self: &Arc<Self>,
        participant: ParticipantId,
        reason: DisconnectReason,
        link: Arc<dyn SessionLink>,
    ) -> ReconnectHandle {
        let policy = reason.policy();
        if !policy.can_reconnect || policy.max_attempts == 0 {
            info!(participant = %participant, reason = %reason, "Reconnection not permitted");
            return ReconnectHandle::ready(participant, ReconnectOutcome::NotPermitted { reason });
        }

        match self.in_flight.entry(participant) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(participant = %participant, "Joining in-flight reconnection");
                existing.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let cancel = CancelToken::new();
                let this = Arc::clone(self);
                let task_cancel = cancel.clone();
                let task = tokio::spawn(async move {
                    let outcome = this.run(participant, reason, link, task_cancel).await;
                    this.in_flight.remove_if(&participant, |_, h| h.id == id);
                    outcome
                });
                let outcome = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => ReconnectOutcome::GaveUp {
                            attempts: 0,
                            total_duration: Duration::ZERO,
                            last_error: e.to_string(),
                        },
                    }
                }
                .boxed()
                .shared();

                let handle = ReconnectHandle {
                    id,
                    participant,
                    outcome,
                    cancel,
                };
                slot.insert(handle.clone());
                self.started.fetch_add(1, Ordering::Relaxed);
                handle
            }
        }
    }

    async fn run(
        &self,
        participant: ParticipantId,
        reason: DisconnectReason,
        link: Arc<dyn SessionLink>,
        cancel: CancelToken,
    ) -> ReconnectOutcome {
        let started = Instant::now();
        let policy = reason.policy();
        let max_attempts = policy.max_attempts.min(self.settings.max_attempts).max(1);
        let backoff = self.settings.backoff.with_initial_delay(policy.initial_delay);

        info!(participant = %participant, reason = %reason, max_attempts, "Reconnection started");
        self.publish(ReconnectEvent::Started {
            participant,
            reason,
            max_attempts,
        });

        let snapshot = self.capture_snapshot(participant, link.as_ref());
        self.enter_reconnecting(participant, reason);
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.untrack(&participant);
        }

        if cancel.run(link.prepare_for_reconnection()).await.is_err() {
            return self.finish_cancelled(participant, 0);
        }

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=max_attempts {
            let delay = backoff.delay_before(attempt);
            self.publish(ReconnectEvent::Attempt {
                participant,
                attempt,
                max_attempts,
                delay,
            });

            if cancel.sleep(delay).await.is_err() {
                return self.finish_cancelled(participant, attempt - 1);
            }

            self.publish(ReconnectEvent::Progress {
                participant,
                attempt,
                ratio: (attempt - 1) as f32 / max_attempts as f32,
                status: format!("connecting (attempt {attempt}/{max_attempts})"),
            });

            match cancel.run(link.attempt_connection()).await {
                Err(_) => return self.finish_cancelled(participant, attempt),
                Ok(true) => {
                    return self
                        .finish_success(participant, attempt, started, snapshot, link.as_ref(), &cancel)
                        .await;
                }
                Ok(false) => {
                    last_error = format!("connection attempt {attempt} failed");
                    let will_retry = attempt < max_attempts;
                    debug!(participant = %participant, attempt, will_retry, "Reconnection attempt failed");
                    self.publish(ReconnectEvent::Failed {
                        participant,
                        attempt,
                        error: last_error.clone(),
                        will_retry,
                    });
                }
            }
        }

        self.finish_given_up(participant, reason, max_attempts, started, last_error, snapshot)
    }

    fn capture_snapshot(
        &self,
        participant: ParticipantId,
        link: &dyn SessionLink,
    ) -> Option<GameStateRecoverySnapshot> {
        let session = link.current_session()?;
        match GameStateRecoverySnapshot::capture(&session, participant, self.settings.codec) {
            Ok(snapshot) => {
                debug!(
                    participant = %participant,
                    version = snapshot.state_version(),
                    digest = %snapshot.digest_hex(),
                    bytes = snapshot.payload_len(),
                    "Recovery snapshot captured"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(participant = %participant, error = %e, "Recovery snapshot failed");
                self.router.report(e.to_typed_error(&participant));
                None
            }
        }
    }

    fn enter_reconnecting(&self, participant: ParticipantId, reason: DisconnectReason) {
        let why = reason.to_string();
        match self.connections.current_state(&participant) {
            Some(ConnectionState::Reconnecting) => {}
            Some(ConnectionState::Connecting) => {
                self.connections.transition(&participant, ConnectionState::Disconnected, Some(&why));
                self.connections.transition(&participant, ConnectionState::Reconnecting, Some(&why));
            }
            Some(_) => {
                self.connections.transition(&participant, ConnectionState::Reconnecting, Some(&why));
            }
            None => {
                self.connections.initialize(participant, ConnectionState::Disconnected);
                self.connections.transition(&participant, ConnectionState::Reconnecting, Some(&why));
            }
        }
    }

    async fn finish_success(
        &self,
        participant: ParticipantId,
        attempt: u32,
        started: Instant,
        snapshot: Option<GameStateRecoverySnapshot>,
        link: &dyn SessionLink,
        cancel: &CancelToken,
    ) -> ReconnectOutcome {
        self.connections
            .transition(&participant, ConnectionState::Connected, Some("reconnected"));
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.track(participant);
        }

        self.publish(ReconnectEvent::Progress {
            participant,
            attempt,
            ratio: 0.9,
            status: "resynchronizing state".to_string(),
        });

        if let (Some(snapshot), Some(current)) = (&snapshot, link.current_session()) {
            if let Err(e) = snapshot.check_compatibility(&current, self.settings.snapshot_max_age) {
                warn!(participant = %participant, error = %e, "Recovery snapshot incompatible");
                self.router.report(e.to_typed_error(&participant));
            }
        }

        let resynced = matches!(cancel.run(link.request_state_sync()).await, Ok(true));
        match snapshot {
            Some(_) if resynced => {
                self.retained.remove(&participant);
            }
            Some(snapshot) => {
                warn!(participant = %participant, "Resync after reconnect failed, keeping snapshot");
                self.router.report(
                    TypedError::new(
                        ErrorKind::GameState(crate::error::GameStateFault::Sync),
                        "state resync after reconnect failed",
                    )
                    .with_context("participant", participant.to_uuid_string())
                    .with_context("snapshot_version", snapshot.state_version()),
                );
                self.retained.insert(participant, snapshot);
            }
            None => {}
        }

        let total_duration = started.elapsed();
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        info!(
            participant = %participant,
            attempt,
            total_ms = total_duration.as_millis() as u64,
            resynced,
            "Reconnected"
        );
        self.publish(ReconnectEvent::Succeeded {
            participant,
            attempt,
            total_duration,
        });
        ReconnectOutcome::Reconnected {
            attempts: attempt,
            total_duration,
            resynced,
        }
    }

    fn finish_given_up(
        &self,
        participant: ParticipantId,
        reason: DisconnectReason,
        attempts: u32,
        started: Instant,
        last_error: String,
        snapshot: Option<GameStateRecoverySnapshot>,
    ) -> ReconnectOutcome {
        self.connections.transition(
            &participant,
            ConnectionState::Disconnected,
            Some("reconnection exhausted"),
        );
        if let Some(snapshot) = snapshot {
            self.retained.insert(participant, snapshot);
        }

        let total_duration = started.elapsed();
        let final_error = format!(
            "Could not reconnect after {attempts} attempts ({reason}). Check your network connection and rejoin the table."
        );
        self.router.report(
            TypedError::new(reason.exhausted_kind(), final_error.clone())
                .with_recoverable(false)
                .with_context("participant", participant.to_uuid_string())
                .with_context("attempts", attempts)
                .with_context("last_error", last_error.clone()),
        );

        self.given_up.fetch_add(1, Ordering::Relaxed);
        warn!(participant = %participant, attempts, total_ms = total_duration.as_millis() as u64, "Reconnection given up");
        self.publish(ReconnectEvent::GivenUp {
            participant,
            final_error,
            total_duration,
        });
        ReconnectOutcome::GaveUp {
            attempts,
            total_duration,
            last_error,
        }
    }

    fn finish_cancelled(&self, participant: ParticipantId, attempts: u32) -> ReconnectOutcome {
        // Forward transition only; earlier transitions stand.
        self.connections.transition(
            &participant,
            ConnectionState::Disconnected,
            Some("reconnection cancelled"),
        );
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        info!(participant = %participant, attempts, "Reconnection cancelled");
        ReconnectOutcome::Cancelled { attempts }
    }

    fn publish(&self, event: ReconnectEvent) {
        self.subscribers.publish(&event);
    }

    /// Cancel the participant's pipeline, if any.
    pub fn cancel(&self, participant: &ParticipantId) -> bool {
        match self.in_flight.get(participant) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pipeline.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<ReconnectHandle> = self.in_flight.iter().map(|h| h.value().clone()).collect();
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    /// Is a pipeline running for the participant?
    pub fn is_reconnecting(&self, participant: &ParticipantId) -> bool {
        self.in_flight.contains_key(participant)
    }

    /// Number of running pipelines.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Snapshot kept after a failed resync or give-up.
    pub fn retained_snapshot(&self, participant: &ParticipantId) -> Option<GameStateRecoverySnapshot> {
        self.retained.get(participant).map(|s| s.value().clone())
    }

    /// Drop a retained snapshot.
    pub fn discard_snapshot(&self, participant: &ParticipantId) -> bool {
        self.retained.remove(participant).is_some()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>) -> SubscriptionId
    where
        S: Subscriber<ReconnectEvent> + 'static,
    {
        self.subscribers.subscribe(subscriber)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Counters.
    pub fn stats(&self) -> ReconnectStats {
        ReconnectStats {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            given_up: self.given_up.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ReconnectCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectCoordinator")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.len())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::network::link::{ScriptedLink, Session};
    use crate::security::table::TableState;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn settings() -> ReconnectSettings {
        ReconnectSettings {
            backoff: BackoffPolicy::default(),
            ..Default::default()
        }
    }

    fn coordinator() -> (Arc<ReconnectCoordinator>, Arc<ConnectionStateMachine>, Arc<ErrorRouter>) {
        let connections = Arc::new(ConnectionStateMachine::default());
        let router = Arc::new(ErrorRouter::new());
        let coordinator = Arc::new(ReconnectCoordinator::new(settings(), connections.clone(), router.clone()));
        (coordinator, connections, router)
    }

    fn record(
        coordinator: &ReconnectCoordinator,
    ) -> (Arc<Mutex<Vec<ReconnectEvent>>>, Arc<impl Fn(&ReconnectEvent) + Send + Sync>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscriber = Arc::new(move |e: &ReconnectEvent| sink.lock().push(e.clone()));
        coordinator.subscribe(&subscriber);
        (events, subscriber)
    }

    #[test]
    fn test_reason_policies() {
        let net = DisconnectReason::NetworkError.policy();
        assert!(net.can_reconnect && net.should_auto_reconnect);
        assert_eq!(net.initial_delay, Duration::from_millis(1000));
        assert_eq!(net.max_attempts, 5);
        assert!(!DisconnectReason::Kicked.policy().can_reconnect);
        assert!(!DisconnectReason::AuthenticationFailed.policy().can_reconnect);
        assert!(!DisconnectReason::ClientQuit.policy().should_auto_reconnect);
        assert_eq!(DisconnectReason::ServerShutdown.policy().initial_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_reason_from_error() {
        let lost = TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "x");
        assert_eq!(DisconnectReason::from_error(&lost), DisconnectReason::NetworkError);
        let hb = TypedError::new(ErrorKind::Timeout(TimeoutFault::Heartbeat), "x");
        assert_eq!(DisconnectReason::from_error(&hb), DisconnectReason::HeartbeatTimeout);
        let auth = TypedError::new(ErrorKind::Authentication(AuthenticationFault::Expired), "x");
        assert_eq!(DisconnectReason::from_error(&auth), DisconnectReason::AuthenticationFailed);
        let cheat = TypedError::new(ErrorKind::Security(SecurityFault::Validation), "x");
        assert_eq!(DisconnectReason::from_error(&cheat), DisconnectReason::Kicked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_permitted_reasons() {
        let (coordinator, connections, _router) = coordinator();
        let link = Arc::new(ScriptedLink::disconnected());
        connections.initialize(pid(1), ConnectionState::Connected);
        let handle = coordinator.reconnect(pid(1), DisconnectReason::Kicked, link.clone());
        assert_eq!(
            handle.outcome().await,
            ReconnectOutcome::NotPermitted { reason: DisconnectReason::Kicked }
        );
        assert_eq!(link.connection_attempts(), 0);
        assert_eq!(connections.current_state(&pid(1)), Some(ConnectionState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_path_resyncs_and_discards_snapshot() {
        let (coordinator, connections, _router) = coordinator();
        let (events, _keep) = record(&coordinator);
        let link = Arc::new(ScriptedLink::connected());
        link.set_session(Session::new([1; 16], TableState::new(&[pid(1), pid(2)])));
        link.script_connects([false, true]);
        connections.initialize(pid(1), ConnectionState::Connected);

        let handle = coordinator.reconnect(pid(1), DisconnectReason::NetworkError, link.clone());
        let outcome = handle.outcome().await;
        assert!(matches!(outcome, ReconnectOutcome::Reconnected { attempts: 2, resynced: true, .. }));
        assert_eq!(connections.current_state(&pid(1)), Some(ConnectionState::Connected));
        assert_eq!(link.prepare_calls(), 1);
        assert_eq!(link.sync_requests(), 1);
        assert!(coordinator.retained_snapshot(&pid(1)).is_none());
        assert!(!coordinator.is_reconnecting(&pid(1)));

        let states: Vec<_> = connections.history(&pid(1)).iter().map(|t| t.to).collect();
        assert_eq!(states, vec![ConnectionState::Reconnecting, ConnectionState::Connected]);
        assert!(matches!(events.lock().first(), Some(ReconnectEvent::Started { max_attempts: 5, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resync_keeps_snapshot() {
        let (coordinator, connections, router) = coordinator();
        let link = Arc::new(ScriptedLink::connected());
        link.set_session(Session::new([1; 16], TableState::new(&[pid(1)])));
        link.set_default_sync(false);
        connections.initialize(pid(1), ConnectionState::Connected);

        let outcome = coordinator
            .reconnect(pid(1), DisconnectReason::HeartbeatTimeout, link)
            .outcome()
            .await;
        assert!(matches!(outcome, ReconnectOutcome::Reconnected { resynced: false, .. }));
        assert!(coordinator.retained_snapshot(&pid(1)).is_some());
        assert_eq!(router.totals().errors_routed, 1);
        assert_eq!(router.totals().recoveries_attempted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_joins_in_flight() {
        let (coordinator, connections, _router) = coordinator();
        let link = Arc::new(ScriptedLink::connected());
        link.script_connects([false, false, true]);
        connections.initialize(pid(1), ConnectionState::Connected);

        let first = coordinator.reconnect(pid(1), DisconnectReason::NetworkError, link.clone());
        let second = coordinator.reconnect(pid(1), DisconnectReason::NetworkError, link.clone());
        assert!(first.same_pipeline(&second));
        assert_eq!(coordinator.in_flight(), 1);

        let (a, b) = tokio::join!(first.outcome(), second.outcome());
        assert_eq!(a, b);
        assert_eq!(link.connection_attempts(), 3);
        assert_eq!(coordinator.stats().started, 1);
        assert_eq!(coordinator.stats().joined, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_attempts() {
        let (coordinator, connections, _router) = coordinator();
        let (events, _keep) = record(&coordinator);
        let link = Arc::new(ScriptedLink::connected());
        link.set_default_connect(false);
        connections.initialize(pid(1), ConnectionState::Connected);

        let handle = coordinator.reconnect(pid(1), DisconnectReason::NetworkError, link.clone());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(coordinator.cancel(&pid(1)));

        assert_eq!(handle.outcome().await, ReconnectOutcome::Cancelled { attempts: 2 });
        let attempts_before = link.connection_attempts();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(link.connection_attempts(), attempts_before);
        assert_eq!(connections.current_state(&pid(1)), Some(ConnectionState::Disconnected));
        assert!(!events.lock().iter().any(|e| matches!(e, ReconnectEvent::GivenUp { .. })));
        assert_eq!(coordinator.in_flight(), 0);
    }
}
