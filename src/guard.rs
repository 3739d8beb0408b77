//! Session Guard
//!
//! One guard per session. It owns the connection state machine, heartbeat
//! monitor, error router, reconnection coordinator, degradation registry and
//! security gate, and wires them together:
//!
//! ```text
//! heartbeat timeout ─► route_fault ─► ErrorRouter ─► ReconnectStrategy ─┐
//! handle_disconnect ─────────────────────────────────────────────────────┴─► ReconnectCoordinator
//! ClientMessage::Action ─► SecurityGate ─► (reject) ─► ErrorRouter::report
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ResilienceConfig;
use crate::core::{CancelToken, ParticipantId, SessionId};
use crate::error::{ErrorKind, GameStateFault, TimeoutFault, TypedError};
use crate::network::{
    authorize_resume, issue_resume_token, AuthConfig, AuthError, ChannelProbeSink, ClientMessage,
    ConnectionState, ConnectionStateMachine, DisconnectReason, HeartbeatMonitor, ReconnectCoordinator,
    ReconnectHandle, ResumeResult, ServerError, ServerMessage, SessionLink,
};
use crate::recovery::{DegradationRegistry, ErrorRouter, RecoveryContext, RecoveryResult};
use crate::security::{ActionKeyring, ActionRejection, FilteredView, ProposedAction, SecurityGate};

/// What a participant receives when attaching.
#[derive(Debug)]
pub struct Attachment {
    /// Outbound messages (heartbeats, views, rejections).
    pub outbound: mpsc::UnboundedReceiver<ServerMessage>,
    /// Token for a later `Resume`, when auth is configured.
    pub resume_token: Option<String>,
    /// Integrity key for signing actions.
    pub action_key: [u8; 32],
}

/// Session-wide resilience and security facade.
pub struct SessionGuard {
    session_id: SessionId,
    config: Arc<ResilienceConfig>,
    auth: AuthConfig,
    connections: Arc<ConnectionStateMachine>,
    heartbeat: Arc<HeartbeatMonitor>,
    router: Arc<ErrorRouter>,
    reconnector: Arc<ReconnectCoordinator>,
    degradation: Arc<DegradationRegistry>,
    gate: SecurityGate,
    outbound: Arc<ChannelProbeSink>,
    links: DashMap<ParticipantId, Arc<dyn SessionLink>>,
    cancel: CancelToken,
}

impl SessionGuard {
    /// Build every component for `session_id`.
    pub fn new(
        session_id: SessionId,
        config: ResilienceConfig,
        auth: AuthConfig,
        keyring: ActionKeyring,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let connections = Arc::new(ConnectionStateMachine::new(config.history_limit));
        let outbound = Arc::new(ChannelProbeSink::new());
        let heartbeat = Arc::new(HeartbeatMonitor::new(config.heartbeat, outbound.clone()));
        let router = Arc::new(ErrorRouter::with_default_strategies(&config));
        let reconnector = Arc::new(
            ReconnectCoordinator::new(config.reconnect_settings(), connections.clone(), router.clone())
                .with_heartbeat(heartbeat.clone()),
        );

        let guard = Arc::new(Self {
            session_id,
            gate: SecurityGate::new(router.clone(), keyring),
            config,
            auth,
            connections,
            heartbeat,
            router,
            reconnector,
            degradation: Arc::new(DegradationRegistry::with_session_features()),
            outbound,
            links: DashMap::new(),
            cancel: CancelToken::new(),
        });

        let weak = Arc::downgrade(&guard);
        guard
            .heartbeat
            .set_timeout_callback(Arc::new(move |participant, silence| {
                on_heartbeat_timeout(&weak, participant, silence);
            }));
        guard
    }

    /// Spawn the heartbeat loops.
    pub fn start(self: &Arc<Self>) {
        self.heartbeat.start();
        info!(session = %hex::encode(self.session_id), "Session guard started");
    }

    /// Stop every loop and pipeline and tell participants.
    pub async fn shutdown(&self, reason: &str) {
        self.cancel.cancel();
        let cancelled = self.reconnector.cancel_all();
        self.heartbeat.shutdown().await;
        let notified = self.outbound.broadcast(&ServerMessage::Shutdown {
            reason: reason.to_string(),
        });
        self.router.shutdown();
        info!(cancelled, notified, reason, "Session guard shut down");
    }

    // ===== PARTICIPANTS =====

    /// Register a participant and its link.
    pub fn attach(
        &self,
        participant: ParticipantId,
        link: Arc<dyn SessionLink>,
    ) -> Result<Attachment, AuthError> {
        let resume_token = if self.auth.is_configured() {
            Some(issue_resume_token(&participant, &self.session_id, &self.auth)?)
        } else {
            None
        };

        let outbound = self.outbound.open(participant);
        self.connections.initialize(participant, ConnectionState::Connecting);
        let connected = link.is_connected();
        self.links.insert(participant, link);
        if connected {
            self.connections
                .transition(&participant, ConnectionState::Connected, Some("attached"));
            self.heartbeat.track(participant);
        } else {
            self.connections
                .transition(&participant, ConnectionState::Disconnected, Some("link down at attach"));
        }

        info!(participant = %participant, connected, "Participant attached");
        Ok(Attachment {
            outbound,
            resume_token,
            action_key: self.gate.key_for(&participant),
        })
    }

    /// Forget a participant entirely.
    pub fn detach(&self, participant: &ParticipantId) -> bool {
        self.reconnector.cancel(participant);
        self.heartbeat.untrack(participant);
        self.outbound.close(participant);
        self.connections.remove(participant);
        let known = self.links.remove(participant).is_some();
        if known {
            info!(participant = %participant, "Participant detached");
        }
        known
    }

    /// Record a heartbeat reply.
    pub fn heartbeat_ack(&self, participant: &ParticipantId, sequence: u64) -> bool {
        debug!(participant = %participant, sequence, "Heartbeat ack");
        self.connections.touch(participant);
        self.heartbeat.record_response(participant)
    }

    /// React to a lost connection.
    ///
    /// Reasons whose policy auto-reconnects start (or join) a pipeline; the
    /// rest leave the participant DISCONNECTED.
    pub fn handle_disconnect(
        &self,
        participant: ParticipantId,
        reason: DisconnectReason,
    ) -> Option<ReconnectHandle> {
        let link = self.links.get(&participant).map(|l| l.value().clone())?;
        let policy = reason.policy();
        if policy.can_reconnect && policy.should_auto_reconnect && !self.cancel.is_cancelled() {
            return Some(self.reconnector.reconnect(participant, reason, link));
        }

        self.heartbeat.untrack(&participant);
        self.connections
            .transition(&participant, ConnectionState::Disconnected, Some(&reason.to_string()));
        info!(participant = %participant, reason = %reason, "Participant disconnected");
        None
    }

    /// Route a fault for `participant` with a fully populated context.
    pub async fn route_fault(&self, participant: ParticipantId, error: TypedError) -> Option<RecoveryResult> {
        let context = self.recovery_context(participant);
        self.router.route(error, Some(&context)).await
    }

    /// Context handed to recovery strategies.
    pub fn recovery_context(&self, participant: ParticipantId) -> RecoveryContext {
        let mut context = RecoveryContext::new()
            .with_participant(participant)
            .with_connections(self.connections.clone())
            .with_reconnector(self.reconnector.clone())
            .with_degradation(self.degradation.clone())
            .with_config(self.config.clone())
            .with_cancel(self.cancel.clone());
        if let Some(link) = self.links.get(&participant) {
            context = context.with_link(link.value().clone());
        }
        context
    }

    // ===== SECURITY =====

    /// `participant`'s filtered view of the current table.
    pub fn view(&self, participant: &ParticipantId) -> Result<FilteredView, TypedError> {
        let session = self
            .links
            .get(participant)
            .and_then(|link| link.current_session())
            .ok_or_else(|| {
                TypedError::new(ErrorKind::GameState(GameStateFault::Sync), "no session available")
                    .with_context("participant", participant.to_uuid_string())
            })?;
        Ok(self.gate.view_for(&session.table, participant))
    }

    /// Validate an action. The table is never touched here.
    pub fn submit_action(
        &self,
        participant: &ParticipantId,
        action: &ProposedAction,
    ) -> Result<(), ActionRejection> {
        let session = self
            .links
            .get(participant)
            .and_then(|link| link.current_session())
            .ok_or(ActionRejection::NotSeated)?;
        self.gate.submit(&session.table, action, participant)
    }

    /// Re-admit a participant presenting a resume token.
    pub fn resume(&self, participant: &ParticipantId, token: &str) -> ResumeResult {
        if let Err(e) = authorize_resume(token, participant, &self.session_id, &self.auth) {
            warn!(participant = %participant, error = %e, "Resume refused");
            self.router.report(
                TypedError::new(e.error_kind(), e.to_string())
                    .with_context("participant", participant.to_uuid_string()),
            );
            return ResumeResult::refused(e.to_string());
        }

        let Some(link) = self.links.get(participant).map(|l| l.value().clone()) else {
            return ResumeResult::refused("participant is not attached to this session");
        };

        match self.connections.current_state(participant) {
            Some(ConnectionState::Disconnected) => {
                self.connections
                    .transition(participant, ConnectionState::Connecting, Some("resume"));
                if link.is_connected() {
                    self.connections
                        .transition(participant, ConnectionState::Connected, Some("resumed"));
                    self.heartbeat.track(*participant);
                } else {
                    self.connections
                        .transition(participant, ConnectionState::Disconnected, Some("link down at resume"));
                    return ResumeResult::refused("link is down");
                }
            }
            Some(ConnectionState::Reconnecting) => {
                debug!(participant = %participant, "Resume during reconnection, pipeline continues");
            }
            _ => {}
        }
        info!(participant = %participant, "Participant resumed");
        ResumeResult::accepted(&self.session_id)
    }

    /// Handle one client message. Returns the reply, if any.
    pub fn handle_message(&self, participant: ParticipantId, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::HeartbeatAck { sequence } => {
                self.heartbeat_ack(&participant, sequence);
                None
            }
            ClientMessage::Resume { token } => Some(ServerMessage::ResumeResult(self.resume(&participant, &token))),
            ClientMessage::SyncRequest => Some(match self.view(&participant) {
                Ok(view) => ServerMessage::View(view),
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            }),
            ClientMessage::Action(action) => match self.submit_action(&participant, &action) {
                Ok(()) => None,
                Err(rejection) => Some(ServerMessage::ActionRejected {
                    action_id: action.action_id,
                    rejection,
                }),
            },
            ClientMessage::Leave => {
                self.handle_disconnect(participant, DisconnectReason::ClientQuit);
                None
            }
        }
    }

    // ===== ACCESSORS =====

    /// Session identifier.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Active configuration.
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Connection state machine.
    pub fn connections(&self) -> &Arc<ConnectionStateMachine> {
        &self.connections
    }

    /// Heartbeat monitor.
    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    /// Error router.
    pub fn router(&self) -> &Arc<ErrorRouter> {
        &self.router
    }

    /// Reconnection coordinator.
    pub fn reconnector(&self) -> &Arc<ReconnectCoordinator> {
        &self.reconnector
    }

    /// Degradable features.
    pub fn degradation(&self) -> &Arc<DegradationRegistry> {
        &self.degradation
    }

    /// Security gate.
    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    /// Outbound queues.
    pub fn outbound(&self) -> &Arc<ChannelProbeSink> {
        &self.outbound
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session_id", &hex::encode(self.session_id))
            .field("participants", &self.links.len())
            .field("router", &self.router)
            .field("reconnector", &self.reconnector)
            .finish()
    }
}

fn on_heartbeat_timeout(guard: &Weak<SessionGuard>, participant: ParticipantId, silence: Duration) {
    let Some(guard) = guard.upgrade() else {
        return;
    };
    let error = TypedError::new(
        ErrorKind::Timeout(TimeoutFault::Heartbeat),
        format!("no heartbeat for {}ms", silence.as_millis()),
    )
    .with_context("participant", participant.to_uuid_string())
    .with_context("silence_ms", silence.as_millis() as u64);

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                guard.route_fault(participant, error).await;
            });
        }
        Err(_) => {
            warn!(participant = %participant, "Heartbeat timeout outside a runtime, reporting only");
            guard.router.report(error);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
