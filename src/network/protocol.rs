//! Protocol Messages
//!
//! Wire format for the resilience layer's own traffic: heartbeats, resume,
//! resync requests, action submission and filtered views. Messages are
//! internally tagged JSON (`"type"` field); bincode is not used here because
//! it cannot carry tagged enums.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;

use super::heartbeat::ProbeSink;
use crate::core::ParticipantId;
use crate::error::{ConnectionFault, ErrorCategory, ErrorKind, Severity, TypedError};
use crate::security::validator::{ActionRejection, ProposedAction};
use crate::security::view::FilteredView;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Reply to a heartbeat probe.
    HeartbeatAck {
        /// Sequence of the probe being answered.
        sequence: u64,
    },

    /// Rejoin a session with a resume token.
    Resume {
        /// Token issued when the participant first attached.
        token: String,
    },

    /// Request the current filtered view (after reconnecting).
    SyncRequest,

    /// Proposed game action.
    Action(ProposedAction),

    /// Participant is leaving the session.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Liveness probe.
    Heartbeat {
        /// Probe sequence, echoed in the ack.
        sequence: u64,
        /// Server wall clock (Unix ms).
        server_time_ms: u64,
    },

    /// Resume outcome.
    ResumeResult(ResumeResult),

    /// The participant's filtered view of the table.
    View(FilteredView),

    /// A submitted action was refused. The session is unchanged.
    ActionRejected {
        /// Action that was refused.
        action_id: u64,
        /// Why.
        rejection: ActionRejection,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Resume outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResult {
    /// Whether the participant was re-admitted.
    pub success: bool,
    /// Session ID (hex) if successful.
    pub session_id: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl ResumeResult {
    /// Successful resume.
    pub fn accepted(session_id: &[u8; 16]) -> Self {
        Self {
            success: true,
            session_id: Some(hex::encode(session_id)),
            error: None,
        }
    }

    /// Refused resume.
    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            error: Some(error.into()),
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code (`CON-...`, `SEC-...`).
    pub code: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Whether the client should expect recovery.
    pub recoverable: bool,
}

impl From<&TypedError> for ServerError {
    fn from(error: &TypedError) -> Self {
        Self {
            code: error.code().to_string(),
            category: error.category(),
            severity: error.severity(),
            message: error.message().to_string(),
            recoverable: error.is_recoverable(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Heartbeat probe stamped with the current wall clock.
    pub fn heartbeat(sequence: u64) -> Self {
        let server_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ServerMessage::Heartbeat {
            sequence,
            server_time_ms,
        }
    }
}

// =============================================================================
// OUTBOUND CHANNELS
// =============================================================================

/// Per-participant outbound queues. Doubles as the heartbeat probe sink.
#[derive(Debug, Default)]
pub struct ChannelProbeSink {
    outbound: DashMap<ParticipantId, mpsc::UnboundedSender<ServerMessage>>,
    delivered: AtomicU64,
}

impl ChannelProbeSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) the participant's queue and return its receiver.
    pub fn open(&self, participant: ParticipantId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.insert(participant, tx);
        rx
    }

    /// Close the participant's queue.
    pub fn close(&self, participant: &ParticipantId) -> bool {
        self.outbound.remove(participant).is_some()
    }

    /// Queue a message for one participant.
    pub fn send(&self, participant: &ParticipantId, message: ServerMessage) -> Result<(), TypedError> {
        let Some(tx) = self.outbound.get(participant) else {
            return Err(TypedError::new(
                ErrorKind::Connection(ConnectionFault::Lost),
                "no outbound channel for participant",
            )
            .with_context("participant", participant.to_uuid_string()));
        };
        if tx.send(message).is_err() {
            drop(tx);
            self.outbound.remove(participant);
            return Err(TypedError::new(
                ErrorKind::Connection(ConnectionFault::Lost),
                "outbound channel closed",
            )
            .with_context("participant", participant.to_uuid_string()));
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue a message for every open participant. Returns deliveries.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        self.outbound
            .iter()
            .filter(|entry| entry.value().send(message.clone()).is_ok())
            .count()
    }

    /// Is a queue open for the participant?
    pub fn is_open(&self, participant: &ParticipantId) -> bool {
        self.outbound.contains_key(participant)
    }

    /// Messages queued so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl ProbeSink for ChannelProbeSink {
    fn send_probe(&self, participant: &ParticipantId, sequence: u64) -> Result<(), TypedError> {
        self.send(participant, ServerMessage::heartbeat(sequence))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CardId;
    use crate::error::SecurityFault;
    use crate::security::validator::ActionKind;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    #[test]
    fn test_client_message_json_shape() {
        let msg = ClientMessage::HeartbeatAck { sequence: 9 };
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"heartbeat_ack","sequence":9}"#);
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);

        let action = ProposedAction::new(3, pid(1), ActionKind::PlayCard).with_source(CardId(4));
        let parsed = ClientMessage::from_json(&ClientMessage::Action(action.clone()).to_json().unwrap()).unwrap();
        assert_eq!(parsed, ClientMessage::Action(action));
    }

    #[test]
    fn test_action_rejected_carries_reason() {
        let msg = ServerMessage::ActionRejected {
            action_id: 11,
            rejection: ActionRejection::NotVisible { card: CardId(40) },
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("action_rejected"));
        assert!(json.contains("not_visible"));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_server_error_from_typed_error() {
        let typed = TypedError::new(ErrorKind::Security(SecurityFault::Validation), "forged action");
        let err = ServerError::from(&typed);
        assert!(err.code.starts_with("SEC-"));
        assert_eq!(err.category, ErrorCategory::Security);
        assert!(!err.recoverable);

        let json = ServerMessage::Error(err).to_json().unwrap();
        assert!(json.contains("forged action"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_probes() {
        let sink = ChannelProbeSink::new();
        let mut rx = sink.open(pid(1));

        sink.send_probe(&pid(1), 5).unwrap();
        match rx.recv().await {
            Some(ServerMessage::Heartbeat { sequence, .. }) => assert_eq!(sequence, 5),
            other => panic!("unexpected {other:?}"),
        }

        let err = sink.send_probe(&pid(2), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection(ConnectionFault::Lost));
    }

    #[tokio::test]
    async fn test_closed_receiver_drops_channel() {
        let sink = ChannelProbeSink::new();
        drop(sink.open(pid(1)));
        assert!(sink.send_probe(&pid(1), 1).is_err());
        assert!(!sink.is_open(&pid(1)));
        assert_eq!(sink.delivered(), 0);
    }
}
