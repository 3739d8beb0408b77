//! Error Taxonomy
//!
//! Eight categories, each with concrete leaf kinds. Every leaf fixes a default
//! severity, a default recoverability and a recommended recovery strategy.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// SEVERITY
// =============================================================================

/// Ordinal severity used for logging and escalation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, nothing is broken.
    Info,
    /// Transient problem, handled locally.
    Warn,
    /// A feature is failing.
    Error,
    /// Session integrity or security is at stake.
    Critical,
}

impl Severity {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CATEGORY
// =============================================================================

/// Top-level error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport connectivity.
    Connection,
    /// Encoding or decoding payloads.
    Serialization,
    /// Hidden information, authorization and action validation.
    Security,
    /// Shared game state consistency.
    GameState,
    /// Message framing and ordering.
    Protocol,
    /// Deadlines and liveness.
    Timeout,
    /// Identity and credentials.
    Authentication,
    /// Everything else.
    Application,
}

impl ErrorCategory {
    /// Every category, in declaration order.
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Connection,
        ErrorCategory::Serialization,
        ErrorCategory::Security,
        ErrorCategory::GameState,
        ErrorCategory::Protocol,
        ErrorCategory::Timeout,
        ErrorCategory::Authentication,
        ErrorCategory::Application,
    ];

    /// Three letter prefix used in error codes.
    pub fn code_prefix(self) -> &'static str {
        match self {
            ErrorCategory::Connection => "CON",
            ErrorCategory::Serialization => "SER",
            ErrorCategory::Security => "SEC",
            ErrorCategory::GameState => "GST",
            ErrorCategory::Protocol => "PRO",
            ErrorCategory::Timeout => "TMO",
            ErrorCategory::Authentication => "AUT",
            ErrorCategory::Application => "APP",
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Security => "security",
            ErrorCategory::GameState => "game_state",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Application => "application",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RECOVERY TAG
// =============================================================================

/// Recovery approach recommended for an error kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTag {
    /// Nothing can be done automatically.
    None,
    /// Repeat the failed operation.
    Retry,
    /// Re-establish the connection.
    Reconnect,
    /// Pull authoritative state again.
    Resync,
    /// Keep going with reduced functionality.
    Fallback,
    /// A human has to act.
    UserIntervention,
}

// =============================================================================
// LEAF KINDS
// =============================================================================

/// Connection faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFault {
    /// Connect or read timed out.
    Timeout,
    /// Peer refused the connection.
    Refused,
    /// An established connection dropped.
    Lost,
}

/// Serialization faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFault {
    /// Could not encode an outbound value.
    Encode,
    /// Could not decode an inbound payload.
    Decode,
    /// Payload written by an incompatible format version.
    VersionMismatch,
}

/// Security faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityFault {
    /// Identity could not be proven.
    Authentication,
    /// Identity is known but lacks the right.
    Authorization,
    /// A submitted action failed validation.
    Validation,
}

/// Game state faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStateFault {
    /// Local view diverged from the authoritative state.
    Sync,
    /// Authoritative state is corrupt.
    Corruption,
    /// A phase or zone change broke the rules engine's contract.
    TransitionViolation,
}

/// Protocol faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFault {
    /// Message type not understood.
    UnknownMessage,
    /// Message could not be parsed.
    Malformed,
    /// Message arrived out of order.
    OutOfSequence,
}

/// Timeout faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutFault {
    /// No liveness response inside the window.
    Heartbeat,
    /// A request went unanswered.
    Request,
    /// A local operation exceeded its deadline.
    Operation,
}

/// Authentication faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationFault {
    /// Credentials rejected.
    InvalidCredentials,
    /// Credentials expired.
    Expired,
    /// Credentials absent.
    Missing,
}

/// Application faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationFault {
    /// Memory, file handles or queue capacity ran out.
    ResourceExhausted,
    /// Invariant broken inside this process.
    Internal,
    /// Nothing more specific matched.
    Unclassified,
}

// =============================================================================
// ERROR KIND
// =============================================================================

/// Category × leaf kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection category.
    Connection(ConnectionFault),
    /// Serialization category.
    Serialization(SerializationFault),
    /// Security category.
    Security(SecurityFault),
    /// Game state category.
    GameState(GameStateFault),
    /// Protocol category.
    Protocol(ProtocolFault),
    /// Timeout category.
    Timeout(TimeoutFault),
    /// Authentication category.
    Authentication(AuthenticationFault),
    /// Application category.
    Application(ApplicationFault),
}

impl ErrorKind {
    /// The generic fallback kind.
    pub const UNCLASSIFIED: ErrorKind = ErrorKind::Application(ApplicationFault::Unclassified);

    /// Top-level category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::Connection(_) => ErrorCategory::Connection,
            ErrorKind::Serialization(_) => ErrorCategory::Serialization,
            ErrorKind::Security(_) => ErrorCategory::Security,
            ErrorKind::GameState(_) => ErrorCategory::GameState,
            ErrorKind::Protocol(_) => ErrorCategory::Protocol,
            ErrorKind::Timeout(_) => ErrorCategory::Timeout,
            ErrorKind::Authentication(_) => ErrorCategory::Authentication,
            ErrorKind::Application(_) => ErrorCategory::Application,
        }
    }

    /// Faults that must never be recovered automatically.
    ///
    /// A wrong automatic recovery here could mask cheating or spread a corrupt state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Security(_) | ErrorKind::GameState(GameStateFault::Corruption)
        )
    }

    /// Default severity.
    pub fn default_severity(&self) -> Severity {
        if self.is_fatal() {
            return Severity::Critical;
        }
        match self {
            ErrorKind::Connection(ConnectionFault::Timeout) => Severity::Warn,
            ErrorKind::Connection(_) => Severity::Error,
            ErrorKind::Serialization(SerializationFault::Decode) => Severity::Warn,
            ErrorKind::Serialization(_) => Severity::Error,
            ErrorKind::GameState(GameStateFault::Sync) => Severity::Warn,
            ErrorKind::GameState(_) => Severity::Error,
            ErrorKind::Protocol(_) => Severity::Warn,
            ErrorKind::Timeout(_) => Severity::Warn,
            ErrorKind::Authentication(_) => Severity::Error,
            ErrorKind::Application(_) => Severity::Error,
            ErrorKind::Security(_) => Severity::Critical,
        }
    }

    /// Default recoverability.
    pub fn default_recoverable(&self) -> bool {
        if self.is_fatal() {
            return false;
        }
        !matches!(
            self,
            ErrorKind::Serialization(SerializationFault::VersionMismatch)
                | ErrorKind::Authentication(_)
                | ErrorKind::Application(ApplicationFault::Internal)
        )
    }

    /// Recommended recovery approach.
    pub fn recovery_tag(&self) -> RecoveryTag {
        match self {
            ErrorKind::Connection(ConnectionFault::Refused) => RecoveryTag::Retry,
            ErrorKind::Connection(_) => RecoveryTag::Reconnect,
            ErrorKind::Serialization(SerializationFault::VersionMismatch) => RecoveryTag::UserIntervention,
            ErrorKind::Serialization(_) => RecoveryTag::Retry,
            ErrorKind::Security(_) => RecoveryTag::None,
            ErrorKind::GameState(GameStateFault::Corruption) => RecoveryTag::None,
            ErrorKind::GameState(_) => RecoveryTag::Resync,
            ErrorKind::Protocol(ProtocolFault::OutOfSequence) => RecoveryTag::Resync,
            ErrorKind::Protocol(_) => RecoveryTag::Retry,
            ErrorKind::Timeout(TimeoutFault::Heartbeat) => RecoveryTag::Reconnect,
            ErrorKind::Timeout(_) => RecoveryTag::Retry,
            ErrorKind::Authentication(_) => RecoveryTag::UserIntervention,
            ErrorKind::Application(ApplicationFault::Internal) => RecoveryTag::UserIntervention,
            ErrorKind::Application(_) => RecoveryTag::Fallback,
        }
    }

    /// Dotted name, e.g. `connection.lost`.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Connection(ConnectionFault::Timeout) => "connection.timeout",
            ErrorKind::Connection(ConnectionFault::Refused) => "connection.refused",
            ErrorKind::Connection(ConnectionFault::Lost) => "connection.lost",
            ErrorKind::Serialization(SerializationFault::Encode) => "serialization.encode",
            ErrorKind::Serialization(SerializationFault::Decode) => "serialization.decode",
            ErrorKind::Serialization(SerializationFault::VersionMismatch) => "serialization.version_mismatch",
            ErrorKind::Security(SecurityFault::Authentication) => "security.authentication",
            ErrorKind::Security(SecurityFault::Authorization) => "security.authorization",
            ErrorKind::Security(SecurityFault::Validation) => "security.validation",
            ErrorKind::GameState(GameStateFault::Sync) => "game_state.sync",
            ErrorKind::GameState(GameStateFault::Corruption) => "game_state.corruption",
            ErrorKind::GameState(GameStateFault::TransitionViolation) => "game_state.transition_violation",
            ErrorKind::Protocol(ProtocolFault::UnknownMessage) => "protocol.unknown_message",
            ErrorKind::Protocol(ProtocolFault::Malformed) => "protocol.malformed",
            ErrorKind::Protocol(ProtocolFault::OutOfSequence) => "protocol.out_of_sequence",
            ErrorKind::Timeout(TimeoutFault::Heartbeat) => "timeout.heartbeat",
            ErrorKind::Timeout(TimeoutFault::Request) => "timeout.request",
            ErrorKind::Timeout(TimeoutFault::Operation) => "timeout.operation",
            ErrorKind::Authentication(AuthenticationFault::InvalidCredentials) => "authentication.invalid_credentials",
            ErrorKind::Authentication(AuthenticationFault::Expired) => "authentication.expired",
            ErrorKind::Authentication(AuthenticationFault::Missing) => "authentication.missing",
            ErrorKind::Application(ApplicationFault::ResourceExhausted) => "application.resource_exhausted",
            ErrorKind::Application(ApplicationFault::Internal) => "application.internal",
            ErrorKind::Application(ApplicationFault::Unclassified) => "application.unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
