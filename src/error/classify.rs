//! Failure Classifier
//!
//! Maps lower-level failures onto the nearest concrete [`ErrorKind`].
//! Known error types are matched structurally first; anything else is
//! matched on its message, and the last resort is
//! [`ErrorKind::UNCLASSIFIED`].

use std::collections::BTreeMap;
use std::io;

use super::kind::{
    ApplicationFault, AuthenticationFault, ConnectionFault, ErrorKind, GameStateFault,
    ProtocolFault, SecurityFault, SerializationFault, TimeoutFault,
};
use super::typed::TypedError;
use crate::network::auth::AuthError;
use crate::network::codec::CodecError;

/// A generic description of a failure that happened below this layer.
#[derive(Debug, Clone, Default)]
pub struct FaultReport {
    /// Failure message as reported by the source.
    pub message: String,
    /// I/O error kind, when the failure came from a socket or file.
    pub io_kind: Option<io::ErrorKind>,
    /// Free-form metadata (operation name, peer, ...).
    pub metadata: BTreeMap<String, String>,
}

impl FaultReport {
    /// Create a report from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach an I/O error kind.
    pub fn with_io_kind(mut self, kind: io::ErrorKind) -> Self {
        self.io_kind = Some(kind);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&io::Error> for FaultReport {
    fn from(err: &io::Error) -> Self {
        FaultReport::new(err.to_string()).with_io_kind(err.kind())
    }
}

/// Classify a generic fault report.
pub fn classify(report: &FaultReport) -> TypedError {
    let kind = report
        .io_kind
        .and_then(kind_for_io)
        .or_else(|| kind_for_metadata(&report.metadata))
        .or_else(|| kind_for_message(&report.message))
        .unwrap_or(ErrorKind::UNCLASSIFIED);

    let mut error = TypedError::new(kind, report.message.clone())
        .with_context("fault.message", report.message.clone());
    if let Some(io_kind) = report.io_kind {
        error = error.with_context("fault.io_kind", format!("{io_kind:?}"));
    }
    for (key, value) in &report.metadata {
        error = error.with_context(key.clone(), value.clone());
    }
    error
}

/// Classify any error value, walking its `source()` chain.
pub fn classify_error(err: &(dyn std::error::Error + 'static)) -> TypedError {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(kind) = kind_for_known_type(e) {
            return TypedError::new(kind, err.to_string())
                .with_context("fault.message", err.to_string())
                .with_context("fault.matched", e.to_string());
        }
        current = e.source();
    }

    classify(&FaultReport::new(err.to_string()))
}

/// Classify an `anyhow::Error` by its chain.
pub fn classify_anyhow(err: &anyhow::Error) -> TypedError {
    for cause in err.chain() {
        if let Some(kind) = kind_for_known_type(cause) {
            return TypedError::new(kind, format!("{err:#}"))
                .with_context("fault.message", format!("{err:#}"));
        }
    }
    classify(&FaultReport::new(format!("{err:#}")))
}

fn kind_for_known_type(e: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
    if let Some(io_err) = e.downcast_ref::<io::Error>() {
        return kind_for_io(io_err.kind()).or_else(|| kind_for_message(&io_err.to_string()));
    }
    if e.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(ErrorKind::Timeout(TimeoutFault::Operation));
    }
    if let Some(json_err) = e.downcast_ref::<serde_json::Error>() {
        return Some(match json_err.classify() {
            serde_json::error::Category::Io => ErrorKind::Connection(ConnectionFault::Lost),
            serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                ErrorKind::Protocol(ProtocolFault::Malformed)
            }
            serde_json::error::Category::Data => {
                if json_err.to_string().contains("unknown variant") {
                    ErrorKind::Protocol(ProtocolFault::UnknownMessage)
                } else {
                    ErrorKind::Serialization(SerializationFault::Decode)
                }
            }
        });
    }
    if e.downcast_ref::<bincode::ErrorKind>().is_some() {
        return Some(ErrorKind::Serialization(SerializationFault::Decode));
    }
    if let Some(auth) = e.downcast_ref::<AuthError>() {
        return Some(auth.error_kind());
    }
    if let Some(codec) = e.downcast_ref::<CodecError>() {
        return Some(codec.error_kind());
    }
    if let Some(typed) = e.downcast_ref::<TypedError>() {
        return Some(typed.kind());
    }
    None
}

fn kind_for_io(kind: io::ErrorKind) -> Option<ErrorKind> {
    use io::ErrorKind as Io;
    Some(match kind {
        Io::TimedOut | Io::WouldBlock => ErrorKind::Connection(ConnectionFault::Timeout),
        Io::ConnectionRefused => ErrorKind::Connection(ConnectionFault::Refused),
        Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::BrokenPipe
        | Io::NotConnected
        | Io::UnexpectedEof => ErrorKind::Connection(ConnectionFault::Lost),
        Io::InvalidData => ErrorKind::Protocol(ProtocolFault::Malformed),
        Io::PermissionDenied => ErrorKind::Security(SecurityFault::Authorization),
        Io::OutOfMemory => ErrorKind::Application(ApplicationFault::ResourceExhausted),
        _ => return None,
    })
}

fn kind_for_metadata(metadata: &BTreeMap<String, String>) -> Option<ErrorKind> {
    match metadata.get("fault.kind").map(String::as_str) {
        Some("heartbeat_timeout") => Some(ErrorKind::Timeout(TimeoutFault::Heartbeat)),
        Some("request_timeout") => Some(ErrorKind::Timeout(TimeoutFault::Request)),
        Some("desync") => Some(ErrorKind::GameState(GameStateFault::Sync)),
        _ => None,
    }
}

/// Message patterns, checked in order. The first match wins, so specific
/// entries sit above general ones. Needles only match at the start of a word.
const MESSAGE_PATTERNS: &[(&[&str], ErrorKind)] = &[
    (&["corrupt"], ErrorKind::GameState(GameStateFault::Corruption)),
    (&["desync", "state hash mismatch", "diverged"], ErrorKind::GameState(GameStateFault::Sync)),
    (&["illegal phase", "invalid transition"], ErrorKind::GameState(GameStateFault::TransitionViolation)),
    (&["signature", "checksum mismatch", "tampered"], ErrorKind::Security(SecurityFault::Validation)),
    (&["unauthorized", "forbidden", "permission denied", "not allowed"], ErrorKind::Security(SecurityFault::Authorization)),
    (&["token expired", "credentials expired"], ErrorKind::Authentication(AuthenticationFault::Expired)),
    (&["missing token", "no credentials"], ErrorKind::Authentication(AuthenticationFault::Missing)),
    (&["invalid token", "bad credentials", "login failed"], ErrorKind::Authentication(AuthenticationFault::InvalidCredentials)),
    (&["heartbeat"], ErrorKind::Timeout(TimeoutFault::Heartbeat)),
    (&["refused"], ErrorKind::Connection(ConnectionFault::Refused)),
    (&["timed out", "timeout", "deadline"], ErrorKind::Connection(ConnectionFault::Timeout)),
    (&["out of sequence", "sequence gap", "unexpected sequence"], ErrorKind::Protocol(ProtocolFault::OutOfSequence)),
    (&["unknown message", "unknown variant", "unsupported message"], ErrorKind::Protocol(ProtocolFault::UnknownMessage)),
    (&["malformed", "invalid json", "parse error", "unexpected end", "unexpected eof", "while parsing"], ErrorKind::Protocol(ProtocolFault::Malformed)),
    (&["reset by peer", "broken pipe", "connection closed", "connection lost", "disconnected", "eof"], ErrorKind::Connection(ConnectionFault::Lost)),
    (&["version mismatch", "unsupported version"], ErrorKind::Serialization(SerializationFault::VersionMismatch)),
    (&["deserialize", "decode"], ErrorKind::Serialization(SerializationFault::Decode)),
    (&["serialize", "encode"], ErrorKind::Serialization(SerializationFault::Encode)),
    (&["out of memory", "resource exhausted", "too many open files", "capacity", "queue full"], ErrorKind::Application(ApplicationFault::ResourceExhausted)),
];

fn kind_for_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| starts_word(&lower, n)))
        .map(|(_, kind)| *kind)
}

/// Does `needle` occur in `haystack` starting on a word boundary?
fn starts_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(at, _)| {
        haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind::{ErrorCategory, Severity};

    #[test]
    fn test_io_kinds() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(
            classify(&FaultReport::from(&refused)).kind(),
            ErrorKind::Connection(ConnectionFault::Refused)
        );

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            classify_error(&reset).kind(),
            ErrorKind::Connection(ConnectionFault::Lost)
        );

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            classify_error(&timed_out).kind(),
            ErrorKind::Connection(ConnectionFault::Timeout)
        );
    }

    #[test]
    fn test_message_heuristics() {
        let cases = [
            ("Connection refused (os error 111)", ErrorKind::Connection(ConnectionFault::Refused)),
            ("operation timed out", ErrorKind::Connection(ConnectionFault::Timeout)),
            ("malformed frame header", ErrorKind::Protocol(ProtocolFault::Malformed)),
            ("message 17 out of sequence", ErrorKind::Protocol(ProtocolFault::OutOfSequence)),
            ("allocation failed: out of memory", ErrorKind::Application(ApplicationFault::ResourceExhausted)),
            ("table state corrupt after merge", ErrorKind::GameState(GameStateFault::Corruption)),
            ("client desync detected", ErrorKind::GameState(GameStateFault::Sync)),
            ("failed to deserialize payload", ErrorKind::Serialization(SerializationFault::Decode)),
            ("could not decode snapshot", ErrorKind::Serialization(SerializationFault::Decode)),
            ("failed to serialize table", ErrorKind::Serialization(SerializationFault::Encode)),
            ("unexpected eof while parsing frame", ErrorKind::Protocol(ProtocolFault::Malformed)),
            ("peer closed stream: eof", ErrorKind::Connection(ConnectionFault::Lost)),
            ("geofence lookup failed", ErrorKind::UNCLASSIFIED),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&FaultReport::new(message)).kind(), expected, "{message}");
        }
    }

    #[test]
    fn test_unclassified_fallback() {
        let err = classify(&FaultReport::new("something odd happened"));
        assert_eq!(err.kind(), ErrorKind::UNCLASSIFIED);
        assert_eq!(err.category(), ErrorCategory::Application);
        assert_eq!(
            err.context_value("fault.message"),
            Some(&serde_json::json!("something odd happened"))
        );
    }

    #[test]
    fn test_metadata_wins_over_message() {
        let report = FaultReport::new("connection timed out")
            .with_metadata("fault.kind", "heartbeat_timeout");
        assert_eq!(classify(&report).kind(), ErrorKind::Timeout(TimeoutFault::Heartbeat));
    }

    #[test]
    fn test_json_errors() {
        let syntax = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(classify_error(&syntax).kind(), ErrorKind::Protocol(ProtocolFault::Malformed));
    }

    #[test]
    fn test_security_classification_is_critical() {
        let err = classify(&FaultReport::new("action checksum mismatch"));
        assert_eq!(err.kind(), ErrorKind::Security(SecurityFault::Validation));
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_anyhow_chain() {
        let root = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err = anyhow::Error::new(root).context("sending heartbeat probe");
        assert_eq!(classify_anyhow(&err).kind(), ErrorKind::Connection(ConnectionFault::Lost));
    }
}
