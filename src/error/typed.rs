//! Typed Errors
//!
//! The immutable error value routed through the recovery layer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use super::kind::{ErrorCategory, ErrorKind, RecoveryTag, Severity};

/// Structured context attached to an error.
pub type ErrorContext = BTreeMap<String, serde_json::Value>;

/// Per-process counter used for the trailing part of error codes.
static CODE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A classified error.
///
/// Built once through the `with_*` methods, then shared immutably
/// (usually behind an `Arc`).
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct TypedError {
    id: uuid::Uuid,
    kind: ErrorKind,
    severity: Severity,
    timestamp: DateTime<Utc>,
    message: String,
    context: ErrorContext,
    recoverable: bool,
    code: String,
}

impl TypedError {
    /// Create an error with the kind's default severity and recoverability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let sequence = CODE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            severity: kind.default_severity(),
            timestamp,
            message: message.into(),
            context: ErrorContext::new(),
            recoverable: kind.default_recoverable(),
            code: derive_code(kind.category(), &timestamp, sequence),
        }
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Merge several context entries.
    pub fn with_context_map(mut self, context: ErrorContext) -> Self {
        self.context.extend(context);
        self
    }

    /// Override the severity. Fatal kinds stay critical.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = if self.kind.is_fatal() {
            Severity::Critical
        } else {
            severity
        };
        self
    }

    /// Override recoverability. Fatal kinds stay unrecoverable.
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable && !self.kind.is_fatal();
        self
    }

    /// Unique identifier.
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Category × leaf kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Top-level category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context.
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Lookup a context entry.
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Can any automatic recovery be attempted?
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Traceability code, `<PREFIX>-<YYYYMMDD>-<SEQUENCE>`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Recommended recovery approach for this error's kind.
    pub fn recovery_tag(&self) -> RecoveryTag {
        self.kind.recovery_tag()
    }
}

/// Derive an error code from category, date and sequence.
pub fn derive_code(category: ErrorCategory, timestamp: &DateTime<Utc>, sequence: u64) -> String {
    format!(
        "{}-{}-{:06}",
        category.code_prefix(),
        timestamp.format("%Y%m%d"),
        sequence
    )
}
