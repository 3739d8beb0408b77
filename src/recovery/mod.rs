//! Recovery Strategies & Error Router
//!
//! Pluggable strategies that try to resolve a classified [`TypedError`], and
//! the router that picks one per error.
//!
//! ## Built-in Strategies
//!
//! | Strategy  | Priority | Attempts | Handles                                  |
//! |-----------|----------|----------|------------------------------------------|
//! | Reconnect | 80       | 5        | connection faults, heartbeat timeouts    |
//! | Resync    | 70       | 2        | state divergence, out-of-sequence frames |
//! | Retry     | 50       | 3        | recoverable connection/protocol faults   |
//! | Fallback  | 20       | 1        | application and resource faults          |
//!
//! Non-recoverable errors are never handed to a strategy.

pub mod backoff;
pub mod degradation;
pub mod retry;
pub mod reconnect;
pub mod resync;
pub mod fallback;
pub mod router;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Serialize, Deserialize};

use crate::config::ResilienceConfig;
use crate::core::{CancelToken, ParticipantId};
use crate::error::{RecoveryTag, TypedError};
use crate::network::{ConnectionStateMachine, ReconnectCoordinator, SessionLink};

pub use backoff::BackoffPolicy;
pub use degradation::{DegradationRegistry, DegradeError};
pub use retry::RetryStrategy;
pub use reconnect::ReconnectStrategy;
pub use resync::ResyncStrategy;
pub use fallback::FallbackStrategy;
pub use router::{ErrorRouter, ErrorStatistics, RouterEvent, RouterTotals};

// =============================================================================
// RESULTS
// =============================================================================

/// Details carried by every [`RecoveryResult`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Human-readable outcome.
    pub message: String,
    /// Time spent in the strategy, in milliseconds.
    pub duration_ms: u64,
    /// Underlying cause when the recovery did not fully succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Strategy specific details.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RecoveryReport {
    /// Report with a message and duration.
    pub fn new(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            message: message.into(),
            duration_ms: duration.as_millis() as u64,
            cause: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a cause.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Duration as a `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Outcome of one recovery attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum RecoveryResult {
    /// Fully recovered.
    Success(RecoveryReport),
    /// Could not recover now; the caller may try again later.
    Retry(RecoveryReport),
    /// Recovery failed.
    Failure(RecoveryReport),
    /// Recovered with reduced functionality.
    PartialSuccess(RecoveryReport),
    /// The strategy had nothing to act on.
    NotApplicable(RecoveryReport),
}

impl RecoveryResult {
    /// The attached report.
    pub fn report(&self) -> &RecoveryReport {
        match self {
            RecoveryResult::Success(r)
            | RecoveryResult::Retry(r)
            | RecoveryResult::Failure(r)
            | RecoveryResult::PartialSuccess(r)
            | RecoveryResult::NotApplicable(r) => r,
        }
    }

    /// Did the session come back, fully or partially?
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryResult::Success(_) | RecoveryResult::PartialSuccess(_))
    }

    /// Outcome name.
    pub fn outcome(&self) -> &'static str {
        match self {
            RecoveryResult::Success(_) => "success",
            RecoveryResult::Retry(_) => "retry",
            RecoveryResult::Failure(_) => "failure",
            RecoveryResult::PartialSuccess(_) => "partial_success",
            RecoveryResult::NotApplicable(_) => "not_applicable",
        }
    }
}

impl fmt::Display for RecoveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.outcome(), self.report().message)
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// A re-runnable operation handed to the retry strategy.
pub type RetryOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Collaborators a strategy may need. Every field is optional.
#[derive(Clone, Default)]
pub struct RecoveryContext {
    /// Participant the error belongs to.
    pub participant: Option<ParticipantId>,
    /// The participant's session link.
    pub link: Option<Arc<dyn SessionLink>>,
    /// Connection state machine.
    pub connections: Option<Arc<ConnectionStateMachine>>,
    /// Reconnection coordinator.
    pub reconnector: Option<Arc<ReconnectCoordinator>>,
    /// Degradable features.
    pub degradation: Option<Arc<DegradationRegistry>>,
    /// Active configuration.
    pub config: Option<Arc<ResilienceConfig>>,
    /// Operation to re-run for plain retries.
    pub operation: Option<RetryOperation>,
    /// Cancels any waiting the strategy does.
    pub cancel: CancelToken,
    /// Additional key/value context.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl RecoveryContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the participant.
    pub fn with_participant(mut self, participant: ParticipantId) -> Self {
        self.participant = Some(participant);
        self
    }

    /// Set the session link.
    pub fn with_link(mut self, link: Arc<dyn SessionLink>) -> Self {
        self.link = Some(link);
        self
    }

    /// Set the connection state machine.
    pub fn with_connections(mut self, connections: Arc<ConnectionStateMachine>) -> Self {
        self.connections = Some(connections);
        self
    }

    /// Set the reconnection coordinator.
    pub fn with_reconnector(mut self, reconnector: Arc<ReconnectCoordinator>) -> Self {
        self.reconnector = Some(reconnector);
        self
    }

    /// Set the degradation registry.
    pub fn with_degradation(mut self, degradation: Arc<DegradationRegistry>) -> Self {
        self.degradation = Some(degradation);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: Arc<ResilienceConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the retry operation.
    pub fn with_operation<F>(mut self, operation: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        self.operation = Some(Arc::new(operation));
        self
    }

    /// Use an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Add a key/value entry.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// String value from the context, falling back to the error's context.
    pub fn string_value(&self, key: &str, error: &TypedError) -> Option<String> {
        self.values
            .get(key)
            .or_else(|| error.context_value(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl fmt::Debug for RecoveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryContext")
            .field("participant", &self.participant)
            .field("link", &self.link.is_some())
            .field("connections", &self.connections.is_some())
            .field("reconnector", &self.reconnector.is_some())
            .field("degradation", &self.degradation.is_some())
            .field("operation", &self.operation.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("values", &self.values)
            .finish()
    }
}

// =============================================================================
// STRATEGY TRAIT
// =============================================================================

/// A pluggable handler for one class of fault.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Name used in logs and statistics.
    fn name(&self) -> &str;

    /// What kind of recovery this is.
    fn recovery_type(&self) -> RecoveryTag;

    /// Selection priority in `0..=100`, higher wins.
    fn priority(&self) -> u8;

    /// Attempts made inside one `attempt_recovery` call.
    fn max_attempts(&self) -> u32;

    /// Delay before the given 1-based attempt.
    fn retry_delay(&self, attempt: u32) -> Duration;

    /// Can this strategy handle the error?
    fn can_recover(&self, error: &TypedError) -> bool;

    /// Try to recover. Multi-attempt policy lives here, not in the router.
    async fn attempt_recovery(&self, error: &TypedError, context: &RecoveryContext) -> RecoveryResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serialization_shape() {
        let result = RecoveryResult::PartialSuccess(
            RecoveryReport::new("chat disabled", Duration::from_millis(12)).with_metadata("feature", "chat"),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "partial_success");
        assert_eq!(json["report"]["duration_ms"], 12);
        assert_eq!(json["report"]["metadata"]["feature"], "chat");
        assert!(json["report"].get("cause").is_none());
        assert!(result.is_success());
    }

    #[test]
    fn test_context_value_lookup() {
        let error = TypedError::new(crate::error::ErrorKind::UNCLASSIFIED, "x")
            .with_context("feature", "chat");
        let ctx = RecoveryContext::new();
        assert_eq!(ctx.string_value("feature", &error).as_deref(), Some("chat"));
        let ctx = ctx.with_value("feature", "animations");
        assert_eq!(ctx.string_value("feature", &error).as_deref(), Some("animations"));
    }
}
