//! Reconnect Strategy
//!
//! Hands connection loss to the [`ReconnectCoordinator`] so the router and
//! the guard share one pipeline per participant.
//!
//! [`ReconnectCoordinator`]: crate::network::ReconnectCoordinator

use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{BackoffPolicy, RecoveryContext, RecoveryReport, RecoveryResult, RecoveryStrategy};
use crate::error::{ErrorKind, RecoveryTag, TimeoutFault, TypedError};
use crate::network::{DisconnectReason, ReconnectOutcome, ReconnectSettings};

/// Restores a lost connection, then resyncs.
#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectStrategy {
    /// Strategy reporting the same backoff and attempt cap as the
    /// coordinator built from `settings`.
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            policy: settings.backoff,
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for ReconnectStrategy {
    fn name(&self) -> &str {
        "reconnect"
    }

    fn recovery_type(&self) -> RecoveryTag {
        RecoveryTag::Reconnect
    }

    fn priority(&self) -> u8 {
        80
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.policy.delay_before(attempt)
    }

    fn can_recover(&self, error: &TypedError) -> bool {
        error.is_recoverable()
            && matches!(
                error.kind(),
                ErrorKind::Connection(_) | ErrorKind::Timeout(TimeoutFault::Heartbeat)
            )
    }

    async fn attempt_recovery(&self, error: &TypedError, context: &RecoveryContext) -> RecoveryResult {
        let started = Instant::now();

        let (Some(coordinator), Some(participant), Some(link)) =
            (&context.reconnector, context.participant, &context.link)
        else {
            return RecoveryResult::NotApplicable(RecoveryReport::new(
                "reconnection needs a coordinator, participant and link",
                started.elapsed(),
            ));
        };

        let reason = DisconnectReason::from_error(error);
        if !reason.policy().can_reconnect {
            return RecoveryResult::NotApplicable(
                RecoveryReport::new("disconnect reason forbids reconnection", started.elapsed())
                    .with_metadata("reason", reason),
            );
        }

        debug!(participant = %participant, code = error.code(), reason = %reason, "Delegating to reconnection coordinator");
        let handle = coordinator.reconnect(participant, reason, link.clone());
        let outcome = match context.cancel.run(handle.outcome()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                handle.cancel();
                handle.outcome().await
            }
        };

        match outcome {
            ReconnectOutcome::Reconnected { attempts, resynced: true, .. } => RecoveryResult::Success(
                RecoveryReport::new(format!("reconnected after {attempts} attempts"), started.elapsed())
                    .with_metadata("attempts", attempts),
            ),
            ReconnectOutcome::Reconnected { attempts, resynced: false, .. } => RecoveryResult::PartialSuccess(
                RecoveryReport::new("reconnected but state resync failed", started.elapsed())
                    .with_cause("resync failed")
                    .with_metadata("attempts", attempts),
            ),
            ReconnectOutcome::GaveUp { attempts, last_error, .. } => RecoveryResult::Failure(
                RecoveryReport::new(format!("gave up after {attempts} attempts"), started.elapsed())
                    .with_cause(last_error)
                    .with_metadata("attempts", attempts),
            ),
            ReconnectOutcome::Cancelled { attempts } => RecoveryResult::Failure(
                RecoveryReport::new("reconnection cancelled", started.elapsed())
                    .with_cause("cancelled")
                    .with_metadata("attempts", attempts),
            ),
            ReconnectOutcome::NotPermitted { reason } => RecoveryResult::NotApplicable(
                RecoveryReport::new("reconnection not permitted", started.elapsed())
                    .with_metadata("reason", reason),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::core::ParticipantId;
    use crate::error::{AuthenticationFault, ConnectionFault, SecurityFault};
    use crate::network::{ConnectionState, ConnectionStateMachine, ReconnectCoordinator, ScriptedLink};
    use crate::recovery::ErrorRouter;

    fn pid() -> ParticipantId {
        ParticipantId::new([3; 16])
    }

    fn wired(link: Arc<ScriptedLink>) -> (RecoveryContext, Arc<ConnectionStateMachine>) {
        let connections = Arc::new(ConnectionStateMachine::default());
        connections.initialize(pid(), ConnectionState::Connected);
        let settings = ReconnectSettings {
            backoff: BackoffPolicy::default(),
            ..Default::default()
        };
        let coordinator = Arc::new(ReconnectCoordinator::new(
            settings,
            connections.clone(),
            Arc::new(ErrorRouter::new()),
        ));
        let context = RecoveryContext::new()
            .with_participant(pid())
            .with_link(link)
            .with_connections(connections.clone())
            .with_reconnector(coordinator);
        (context, connections)
    }

    #[test]
    fn test_can_recover() {
        let strategy = ReconnectStrategy::default();
        assert!(strategy.can_recover(&TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "x")));
        assert!(strategy.can_recover(&TypedError::new(ErrorKind::Timeout(TimeoutFault::Heartbeat), "x")));
        assert!(!strategy.can_recover(&TypedError::new(ErrorKind::Timeout(TimeoutFault::Request), "x")));
        assert!(!strategy.can_recover(&TypedError::new(ErrorKind::Security(SecurityFault::Validation), "x")));
        assert!(!strategy.can_recover(
            &TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "x").with_recoverable(false)
        ));
    }

    #[test]
    fn test_reports_coordinator_settings() {
        let settings = ReconnectSettings {
            backoff: BackoffPolicy::exponential(Duration::from_millis(250), 3.0, Duration::from_secs(4)),
            max_attempts: 7,
            ..Default::default()
        };
        let strategy = ReconnectStrategy::from_settings(&settings);
        assert_eq!(strategy.max_attempts(), 7);
        assert_eq!(strategy.retry_delay(1), Duration::ZERO);
        assert_eq!(strategy.retry_delay(2), Duration::from_millis(250));
        assert_eq!(strategy.retry_delay(3), Duration::from_millis(750));
        assert_eq!(strategy.retry_delay(5), Duration::from_secs(4));

        let defaults = ReconnectStrategy::default();
        assert_eq!(defaults.max_attempts(), ReconnectSettings::default().max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_through_coordinator() {
        let link = Arc::new(ScriptedLink::connected());
        link.script_connects([false, true]);
        let (context, connections) = wired(link.clone());

        let error = TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "socket closed");
        let result = ReconnectStrategy::default().attempt_recovery(&error, &context).await;

        assert!(matches!(result, RecoveryResult::Success(_)), "{result}");
        assert_eq!(result.report().metadata.get("attempts").map(String::as_str), Some("2"));
        assert_eq!(connections.current_state(&pid()), Some(ConnectionState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resync_is_partial() {
        let link = Arc::new(ScriptedLink::connected());
        link.set_default_sync(false);
        let (context, _) = wired(link);

        let error = TypedError::new(ErrorKind::Timeout(TimeoutFault::Heartbeat), "silent");
        let result = ReconnectStrategy::default().attempt_recovery(&error, &context).await;
        assert!(matches!(result, RecoveryResult::PartialSuccess(_)), "{result}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_failure() {
        let link = Arc::new(ScriptedLink::connected());
        link.set_default_connect(false);
        let (context, connections) = wired(link.clone());

        let error = TypedError::new(ErrorKind::Connection(ConnectionFault::Refused), "refused");
        let result = ReconnectStrategy::default().attempt_recovery(&error, &context).await;
        assert!(matches!(result, RecoveryResult::Failure(_)), "{result}");
        assert_eq!(link.connection_attempts(), 5);
        assert_eq!(connections.current_state(&pid()), Some(ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_missing_collaborators() {
        let error = TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "x");
        let result = ReconnectStrategy::default()
            .attempt_recovery(&error, &RecoveryContext::new())
            .await;
        assert!(matches!(result, RecoveryResult::NotApplicable(_)));

        let auth = TypedError::new(ErrorKind::Authentication(AuthenticationFault::Expired), "x")
            .with_recoverable(true);
        let (context, _) = wired(Arc::new(ScriptedLink::connected()));
        let result = ReconnectStrategy::default().attempt_recovery(&auth, &context).await;
        assert!(matches!(result, RecoveryResult::NotApplicable(_)));
    }
}
