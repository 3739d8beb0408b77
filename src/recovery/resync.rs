//! Resync Strategy
//!
//! Pulls authoritative state again after the local view diverged.

use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{RecoveryContext, RecoveryReport, RecoveryResult, RecoveryStrategy};
use crate::error::{ErrorKind, GameStateFault, ProtocolFault, RecoveryTag, TypedError};
use crate::network::ConnectionState;

/// Requests a state refresh from the session link.
#[derive(Debug, Clone)]
pub struct ResyncStrategy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for ResyncStrategy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

impl ResyncStrategy {
    /// At most two attempts are ever made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, 2),
            delay,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for ResyncStrategy {
    fn name(&self) -> &str {
        "resync"
    }

    fn recovery_type(&self) -> RecoveryTag {
        RecoveryTag::Resync
    }

    fn priority(&self) -> u8 {
        70
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    fn can_recover(&self, error: &TypedError) -> bool {
        error.is_recoverable()
            && matches!(
                error.kind(),
                ErrorKind::GameState(GameStateFault::Sync)
                    | ErrorKind::GameState(GameStateFault::TransitionViolation)
                    | ErrorKind::Protocol(ProtocolFault::OutOfSequence)
            )
    }

    async fn attempt_recovery(&self, error: &TypedError, context: &RecoveryContext) -> RecoveryResult {
        let started = Instant::now();

        let Some(link) = context.link.as_ref() else {
            return RecoveryResult::NotApplicable(RecoveryReport::new(
                "no session link to resync",
                started.elapsed(),
            ));
        };

        // A participant mid-reconnect resyncs at the end of that pipeline.
        if let (Some(connections), Some(participant)) = (&context.connections, context.participant) {
            if connections.current_state(&participant) == Some(ConnectionState::Reconnecting) {
                return RecoveryResult::Retry(
                    RecoveryReport::new("reconnection in progress", started.elapsed())
                        .with_metadata("participant", participant),
                );
            }
        }

        for attempt in 1..=self.max_attempts {
            if context.cancel.sleep(self.retry_delay(attempt)).await.is_err() {
                return RecoveryResult::Failure(
                    RecoveryReport::new("resync cancelled", started.elapsed()).with_cause("cancelled"),
                );
            }

            if !link.is_connected() {
                return RecoveryResult::Retry(
                    RecoveryReport::new("link is not connected", started.elapsed())
                        .with_metadata("attempts", attempt - 1),
                );
            }

            match context.cancel.run(link.request_state_sync()).await {
                Ok(true) => {
                    info!(code = error.code(), attempt, "State resynchronized");
                    return RecoveryResult::Success(
                        RecoveryReport::new("state resynchronized", started.elapsed())
                            .with_metadata("attempts", attempt),
                    );
                }
                Ok(false) => debug!(code = error.code(), attempt, "Resync request failed"),
                Err(_) => {
                    return RecoveryResult::Failure(
                        RecoveryReport::new("resync cancelled", started.elapsed()).with_cause("cancelled"),
                    );
                }
            }
        }

        RecoveryResult::Failure(
            RecoveryReport::new("authoritative state unavailable", started.elapsed())
                .with_cause(error.message().to_string())
                .with_metadata("attempts", self.max_attempts),
        )
    }
}
