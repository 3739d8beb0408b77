//! Retry Strategy
//!
//! Re-runs the failed operation with exponential backoff.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use super::{BackoffPolicy, RecoveryContext, RecoveryReport, RecoveryResult, RecoveryStrategy, RetryOperation};
use crate::error::{ErrorCategory, ErrorKind, RecoveryTag, TimeoutFault, TypedError};

/// Plain backoff retry for transient faults.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), 3)
    }
}

impl RetryStrategy {
    /// Strategy with a custom policy.
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for RetryStrategy {
    fn name(&self) -> &str {
        "retry"
    }

    fn recovery_type(&self) -> RecoveryTag {
        RecoveryTag::Retry
    }

    fn priority(&self) -> u8 {
        50
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.policy.delay_before(attempt)
    }

    fn can_recover(&self, error: &TypedError) -> bool {
        if !error.is_recoverable() {
            return false;
        }
        match error.kind() {
            ErrorKind::Timeout(TimeoutFault::Heartbeat) => false,
            ErrorKind::Timeout(_) => true,
            kind => matches!(
                kind.category(),
                ErrorCategory::Connection | ErrorCategory::Protocol | ErrorCategory::Serialization
            ),
        }
    }

    async fn attempt_recovery(&self, error: &TypedError, context: &RecoveryContext) -> RecoveryResult {
        let started = Instant::now();

        let operation = match (&context.operation, &context.link) {
            (Some(op), _) => op.clone(),
            (None, Some(link)) if error.category() == ErrorCategory::Connection => {
                let link = link.clone();
                Arc::new(move || {
                    let link = link.clone();
                    async move {
                        if link.attempt_connection().await {
                            Ok(())
                        } else {
                            Err("connection attempt failed".to_string())
                        }
                    }
                    .boxed()
                }) as RetryOperation
            }
            _ => {
                return RecoveryResult::NotApplicable(RecoveryReport::new(
                    "no operation to retry",
                    started.elapsed(),
                ));
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            if context.cancel.sleep(self.retry_delay(attempt)).await.is_err() {
                return RecoveryResult::Failure(
                    RecoveryReport::new("retry cancelled", started.elapsed())
                        .with_cause("cancelled")
                        .with_metadata("attempts", attempt - 1),
                );
            }

            match context.cancel.run(operation()).await {
                Ok(Ok(())) => {
                    return RecoveryResult::Success(
                        RecoveryReport::new(format!("succeeded on attempt {attempt}"), started.elapsed())
                            .with_metadata("attempts", attempt),
                    );
                }
                Ok(Err(e)) => {
                    debug!(code = error.code(), attempt, error = %e, "Retry attempt failed");
                    last_error = e;
                }
                Err(_) => {
                    return RecoveryResult::Failure(
                        RecoveryReport::new("retry cancelled", started.elapsed())
                            .with_cause("cancelled")
                            .with_metadata("attempts", attempt),
                    );
                }
            }
        }

        RecoveryResult::Failure(
            RecoveryReport::new(
                format!("gave up after {} attempts", self.max_attempts),
                started.elapsed(),
            )
            .with_cause(last_error)
            .with_metadata("attempts", self.max_attempts),
        )
    }
}
