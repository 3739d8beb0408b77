//! Fallback Strategy
//!
//! Keeps the session running with less: switches off optional features
//! instead of restoring full functionality.

use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;

use super::{RecoveryContext, RecoveryReport, RecoveryResult, RecoveryStrategy};
use crate::error::{ErrorCategory, RecoveryTag, TypedError};

/// Context key naming the feature to degrade.
pub const FEATURE_KEY: &str = "feature";

/// Single-attempt graceful degradation.
#[derive(Debug, Clone, Default)]
pub struct FallbackStrategy;

impl FallbackStrategy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        "fallback"
    }

    fn recovery_type(&self) -> RecoveryTag {
        RecoveryTag::Fallback
    }

    fn priority(&self) -> u8 {
        20
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn retry_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn can_recover(&self, error: &TypedError) -> bool {
        error.is_recoverable() && error.category() == ErrorCategory::Application
    }

    async fn attempt_recovery(&self, error: &TypedError, context: &RecoveryContext) -> RecoveryResult {
        let started = Instant::now();

        let Some(registry) = context.degradation.as_ref() else {
            return RecoveryResult::NotApplicable(RecoveryReport::new(
                "no degradable features",
                started.elapsed(),
            ));
        };

        match context.string_value(FEATURE_KEY, error) {
            Some(feature) => match registry.degrade(&feature, error.message()) {
                Ok(_) => RecoveryResult::PartialSuccess(
                    RecoveryReport::new(format!("{feature} disabled"), started.elapsed())
                        .with_metadata("degraded", &feature),
                ),
                Err(e) => RecoveryResult::Failure(
                    RecoveryReport::new(format!("cannot degrade {feature}"), started.elapsed())
                        .with_cause(e.to_string()),
                ),
            },
            None => {
                let degraded = registry.degrade_all_optional(error.message());
                if degraded.is_empty() {
                    RecoveryResult::Failure(
                        RecoveryReport::new("nothing left to degrade", started.elapsed())
                            .with_cause(error.message().to_string()),
                    )
                } else {
                    RecoveryResult::PartialSuccess(
                        RecoveryReport::new(
                            format!("{} optional features disabled", degraded.len()),
                            started.elapsed(),
                        )
                        .with_metadata("degraded", degraded.join(",")),
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::error::{ApplicationFault, ErrorKind};
    use crate::recovery::DegradationRegistry;

    fn exhausted() -> TypedError {
        TypedError::new(ErrorKind::Application(ApplicationFault::ResourceExhausted), "queue full")
    }

    #[test]
    fn test_can_recover() {
        let strategy = FallbackStrategy::new();
        assert!(strategy.can_recover(&exhausted()));
        assert!(strategy.can_recover(&TypedError::new(ErrorKind::UNCLASSIFIED, "?")));
        assert!(!strategy.can_recover(&TypedError::new(ErrorKind::Application(ApplicationFault::Internal), "bug")));
    }

    #[tokio::test]
    async fn test_degrades_named_feature() {
        let registry = Arc::new(DegradationRegistry::with_session_features());
        let ctx = RecoveryContext::new()
            .with_degradation(registry.clone())
            .with_value(FEATURE_KEY, "chat");
        let result = FallbackStrategy::new().attempt_recovery(&exhausted(), &ctx).await;
        assert!(matches!(result, RecoveryResult::PartialSuccess(_)));
        assert!(!registry.is_available("chat"));
        assert!(registry.is_available("animations"));
    }

    #[tokio::test]
    async fn test_refuses_essential_feature() {
        let registry = Arc::new(DegradationRegistry::with_session_features());
        let error = exhausted().with_context(FEATURE_KEY, "state_sync");
        let ctx = RecoveryContext::new().with_degradation(registry.clone());
        let result = FallbackStrategy::new().attempt_recovery(&error, &ctx).await;
        assert!(matches!(result, RecoveryResult::Failure(_)));
        assert!(registry.is_available("state_sync"));
    }

    #[tokio::test]
    async fn test_degrades_everything_optional_once() {
        let registry = Arc::new(DegradationRegistry::with_session_features());
        let ctx = RecoveryContext::new().with_degradation(registry.clone());
        let first = FallbackStrategy::new().attempt_recovery(&exhausted(), &ctx).await;
        assert!(matches!(first, RecoveryResult::PartialSuccess(_)));
        let second = FallbackStrategy::new().attempt_recovery(&exhausted(), &ctx).await;
        assert!(matches!(second, RecoveryResult::Failure(_)));
    }

    #[tokio::test]
    async fn test_without_registry() {
        let result = FallbackStrategy::new().attempt_recovery(&exhausted(), &RecoveryContext::new()).await;
        assert!(matches!(result, RecoveryResult::NotApplicable(_)));
    }
}
