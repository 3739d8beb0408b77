//! Error Router
//!
//! Central entry point for classified errors. Every routed error is counted
//! per category, logged at a level derived from its severity and published to
//! subscribers. Recoverable errors are then handed to the single
//! highest-priority strategy that accepts them.
//!
//! Collaborators that only need to record a fault (the reconnection
//! coordinator, the security gate) call [`ErrorRouter::report`], which never
//! starts a recovery.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use tracing::{debug, error, info, warn};

use super::{
    FallbackStrategy, ReconnectStrategy, RecoveryContext, RecoveryResult, RecoveryStrategy,
    ResyncStrategy, RetryStrategy,
};
use crate::config::ResilienceConfig;
use crate::core::{Subscriber, Subscribers, SubscriptionId};
use crate::error::{ErrorCategory, Severity, TypedError};

/// Per-category counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Errors seen.
    pub count: u64,
    /// Recoveries started.
    pub recovery_attempts: u64,
    /// Recoveries that ended in success or partial success.
    pub recovery_successes: u64,
    /// First error.
    pub first_seen: DateTime<Utc>,
    /// Latest error.
    pub last_seen: DateTime<Utc>,
    /// Worst severity seen.
    pub highest_severity: Severity,
}

impl ErrorStatistics {
    fn first(error: &TypedError) -> Self {
        Self {
            count: 0,
            recovery_attempts: 0,
            recovery_successes: 0,
            first_seen: error.timestamp(),
            last_seen: error.timestamp(),
            highest_severity: error.severity(),
        }
    }

    /// Success ratio, `None` before the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        (self.recovery_attempts > 0).then(|| self.recovery_successes as f64 / self.recovery_attempts as f64)
    }
}

/// Router-wide totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterTotals {
    /// Errors routed or reported.
    pub errors_routed: u64,
    /// Recoveries started.
    pub recoveries_attempted: u64,
    /// Recoveries that succeeded (fully or partially).
    pub recoveries_succeeded: u64,
}

/// Router notifications.
#[derive(Clone, Debug)]
pub enum RouterEvent {
    /// An error was recorded.
    ErrorOccurred(Arc<TypedError>),
    /// A strategy was selected.
    RecoveryStarted {
        /// Error being recovered.
        error: Arc<TypedError>,
        /// Strategy name.
        strategy: String,
    },
    /// A strategy finished.
    RecoveryCompleted {
        /// Error being recovered.
        error: Arc<TypedError>,
        /// Strategy name.
        strategy: String,
        /// Outcome.
        result: RecoveryResult,
    },
}

/// Routes errors to recovery strategies.
pub struct ErrorRouter {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    statistics: DashMap<ErrorCategory, ErrorStatistics>,
    errors_routed: AtomicU64,
    recoveries_attempted: AtomicU64,
    recoveries_succeeded: AtomicU64,
    subscribers: Subscribers<RouterEvent>,
    shut_down: AtomicBool,
}

impl Default for ErrorRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRouter {
    /// Router without strategies.
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            statistics: DashMap::new(),
            errors_routed: AtomicU64::new(0),
            recoveries_attempted: AtomicU64::new(0),
            recoveries_succeeded: AtomicU64::new(0),
            subscribers: Subscribers::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Router with reconnect, resync, retry and fallback registered.
    pub fn with_default_strategies(config: &ResilienceConfig) -> Self {
        let router = Self::new();
        router.register_strategy(Arc::new(ReconnectStrategy::from_settings(&config.reconnect_settings())));
        router.register_strategy(Arc::new(ResyncStrategy::new(
            config.resync_max_attempts,
            config.resync_delay,
        )));
        router.register_strategy(Arc::new(RetryStrategy::new(config.retry, config.retry_max_attempts)));
        router.register_strategy(Arc::new(FallbackStrategy::new()));
        router
    }

    /// Add a strategy. Among equal priorities, earlier registrations win.
    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(strategy = strategy.name(), priority = strategy.priority(), "Strategy registered");
        self.strategies.write().push(strategy);
    }

    /// Remove every strategy with this name.
    pub fn unregister_strategy(&self, name: &str) -> bool {
        let mut strategies = self.strategies.write();
        let before = strategies.len();
        strategies.retain(|s| s.name() != name);
        strategies.len() != before
    }

    /// Registered strategy names, in registration order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Record, log and publish an error without attempting recovery.
    pub fn report(&self, error: TypedError) -> Arc<TypedError> {
        let error = Arc::new(error);
        self.record(&error);
        self.log(&error);
        self.subscribers.publish(&RouterEvent::ErrorOccurred(error.clone()));
        error
    }

    /// Record the error and run the best matching strategy.
    ///
    /// Returns `None` when the error is not recoverable, no strategy accepts
    /// it, or the router has been shut down.
    pub async fn route(&self, error: TypedError, context: Option<&RecoveryContext>) -> Option<RecoveryResult> {
        if self.shut_down.load(Ordering::Acquire) {
            debug!(code = error.code(), "Router shut down, error dropped");
            return None;
        }

        let error = self.report(error);
        if !error.is_recoverable() {
            return None;
        }

        let strategy = self.select(&error)?;
        let name = strategy.name().to_string();

        self.recoveries_attempted.fetch_add(1, Ordering::Relaxed);
        if let Some(mut stats) = self.statistics.get_mut(&error.category()) {
            stats.recovery_attempts += 1;
        }
        info!(code = error.code(), strategy = %name, "Recovery started");
        self.subscribers.publish(&RouterEvent::RecoveryStarted {
            error: error.clone(),
            strategy: name.clone(),
        });

        let fallback_context;
        let context = match context {
            Some(context) => context,
            None => {
                fallback_context = RecoveryContext::new();
                &fallback_context
            }
        };
        let result = strategy.attempt_recovery(&error, context).await;

        if result.is_success() {
            self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
            if let Some(mut stats) = self.statistics.get_mut(&error.category()) {
                stats.recovery_successes += 1;
            }
        }
        info!(
            code = error.code(),
            strategy = %name,
            outcome = result.outcome(),
            duration_ms = result.report().duration_ms,
            "Recovery completed"
        );
        self.subscribers.publish(&RouterEvent::RecoveryCompleted {
            error,
            strategy: name,
            result: result.clone(),
        });
        Some(result)
    }

    /// Highest priority strategy accepting the error; first registered wins ties.
    fn select(&self, error: &TypedError) -> Option<Arc<dyn RecoveryStrategy>> {
        let strategies = self.strategies.read();
        let mut best: Option<&Arc<dyn RecoveryStrategy>> = None;
        for strategy in strategies.iter().filter(|s| s.can_recover(error)) {
            match best {
                Some(current) if current.priority() >= strategy.priority() => {}
                _ => best = Some(strategy),
            }
        }
        best.cloned()
    }

    fn record(&self, error: &TypedError) {
        self.errors_routed.fetch_add(1, Ordering::Relaxed);
        let mut stats = self
            .statistics
            .entry(error.category())
            .or_insert_with(|| ErrorStatistics::first(error));
        stats.count += 1;
        stats.last_seen = error.timestamp();
        if error.severity() > stats.highest_severity {
            stats.highest_severity = error.severity();
        }
    }

    fn log(&self, error: &TypedError) {
        let code = error.code();
        let kind = error.kind().name();
        let message = error.message();
        match error.severity() {
            Severity::Info => info!(code, kind, recoverable = error.is_recoverable(), "{message}"),
            Severity::Warn => warn!(code, kind, recoverable = error.is_recoverable(), "{message}"),
            Severity::Error => error!(code, kind, recoverable = error.is_recoverable(), "{message}"),
            Severity::Critical => {
                error!(code, kind, recoverable = error.is_recoverable(), critical = true, "{message}")
            }
        }
    }

    /// Counters for one category.
    pub fn statistics(&self, category: ErrorCategory) -> Option<ErrorStatistics> {
        self.statistics.get(&category).map(|s| s.value().clone())
    }

    /// Counters for every category seen so far, in category order.
    pub fn statistics_snapshot(&self) -> Vec<(ErrorCategory, ErrorStatistics)> {
        let mut all: Vec<_> = self
            .statistics
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        all.sort_by_key(|(category, _)| *category);
        all
    }

    /// Router-wide totals.
    pub fn totals(&self) -> RouterTotals {
        RouterTotals {
            errors_routed: self.errors_routed.load(Ordering::Relaxed),
            recoveries_attempted: self.recoveries_attempted.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to router events.
    pub fn subscribe<S>(&self, subscriber: &Arc<S>) -> SubscriptionId
    where
        S: Subscriber<RouterEvent> + 'static,
    {
        self.subscribers.subscribe(subscriber)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Drop strategies and subscribers. Later `route` calls return `None`.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.strategies.write().clear();
        self.subscribers.clear();
        info!("Error router shut down");
    }

    /// Has `shutdown` been called?
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRouter")
            .field("strategies", &self.strategy_names())
            .field("totals", &self.totals())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
