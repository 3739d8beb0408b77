//! Graceful Degradation
//!
//! Named session features that can be switched off when the fallback
//! strategy runs. Essential features are never degraded.

use std::time::Instant;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from degrading a feature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DegradeError {
    /// Feature was never registered.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    /// Feature is essential and must stay available.
    #[error("feature {0} is essential")]
    Essential(String),
}

#[derive(Debug, Clone)]
struct FeatureState {
    essential: bool,
    degraded_since: Option<Instant>,
    reason: Option<String>,
}

/// Registry of features that can be degraded at runtime.
#[derive(Debug, Default)]
pub struct DegradationRegistry {
    features: DashMap<String, FeatureState>,
}

impl DegradationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the session's standard features.
    pub fn with_session_features() -> Self {
        let registry = Self::new();
        registry.register("state_sync", true);
        registry.register("action_submission", true);
        registry.register("spectator_views", false);
        registry.register("chat", false);
        registry.register("animations", false);
        registry.register("replay_capture", false);
        registry
    }

    /// Register (or re-register) a feature as available.
    pub fn register(&self, name: impl Into<String>, essential: bool) {
        self.features.insert(
            name.into(),
            FeatureState {
                essential,
                degraded_since: None,
                reason: None,
            },
        );
    }

    /// Is the feature registered and currently available?
    pub fn is_available(&self, name: &str) -> bool {
        self.features
            .get(name)
            .map(|f| f.degraded_since.is_none())
            .unwrap_or(false)
    }

    /// Switch a single optional feature off.
    pub fn degrade(&self, name: &str, reason: &str) -> Result<bool, DegradeError> {
        let mut feature = self
            .features
            .get_mut(name)
            .ok_or_else(|| DegradeError::UnknownFeature(name.to_string()))?;
        if feature.essential {
            return Err(DegradeError::Essential(name.to_string()));
        }
        if feature.degraded_since.is_some() {
            return Ok(false);
        }
        feature.degraded_since = Some(Instant::now());
        feature.reason = Some(reason.to_string());
        warn!(feature = name, reason, "Feature degraded");
        Ok(true)
    }

    /// Switch every still-available optional feature off. Returns the names
    /// that changed, sorted.
    pub fn degrade_all_optional(&self, reason: &str) -> Vec<String> {
        let mut changed = Vec::new();
        for mut entry in self.features.iter_mut() {
            if !entry.essential && entry.degraded_since.is_none() {
                entry.degraded_since = Some(Instant::now());
                entry.reason = Some(reason.to_string());
                changed.push(entry.key().clone());
            }
        }
        changed.sort();
        if !changed.is_empty() {
            warn!(count = changed.len(), reason, "Optional features degraded");
        }
        changed
    }

    /// Bring a feature back.
    pub fn restore(&self, name: &str) -> bool {
        match self.features.get_mut(name) {
            Some(mut feature) if feature.degraded_since.is_some() => {
                feature.degraded_since = None;
                feature.reason = None;
                info!(feature = name, "Feature restored");
                true
            }
            _ => false,
        }
    }

    /// Bring every feature back.
    pub fn restore_all(&self) -> usize {
        let mut restored = 0;
        for mut entry in self.features.iter_mut() {
            if entry.degraded_since.take().is_some() {
                entry.reason = None;
                restored += 1;
            }
        }
        restored
    }

    /// Names of degraded features, sorted.
    pub fn degraded_features(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .features
            .iter()
            .filter(|f| f.degraded_since.is_some())
            .map(|f| f.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Why a feature was degraded.
    pub fn degradation_reason(&self, name: &str) -> Option<String> {
        self.features.get(name).and_then(|f| f.reason.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essential_features_stay_up() {
        let registry = DegradationRegistry::with_session_features();
        assert_eq!(
            registry.degrade("state_sync", "oom"),
            Err(DegradeError::Essential("state_sync".into()))
        );
        assert!(registry.is_available("state_sync"));
    }

    #[test]
    fn test_degrade_and_restore() {
        let registry = DegradationRegistry::with_session_features();
        assert_eq!(registry.degrade("chat", "queue full"), Ok(true));
        assert_eq!(registry.degrade("chat", "queue full"), Ok(false));
        assert!(!registry.is_available("chat"));
        assert_eq!(registry.degradation_reason("chat").as_deref(), Some("queue full"));
        assert!(registry.restore("chat"));
        assert!(registry.is_available("chat"));
        assert!(!registry.restore("chat"));
    }

    #[test]
    fn test_degrade_all_optional() {
        let registry = DegradationRegistry::with_session_features();
        let changed = registry.degrade_all_optional("memory pressure");
        assert_eq!(changed, vec!["animations", "chat", "replay_capture", "spectator_views"]);
        assert!(registry.degrade_all_optional("again").is_empty());
        assert!(registry.is_available("action_submission"));
        assert_eq!(registry.restore_all(), 4);
        assert!(registry.degraded_features().is_empty());
    }

    #[test]
    fn test_unknown_feature() {
        let registry = DegradationRegistry::new();
        assert!(matches!(registry.degrade("nope", "x"), Err(DegradeError::UnknownFeature(_))));
        assert!(!registry.is_available("nope"));
    }
}
