//! Per-user gate between the multi-specialist pipeline and the fallback
//! responder.
//!
//! The gate holds an immutable [`RolloutConfig`] snapshot behind a lock and
//! swaps it wholesale on every administrative write, so readers always see a
//! consistent percentage and override map.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub rollout_percentage: u8,
    pub overrides: BTreeMap<String, bool>,
}

impl RolloutConfig {
    pub fn new(rollout_percentage: u8) -> Result<Self, RolloutError> {
        validate_percentage(i64::from(rollout_percentage))?;
        Ok(Self { rollout_percentage, overrides: BTreeMap::new() })
    }

    pub fn with_percentage(&self, rollout_percentage: u8) -> Result<Self, RolloutError> {
        validate_percentage(i64::from(rollout_percentage))?;
        Ok(Self { rollout_percentage, overrides: self.overrides.clone() })
    }

    pub fn with_override(&self, user_id: &str, enabled: bool) -> Self {
        let mut next = self.clone();
        next.overrides.insert(user_id.to_string(), enabled);
        next
    }

    pub fn without_override(&self, user_id: &str) -> Self {
        let mut next = self.clone();
        next.overrides.remove(user_id);
        next
    }

    pub fn is_enabled(&self, user_id: &str) -> bool {
        if let Some(enabled) = self.overrides.get(user_id) {
            return *enabled;
        }
        match self.rollout_percentage {
            0 => false,
            pct if pct >= 100 => true,
            pct => rollout_bucket(user_id) < pct,
        }
    }
}

/// Stable bucket in `0..100`: MD5 of the UTF-8 user id read as a big-endian
/// 128-bit integer, modulo 100.
pub fn rollout_bucket(user_id: &str) -> u8 {
    let digest = md5::compute(user_id.as_bytes());
    (u128::from_be_bytes(digest.0) % 100) as u8
}

pub fn validate_percentage(value: i64) -> Result<u8, RolloutError> {
    u8::try_from(value)
        .ok()
        .filter(|pct| *pct <= 100)
        .ok_or(RolloutError::InvalidPercentage(value))
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RolloutError {
    #[error("rollout percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(i64),
    #[error("rollout configuration unavailable: {0}")]
    ConfigurationFault(String),
}

#[derive(Debug, Default)]
pub struct FeatureFlagGate {
    snapshot: RwLock<Arc<RolloutConfig>>,
}

impl FeatureFlagGate {
    pub fn new(config: RolloutConfig) -> Self {
        Self { snapshot: RwLock::new(Arc::new(config)) }
    }

    /// Never fails: a fault reading the snapshot disables the feature and is
    /// only logged.
    pub fn is_enabled(&self, user_id: Option<&str>) -> bool {
        let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return false;
        };
        match self.snapshot() {
            Ok(config) => config.is_enabled(user_id),
            Err(error) => {
                tracing::warn!(
                    event_name = "rollout.gate.fail_closed",
                    error = %error,
                    "feature flag evaluation failed; routing to fallback"
                );
                false
            }
        }
    }

    pub fn snapshot(&self) -> Result<Arc<RolloutConfig>, RolloutError> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| RolloutError::ConfigurationFault("rollout snapshot lock poisoned".into()))
    }

    pub fn rollout_percentage(&self) -> Result<u8, RolloutError> {
        Ok(self.snapshot()?.rollout_percentage)
    }

    pub fn set_rollout_percentage(&self, value: i64) -> Result<Arc<RolloutConfig>, RolloutError> {
        let percentage = validate_percentage(value)?;
        let next = self.update(|current| current.with_percentage(percentage))?;
        tracing::info!(
            event_name = "rollout.percentage.updated",
            rollout_percentage = percentage,
            "rollout percentage updated"
        );
        Ok(next)
    }

    pub fn get_override(&self, user_id: &str) -> Result<Option<bool>, RolloutError> {
        Ok(self.snapshot()?.overrides.get(user_id).copied())
    }

    pub fn set_override(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<Arc<RolloutConfig>, RolloutError> {
        let next = self.update(|current| Ok(current.with_override(user_id, enabled)))?;
        tracing::info!(
            event_name = "rollout.override.set",
            user_id,
            enabled,
            "rollout override set"
        );
        Ok(next)
    }

    pub fn clear_override(&self, user_id: &str) -> Result<Arc<RolloutConfig>, RolloutError> {
        let next = self.update(|current| Ok(current.without_override(user_id)))?;
        tracing::info!(event_name = "rollout.override.cleared", user_id, "rollout override cleared");
        Ok(next)
    }

    /// Replaces the whole snapshot, e.g. after reloading persisted state.
    pub fn replace(&self, config: RolloutConfig) -> Result<(), RolloutError> {
        self.update(move |_| Ok(config)).map(|_| ())
    }

    fn update<F>(&self, change: F) -> Result<Arc<RolloutConfig>, RolloutError>
    where
        F: FnOnce(&RolloutConfig) -> Result<RolloutConfig, RolloutError>,
    {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| RolloutError::ConfigurationFault("rollout snapshot lock poisoned".into()))?;
        let next = Arc::new(change(&guard)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}
