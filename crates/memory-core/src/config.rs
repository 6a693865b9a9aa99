//! ============================================================================
//! Memory Config - Tunable policy for retrieval and maintenance
//! ============================================================================
//! Defaults mirror the long-standing behaviour of the memory engine. Every
//! value can be overridden through `MEMORY_*` environment variables.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::types::{MemoryError, Result};

/// Configuration for the memory engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Database file (None = MEMORY_DB_PATH or ~/.persona-memory/memories.redb)
    pub db_path: Option<String>,
    /// Most-recent entries kept per scope before the oldest is evicted
    pub capacity_per_scope: usize,
    /// Minimum score (cosine * weight) for a memory to be returned
    pub relevance_threshold: f64,
    /// Weight added to each returned memory
    pub reinforcement_step: f64,
    /// Upper bound on any memory's weight
    pub weight_cap: f64,
    /// Multiplier applied to every weight per decay pass
    pub decay_factor: f64,
    /// Memories below this weight after decay are pruned
    pub decay_floor: f64,
    /// Default cosine similarity at which two memories merge
    pub merge_threshold: f64,
    /// Share of the absorbed memory's weight added to the survivor
    pub merge_weight_share: f64,
    /// Seconds between scheduled decay passes
    pub decay_interval_secs: u64,
    /// Reject adds for personas that were never registered
    pub require_known_persona: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            capacity_per_scope: 100,
            relevance_threshold: 0.1,
            reinforcement_step: 0.1,
            weight_cap: 2.0,
            decay_factor: 0.95,
            decay_floor: 0.1,
            merge_threshold: 0.8,
            merge_weight_share: 0.5,
            decay_interval_secs: 3600,
            require_known_persona: false,
        }
    }
}

impl MemoryConfig {
    /// Defaults overridden by any `MEMORY_*` variables present in the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MEMORY_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(path);
            }
        }
        env_override("MEMORY_CAPACITY_PER_SCOPE", &mut config.capacity_per_scope);
        env_override("MEMORY_RELEVANCE_THRESHOLD", &mut config.relevance_threshold);
        env_override("MEMORY_REINFORCEMENT_STEP", &mut config.reinforcement_step);
        env_override("MEMORY_WEIGHT_CAP", &mut config.weight_cap);
        env_override("MEMORY_DECAY_FACTOR", &mut config.decay_factor);
        env_override("MEMORY_DECAY_FLOOR", &mut config.decay_floor);
        env_override("MEMORY_MERGE_THRESHOLD", &mut config.merge_threshold);
        env_override("MEMORY_MERGE_WEIGHT_SHARE", &mut config.merge_weight_share);
        env_override("MEMORY_DECAY_INTERVAL_SECS", &mut config.decay_interval_secs);
        env_override("MEMORY_REQUIRE_KNOWN_PERSONA", &mut config.require_known_persona);

        config
    }

    /// Reject combinations the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.capacity_per_scope == 0 {
            return Err(invalid("capacity_per_scope must be at least 1"));
        }
        if !(self.weight_cap > 0.0) {
            return Err(invalid("weight_cap must be positive"));
        }
        if !(0.0..=1.0).contains(&self.decay_factor) {
            return Err(invalid("decay_factor must be within [0, 1]"));
        }
        if !(self.merge_threshold > 0.0 && self.merge_threshold <= 1.0) {
            return Err(invalid("merge_threshold must be within (0, 1]"));
        }
        if self.relevance_threshold < 0.0 || self.decay_floor < 0.0 {
            return Err(invalid("thresholds must not be negative"));
        }
        if self.reinforcement_step < 0.0 || self.merge_weight_share < 0.0 {
            return Err(invalid("weight increments must not be negative"));
        }
        if self.decay_interval_secs == 0 {
            return Err(invalid("decay_interval_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs)
    }
}

fn invalid(msg: &str) -> MemoryError {
    MemoryError::InvalidInput(msg.to_string())
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring unparseable {}={:?}", key, raw),
        }
    }
}
