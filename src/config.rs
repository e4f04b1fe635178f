//! Optimizer configuration: defaults, TOML file, `MEMOPT_*` environment overrides.

use crate::cache::{CacheConfig, EvictionMode};
use crate::errors::OptimizerError;
use crate::gc::{GcConfig, RetentionPolicy};
use crate::preload::PreloadConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub pressure_bytes: u64,
    pub preload_pause_percent: f64,
    pub preload_resume_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self { pressure_bytes: 50 * 1024 * 1024, preload_pause_percent: 70.0, preload_resume_percent: 60.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub local_secs: u64,
    pub session_secs: u64,
    pub session_prefixes: Vec<String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let p = RetentionPolicy::default();
        Self {
            local_secs: p.local_max_age.as_secs(),
            session_secs: p.session_max_age.as_secs(),
            session_prefixes: p.session_prefixes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_cache_size: usize,
    pub gc_interval_ms: u64,
    pub preload_batch_size: usize,
    pub lazy_threshold: f64,
    pub monitor_interval_ms: u64,
    pub eviction_mode: EvictionMode,
    pub thresholds: ThresholdConfig,
    pub retention: RetentionConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 50,
            gc_interval_ms: 30_000,
            preload_batch_size: 5,
            lazy_threshold: 0.1,
            monitor_interval_ms: 5_000,
            eviction_mode: EvictionMode::FrequencyStaleness,
            thresholds: ThresholdConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, OptimizerError> {
        toml::from_str(s).map_err(|e| OptimizerError::Toml(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, OptimizerError> {
        toml::to_string_pretty(self).map_err(|e| OptimizerError::Toml(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, OptimizerError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| OptimizerError::Io(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    /// Precedence: explicit path > `MEMOPT_CONFIG` > `./memopt.toml` > `<config dir>/memopt.toml`
    /// > defaults; environment overrides are applied on top.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, OptimizerError> {
        let mut cfg = match explicit {
            Some(p) => Self::load(p)?,
            None => match candidate_paths().into_iter().find(|p| p.exists()) {
                Some(p) => {
                    log::debug!("loading optimizer config from {}", p.display());
                    Self::load(&p)?
                }
                None => Self::default(),
            },
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|k| std::env::var(k).ok());
    }

    /// Applies `MEMOPT_*` overrides read through `lookup`. Unparsable values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!("ignoring {key}={raw}: not a valid value");
                    None
                }
            }
        }
        if let Some(v) = parsed(&lookup, "MEMOPT_MAX_CACHE_SIZE") {
            self.max_cache_size = v;
        }
        if let Some(v) = parsed(&lookup, "MEMOPT_GC_INTERVAL_MS") {
            self.gc_interval_ms = v;
        }
        if let Some(v) = parsed(&lookup, "MEMOPT_PRELOAD_BATCH_SIZE") {
            self.preload_batch_size = v;
        }
        if let Some(v) = parsed(&lookup, "MEMOPT_LAZY_THRESHOLD") {
            self.lazy_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "MEMOPT_MONITOR_INTERVAL_MS") {
            self.monitor_interval_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |m: &str| Err(OptimizerError::InvalidConfig(m.to_string()));
        if self.max_cache_size == 0 {
            return invalid("max_cache_size must be at least 1");
        }
        if self.gc_interval_ms == 0 || self.monitor_interval_ms == 0 {
            return invalid("intervals must be non-zero");
        }
        if self.preload_batch_size == 0 {
            return invalid("preload_batch_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.lazy_threshold) {
            return invalid("lazy_threshold must be within [0, 1]");
        }
        let t = &self.thresholds;
        if t.preload_resume_percent >= t.preload_pause_percent {
            return invalid("preload_resume_percent must be below preload_pause_percent");
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig { max_cache_size: self.max_cache_size, eviction_mode: self.eviction_mode }
    }

    pub fn gc_config(&self) -> GcConfig {
        GcConfig {
            interval: Duration::from_millis(self.gc_interval_ms),
            pressure_threshold_bytes: self.thresholds.pressure_bytes,
        }
    }

    pub fn preload_config(&self) -> PreloadConfig {
        PreloadConfig {
            pause_percent: self.thresholds.preload_pause_percent,
            resume_percent: self.thresholds.preload_resume_percent,
            batch_size: self.preload_batch_size,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            local_max_age: Duration::from_secs(self.retention.local_secs),
            session_max_age: Duration::from_secs(self.retention.session_secs),
            session_prefixes: self.retention.session_prefixes.clone(),
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(p) = std::env::var("MEMOPT_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("memopt.toml"));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join("memopt.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let c = OptimizerConfig::default();
        assert_eq!((c.max_cache_size, c.gc_interval_ms, c.preload_batch_size), (50, 30_000, 5));
        assert!((c.lazy_threshold - 0.1).abs() < f64::EPSILON);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> =
            [("MEMOPT_MAX_CACHE_SIZE", "8"), ("MEMOPT_LAZY_THRESHOLD", "lots")].into_iter().collect();
        let mut c = OptimizerConfig::default();
        c.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.max_cache_size, 8);
        assert!((c.lazy_threshold - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn inverted_hysteresis_is_rejected() {
        let mut c = OptimizerConfig::default();
        c.thresholds.preload_resume_percent = 75.0;
        assert!(matches!(c.validate(), Err(OptimizerError::InvalidConfig(_))));
    }
}
