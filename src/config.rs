//! Scoring weights and operational limits.
//!
//! Loaded from `weights.yaml`, resolved in order: `$GANDALF_WEIGHTS_FILE`,
//! `$GANDALF_HOME/config/weights.yaml`, then the embedded defaults. A file
//! that fails to parse or validate logs one warning and falls back to the
//! defaults so the server always starts; `GANDALF_STRICT_CONFIG=1` turns
//! that fallback into a startup error.

use crate::error::{ConfigError, Result, ServerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Serde default helpers. `#[serde(default)]` on a numeric field falls back
/// to zero, so every weight needs a named function.
fn d_recent_modification() -> f64 {
    3.0
}
fn d_file_size_optimal() -> f64 {
    1.5
}
fn d_import_relationship() -> f64 {
    0.0
}
fn d_conversation_mention() -> f64 {
    2.5
}
fn d_git_activity() -> f64 {
    2.0
}
fn d_file_type_priority() -> f64 {
    1.0
}
fn d_directory_importance() -> f64 {
    1.0
}
fn d_optimal_min() -> u64 {
    512
}
fn d_optimal_max() -> u64 {
    64 * 1024
}
fn d_acceptable_max() -> u64 {
    512 * 1024
}
fn d_acceptable_multiplier() -> f64 {
    0.6
}
fn d_large_multiplier() -> f64 {
    0.2
}
fn d_hour_threshold() -> u64 {
    3600
}
fn d_day_threshold() -> u64 {
    86_400
}
fn d_week_threshold() -> u64 {
    604_800
}
fn d_hour_multiplier() -> f64 {
    1.0
}
fn d_day_multiplier() -> f64 {
    0.7
}
fn d_week_multiplier() -> f64 {
    0.4
}
fn d_max_high_priority() -> usize {
    20
}
fn d_max_medium_priority() -> usize {
    30
}
fn d_max_top_files() -> usize {
    50
}
fn d_high_priority() -> f64 {
    5.0
}
fn d_medium_priority() -> f64 {
    2.0
}
fn d_min_score() -> f64 {
    0.0
}
fn d_git_cache_ttl() -> u64 {
    300
}
fn d_git_lookback_days() -> u64 {
    14
}
fn d_git_timeout() -> u64 {
    10
}
fn d_root_directory_weight() -> f64 {
    0.5
}
fn d_max_files_per_listing() -> usize {
    5000
}
fn d_conversation_cache_ttl() -> u64 {
    300
}
fn d_days_lookback() -> u64 {
    30
}

fn d_extensions() -> BTreeMap<String, f64> {
    [
        ("rs", 1.0),
        ("py", 1.0),
        ("ts", 0.9),
        ("tsx", 0.9),
        ("js", 0.8),
        ("jsx", 0.8),
        ("go", 1.0),
        ("java", 0.8),
        ("c", 0.8),
        ("cpp", 0.8),
        ("h", 0.7),
        ("rb", 0.8),
        ("swift", 0.8),
        ("kt", 0.8),
        ("md", 0.5),
        ("toml", 0.5),
        ("yaml", 0.5),
        ("yml", 0.5),
        ("json", 0.4),
        ("sql", 0.6),
        ("sh", 0.5),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn d_directories() -> BTreeMap<String, f64> {
    [
        ("src", 1.0),
        ("lib", 0.9),
        ("core", 0.9),
        ("api", 0.8),
        ("server", 0.8),
        ("app", 0.8),
        ("tests", 0.5),
        ("test", 0.5),
        ("docs", 0.3),
        ("scripts", 0.4),
        ("config", 0.5),
        ("examples", 0.3),
        ("vendor", 0.1),
        ("third_party", 0.1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Per-signal weights for relevance scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    #[serde(default = "d_recent_modification")]
    pub recent_modification: f64,
    #[serde(default = "d_file_size_optimal")]
    pub file_size_optimal: f64,
    #[serde(default = "d_import_relationship")]
    pub import_relationship: f64,
    #[serde(default = "d_conversation_mention")]
    pub conversation_mention: f64,
    #[serde(default = "d_git_activity")]
    pub git_activity: f64,
    #[serde(default = "d_file_type_priority")]
    pub file_type_priority: f64,
    #[serde(default = "d_directory_importance")]
    pub directory_importance: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults deserialize")
    }
}

/// Byte-size model: full weight inside the optimal window, discounted
/// multipliers outside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeModel {
    #[serde(default = "d_optimal_min")]
    pub optimal_min: u64,
    #[serde(default = "d_optimal_max")]
    pub optimal_max: u64,
    #[serde(default = "d_acceptable_max")]
    pub acceptable_max: u64,
    #[serde(default = "d_acceptable_multiplier")]
    pub acceptable_multiplier: f64,
    #[serde(default = "d_large_multiplier")]
    pub large_multiplier: f64,
}

impl Default for SizeModel {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults deserialize")
    }
}

/// Modification-recency buckets (seconds) with their multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecencyBuckets {
    #[serde(default = "d_hour_threshold")]
    pub hour_threshold: u64,
    #[serde(default = "d_day_threshold")]
    pub day_threshold: u64,
    #[serde(default = "d_week_threshold")]
    pub week_threshold: u64,
    #[serde(default = "d_hour_multiplier")]
    pub hour_multiplier: f64,
    #[serde(default = "d_day_multiplier")]
    pub day_multiplier: f64,
    #[serde(default = "d_week_multiplier")]
    pub week_multiplier: f64,
}

impl Default for RecencyBuckets {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults deserialize")
    }
}

/// Display caps and priority thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayLimits {
    #[serde(default = "d_max_high_priority")]
    pub max_high_priority: usize,
    #[serde(default = "d_max_medium_priority")]
    pub max_medium_priority: usize,
    #[serde(default = "d_max_top_files")]
    pub max_top_files: usize,
    #[serde(default = "d_high_priority")]
    pub high_priority: f64,
    #[serde(default = "d_medium_priority")]
    pub medium_priority: f64,
}

impl Default for DisplayLimits {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults deserialize")
    }
}

/// The full weights configuration. Every field is overridable from YAML;
/// every field has a sane embedded default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    #[serde(default)]
    pub weights: SignalWeights,
    #[serde(default)]
    pub size: SizeModel,
    #[serde(default)]
    pub recency: RecencyBuckets,
    #[serde(default)]
    pub display: DisplayLimits,
    /// Extension (no dot, lowercase) → weight.
    #[serde(default = "d_extensions")]
    pub extensions: BTreeMap<String, f64>,
    /// Directory segment → weight.
    #[serde(default = "d_directories")]
    pub directories: BTreeMap<String, f64>,
    /// Weight applied to files sitting directly in the project root.
    #[serde(default = "d_root_directory_weight")]
    pub root_directory_weight: f64,
    #[serde(default = "d_min_score")]
    pub min_score: f64,
    #[serde(default = "d_git_cache_ttl")]
    pub git_cache_ttl: u64,
    #[serde(default = "d_git_lookback_days")]
    pub git_lookback_days: u64,
    /// Seconds before a git invocation is killed.
    #[serde(default = "d_git_timeout")]
    pub git_timeout: u64,
    #[serde(default = "d_max_files_per_listing")]
    pub max_files_per_listing: usize,
    #[serde(default = "d_conversation_cache_ttl")]
    pub conversation_cache_ttl: u64,
    /// Default recall window for conversations, in days.
    #[serde(default = "d_days_lookback")]
    pub days_lookback: u64,
}

impl Default for WeightsConfig {
    /// The embedded defaults: an empty document deserialized through the
    /// same per-field default functions the YAML loader uses, so the two
    /// paths cannot drift.
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults deserialize")
    }
}

impl WeightsConfig {
    /// Loads the weights file using the documented resolution chain.
    ///
    /// # Errors
    ///
    /// Only in strict mode (`GANDALF_STRICT_CONFIG` truthy); otherwise a
    /// broken file logs a warning and the embedded defaults are returned.
    pub fn load(gandalf_home: &Path) -> Result<Self> {
        let candidate = std::env::var_os("GANDALF_WEIGHTS_FILE")
            .map(PathBuf::from)
            .filter(|p| p.is_file())
            .or_else(|| {
                let p = gandalf_home.join("config").join("weights.yaml");
                p.is_file().then_some(p)
            });

        let Some(path) = candidate else {
            tracing::debug!("No weights file found, using embedded defaults");
            return Ok(Self::default());
        };

        match Self::load_file(&path) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded weights configuration");
                Ok(cfg)
            }
            Err(e) if strict_config() => Err(e),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Invalid weights file, falling back to embedded defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Parses and validates one weights file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Schema validation: weights non-negative and finite, multipliers in
    /// [0, 100], positive integers where required.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("weights.recent_modification", self.weights.recent_modification),
            ("weights.file_size_optimal", self.weights.file_size_optimal),
            ("weights.import_relationship", self.weights.import_relationship),
            ("weights.conversation_mention", self.weights.conversation_mention),
            ("weights.git_activity", self.weights.git_activity),
            ("weights.file_type_priority", self.weights.file_type_priority),
            ("weights.directory_importance", self.weights.directory_importance),
            ("root_directory_weight", self.root_directory_weight),
            ("min_score", self.min_score),
            ("display.high_priority", self.display.high_priority),
            ("display.medium_priority", self.display.medium_priority),
        ];
        for (field, value) in weights {
            check_weight(field, value)?;
        }

        let multipliers = [
            ("size.acceptable_multiplier", self.size.acceptable_multiplier),
            ("size.large_multiplier", self.size.large_multiplier),
            ("recency.hour_multiplier", self.recency.hour_multiplier),
            ("recency.day_multiplier", self.recency.day_multiplier),
            ("recency.week_multiplier", self.recency.week_multiplier),
        ];
        for (field, value) in multipliers {
            check_multiplier(field, value)?;
        }

        for (ext, weight) in &self.extensions {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid("extensions", format!("'{ext}' has weight {weight}")));
            }
        }
        for (dir, weight) in &self.directories {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid("directories", format!("'{dir}' has weight {weight}")));
            }
        }

        if self.size.optimal_min > self.size.optimal_max {
            return Err(invalid(
                "size.optimal_min",
                "must not exceed size.optimal_max".into(),
            ));
        }
        if self.size.optimal_max > self.size.acceptable_max {
            return Err(invalid(
                "size.optimal_max",
                "must not exceed size.acceptable_max".into(),
            ));
        }

        let positive = [
            ("recency.hour_threshold", self.recency.hour_threshold),
            ("recency.day_threshold", self.recency.day_threshold),
            ("recency.week_threshold", self.recency.week_threshold),
            ("git_timeout", self.git_timeout),
            ("git_cache_ttl", self.git_cache_ttl),
            ("conversation_cache_ttl", self.conversation_cache_ttl),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be a positive integer".into()));
            }
        }
        if self.max_files_per_listing == 0 {
            return Err(invalid("max_files_per_listing", "must be ≥ 1".into()));
        }

        Ok(())
    }
}

fn check_weight(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, format!("{value} is not a non-negative number")));
    }
    Ok(())
}

fn check_multiplier(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(invalid(field, format!("{value} is outside [0, 100]")));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: String) -> ServerError {
    ServerError::Config(ConfigError::Invalid { field, reason })
}

fn strict_config() -> bool {
    crate::env_truthy("GANDALF_STRICT_CONFIG")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = WeightsConfig::default();
        cfg.validate().expect("embedded defaults must be valid");
        assert_eq!(cfg.display.high_priority, 5.0);
        assert_eq!(cfg.display.medium_priority, 2.0);
        assert_eq!(cfg.git_timeout, 10);
        assert_eq!(cfg.max_files_per_listing, 5000);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let cfg: WeightsConfig = serde_yaml::from_str(
            r"
weights:
  recent_modification: 4.5
display:
  high_priority: 7.0
",
        )
        .unwrap();
        assert_eq!(cfg.weights.recent_modification, 4.5);
        assert_eq!(cfg.display.high_priority, 7.0);
        // Untouched fields keep their defaults
        assert_eq!(cfg.weights.git_activity, 2.0);
        assert_eq!(cfg.display.medium_priority, 2.0);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let cfg: WeightsConfig = serde_yaml::from_str(
            r"
weights:
  git_activity: -1.0
",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_multiplier_bounds() {
        let cfg: WeightsConfig = serde_yaml::from_str(
            r"
size:
  acceptable_multiplier: 101.0
",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_size_window_ordering() {
        let cfg: WeightsConfig = serde_yaml::from_str(
            r"
size:
  optimal_min: 100000
  optimal_max: 50
",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WeightsConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.display.max_top_files, 50);
    }

    #[test]
    fn test_load_broken_yaml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("weights.yaml"), "weights: [not, a, map]").unwrap();
        let cfg = WeightsConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.weights.recent_modification, 3.0);
    }
}
