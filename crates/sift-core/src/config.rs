//! Engine configuration
//!
//! Loaded from an optional JSON file, then environment overrides, then
//! validated. Every field has a default, so `{}` is a valid file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CacheSettings;
use crate::retrieval::{
    CompressionConfig, ExpansionOptions, QualityFilterOptions, Strategy, StrategyConfig,
    StrategyOverride,
};
use crate::search::{Bm25Params, FusionConfig, RerankerConfig};

/// Default timeout for optional enhancement calls
pub const DEFAULT_ENHANCEMENT_TIMEOUT_MS: u64 = 5_000;

/// Configuration error types
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Config result type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Capacity and TTL of each engine-owned cache
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub query_expansion: CacheSettings,
    pub hyde: CacheSettings,
    pub rerank: CacheSettings,
}

/// Dedup index settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupConfig {
    /// SQLite file; the platform data directory when unset
    pub db_path: Option<PathBuf>,
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SiftConfig {
    pub fusion: FusionConfig,
    pub bm25: Bm25Params,
    pub reranker: RerankerConfig,
    pub caches: CacheConfig,
    pub enhancement_timeout_ms: u64,
    pub quality: QualityFilterOptions,
    pub expansion: ExpansionOptions,
    pub compression: CompressionConfig,
    /// Per-strategy overrides of the built-in defaults
    pub strategies: BTreeMap<Strategy, StrategyOverride>,
    pub dedup: DedupConfig,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            bm25: Bm25Params::default(),
            reranker: RerankerConfig::default(),
            caches: CacheConfig::default(),
            enhancement_timeout_ms: DEFAULT_ENHANCEMENT_TIMEOUT_MS,
            quality: QualityFilterOptions::default(),
            expansion: ExpansionOptions::default(),
            compression: CompressionConfig::default(),
            strategies: BTreeMap::new(),
            dedup: DedupConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={value} is not a valid value")))
}

impl SiftConfig {
    /// Parse a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// File (or defaults), then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIFT_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SIFT_RRF_K") {
            self.fusion.k = parse_env("SIFT_RRF_K", &v)?;
        }
        if let Some(v) = lookup("SIFT_RERANK_TIMEOUT_MS") {
            self.reranker.timeout_ms = parse_env("SIFT_RERANK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SIFT_ENHANCEMENT_TIMEOUT_MS") {
            self.enhancement_timeout_ms = parse_env("SIFT_ENHANCEMENT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SIFT_RERANK_URL").filter(|v| !v.trim().is_empty()) {
            self.reranker.endpoint = Some(v);
        }
        if let Some(v) = lookup("SIFT_RERANK_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.reranker.api_key = Some(v);
        }
        if let Some(v) = lookup("SIFT_RERANK_MODEL").filter(|v| !v.trim().is_empty()) {
            self.reranker.model = Some(v);
        }
        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.fusion.k.is_nan() || self.fusion.k <= 0.0 {
            return invalid(format!("fusion.k must be positive, got {}", self.fusion.k));
        }
        for (name, value) in [
            ("fusion.titleThreshold", self.fusion.title_threshold),
            ("fusion.titleBonusThreshold", self.fusion.title_bonus_threshold),
            ("fusion.headingThreshold", self.fusion.heading_threshold),
            ("fusion.headingBonusThreshold", self.fusion.heading_bonus_threshold),
            ("bm25.b", self.bm25.b),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.bm25.k1 < 0.0 {
            return invalid(format!("bm25.k1 must not be negative, got {}", self.bm25.k1));
        }
        for (name, value) in [
            ("reranker.timeoutMs", self.reranker.timeout_ms),
            ("enhancementTimeoutMs", self.enhancement_timeout_ms),
            ("expansion.lookupTimeoutMs", self.expansion.lookup_timeout_ms),
            ("compression.timeoutMs", self.compression.timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        for (name, cache) in [
            ("caches.queryExpansion", self.caches.query_expansion),
            ("caches.hyde", self.caches.hyde),
            ("caches.rerank", self.caches.rerank),
        ] {
            if cache.capacity == 0 {
                return invalid(format!("{name}.capacity must be greater than zero"));
            }
        }
        if self.compression.max_growth < 1.0 {
            return invalid(format!(
                "compression.maxGrowth must be at least 1.0, got {}",
                self.compression.max_growth
            ));
        }
        if self.expansion.max_chunks_per_source == 0 {
            return invalid("expansion.maxChunksPerSource must be greater than zero".to_string());
        }
        for (strategy, over) in &self.strategies {
            if let Some(alpha) = over.hybrid_alpha
                && !(0.0..=1.0).contains(&alpha)
            {
                return invalid(format!("strategies.{strategy}.hybridAlpha must be within [0, 1]"));
            }
        }
        Ok(())
    }

    /// Fusion settings with the configured BM25 parameters
    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            bm25: self.bm25,
            ..self.fusion
        }
    }

    /// Reranker settings with the configured rerank cache
    pub fn reranker_config(&self) -> RerankerConfig {
        RerankerConfig {
            cache: self.caches.rerank,
            ..self.reranker.clone()
        }
    }

    /// Built-in defaults for `strategy` with any configured override applied
    pub fn strategy_config(&self, strategy: Strategy) -> StrategyConfig {
        let base = StrategyConfig::defaults_for(strategy);
        match self.strategies.get(&strategy) {
            Some(over) => over.apply(base),
            None => base,
        }
    }
}
