/*!
 * Configuration support for the ReferralGuard pipeline
 *
 * Provides runtime configuration for pipeline behavior, every risk-rule
 * threshold, model hyperparameters, and the deterministic fallback values
 * used when scoring observations with no market snapshot.
 */

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Global configuration for the ReferralGuard pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whether to show progress bars during long operations
    #[serde(default = "default_enable_progress_bar")]
    pub enable_progress_bar: bool,

    /// Number of threads for parallel operations (None = use all available)
    #[serde(default)]
    pub parallel_threads: Option<usize>,

    /// Whether to skip malformed rows during parsing (counted) instead of failing
    #[serde(default)]
    pub skip_invalid_records: bool,

    /// Chunk size for streaming aggregation over large raw files; bounds
    /// peak memory, not a concurrency knob
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum provider-market rows written into the insights file
    #[serde(default = "default_market_analysis_limit")]
    pub market_analysis_limit: usize,

    /// Maximum leakage opportunities per opportunity type
    #[serde(default = "default_leakage_limit")]
    pub leakage_limit: usize,

    /// Maximum provider networks written into the insights file
    #[serde(default = "default_network_limit")]
    pub network_limit: usize,

    /// Risk-rule thresholds
    #[serde(default)]
    pub risk: RiskThresholds,

    /// Model training hyperparameters
    #[serde(default)]
    pub model: ModelConfig,

    /// Deterministic defaults for observations with no market snapshot
    #[serde(default)]
    pub fallback: FallbackDefaults,
}

/// Threshold constants behind the risk sub-rules
///
/// These are design decisions, not universal truths; they live in
/// configuration so they can be tuned without code changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// competitive: share < this
    pub competitive_max_share: f64,
    /// competitive: provider count >= this
    pub competitive_min_providers: usize,
    /// competitive: fragmentation > this
    pub competitive_min_fragmentation: f64,
    /// concentrated: position >= this
    pub concentrated_min_position: u32,
    /// concentrated: hhi > this
    pub concentrated_min_hhi: f64,
    /// concentrated: share < this
    pub concentrated_max_share: f64,
    /// positional: position >= this
    pub positional_min_position: u32,
    /// positional: share < this
    pub positional_max_share: f64,
    /// revenue: share < this (combined with below-median revenue)
    pub revenue_max_share: f64,
    /// Whether the revenue sub-rule folds into the primary label.
    /// Defaults to false, matching the historical label definition; both
    /// compositions are supported because it is unresolved whether the
    /// revenue rule was excluded deliberately.
    pub include_revenue_rule: bool,
    /// is_dominant: share > this
    pub dominant_share: f64,
    /// HHI upper bound for the "competitive" concentration category
    pub competitive_hhi_max: f64,
    /// HHI upper bound for the "moderate" concentration category
    pub moderate_hhi_max: f64,
    /// Leakage risk: top share above this marks a high-concentration market
    pub high_concentration_share: f64,
    /// Growth opportunity: share below this in a market with more than
    /// `fragmented_min_providers` providers marks a fragmented market
    pub fragmented_max_share: f64,
    pub fragmented_min_providers: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            competitive_max_share: 15.0,
            competitive_min_providers: 3,
            competitive_min_fragmentation: 0.3,
            concentrated_min_position: 2,
            concentrated_min_hhi: 2500.0,
            concentrated_max_share: 30.0,
            positional_min_position: 3,
            positional_max_share: 10.0,
            revenue_max_share: 20.0,
            include_revenue_rule: false,
            dominant_share: 50.0,
            competitive_hhi_max: 1500.0,
            moderate_hhi_max: 2500.0,
            high_concentration_share: 80.0,
            fragmented_max_share: 25.0,
            fragmented_min_providers: 5,
        }
    }
}

/// Training hyperparameters for the gradient-boosted classifier and the
/// logistic baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Boosting rounds
    pub n_rounds: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Shrinkage applied to each tree's contribution
    pub learning_rate: f64,
    /// L2 regularization on leaf values
    pub lambda: f64,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Held-out fraction for evaluation
    pub test_fraction: f64,
    /// Seed for the stratified train/test shuffle
    pub seed: u64,
    /// Gradient-descent iterations for the logistic baseline
    pub baseline_iterations: usize,
    /// Gradient-descent step size for the logistic baseline
    pub baseline_learning_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            max_depth: 6,
            learning_rate: 0.1,
            lambda: 1.0,
            min_samples_leaf: 10,
            test_fraction: 0.2,
            seed: 42,
            baseline_iterations: 500,
            baseline_learning_rate: 0.1,
        }
    }
}

/// Deterministic market aggregates assumed for observations that cannot be
/// resolved against the insights snapshot
///
/// The serving path must stay reproducible, so unknown providers get these
/// fixed values instead of sampled ones. They describe a mid-pack provider
/// in a moderately concentrated four-provider market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDefaults {
    pub market_share: f64,
    pub market_position: u32,
    pub provider_count: usize,
    pub revenue: f64,
    pub total_market_revenue: f64,
    pub hhi: f64,
    pub share_gap_to_leader: f64,
}

impl Default for FallbackDefaults {
    fn default() -> Self {
        Self {
            market_share: 10.0,
            market_position: 3,
            provider_count: 4,
            revenue: 50_000.0,
            total_market_revenue: 500_000.0,
            hhi: 2_000.0,
            share_gap_to_leader: 25.0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_progress_bar: default_enable_progress_bar(),
            parallel_threads: None,
            skip_invalid_records: false,
            batch_size: default_batch_size(),
            market_analysis_limit: default_market_analysis_limit(),
            leakage_limit: default_leakage_limit(),
            network_limit: default_network_limit(),
            risk: RiskThresholds::default(),
            model: ModelConfig::default(),
            fallback: FallbackDefaults::default(),
        }
    }
}

// Default value functions for serde
fn default_enable_progress_bar() -> bool {
    true
}

fn default_batch_size() -> usize {
    10_000
}

fn default_market_analysis_limit() -> usize {
    100
}

fn default_leakage_limit() -> usize {
    15
}

fn default_network_limit() -> usize {
    20
}

impl PipelineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - `REFERRALGUARD_PROGRESS_BAR`: "true" or "false"
    /// - `REFERRALGUARD_PARALLEL_THREADS`: number or "auto"
    /// - `REFERRALGUARD_SKIP_INVALID`: "true" or "false"
    /// - `REFERRALGUARD_BATCH_SIZE`: number
    /// - `REFERRALGUARD_MARKET_LIMIT`: number
    /// - `REFERRALGUARD_MODEL_SEED`: number
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REFERRALGUARD_PROGRESS_BAR") {
            config.enable_progress_bar = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("REFERRALGUARD_PARALLEL_THREADS") {
            config.parallel_threads = match val.to_lowercase().as_str() {
                "auto" | "0" => None,
                num => num.parse().ok(),
            };
        }

        if let Ok(val) = std::env::var("REFERRALGUARD_SKIP_INVALID") {
            config.skip_invalid_records = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("REFERRALGUARD_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("REFERRALGUARD_MARKET_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.market_analysis_limit = limit;
            }
        }

        if let Ok(val) = std::env::var("REFERRALGUARD_MODEL_SEED") {
            if let Ok(seed) = val.parse() {
                config.model.seed = seed;
            }
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::ReferralGuardError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::ReferralGuardError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/referralguard/config.toml` on Unix-like systems
    /// or `%APPDATA%\referralguard\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "referralguard")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                if let Ok(config) = Self::from_file(&config_path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Create a configuration optimized for throughput over large raw files
    pub fn performance() -> Self {
        Self {
            enable_progress_bar: false,
            parallel_threads: None, // Use all available
            skip_invalid_records: true,
            batch_size: 50_000,
            ..Self::default()
        }
    }

    /// Create a configuration that fails fast on any malformed input
    pub fn strict() -> Self {
        Self {
            enable_progress_bar: true,
            parallel_threads: Some(1), // Single-threaded for predictability
            skip_invalid_records: false,
            batch_size: 1_000,
            ..Self::default()
        }
    }
}

// Global configuration support
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<PipelineConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: PipelineConfig) {
    *GLOBAL_CONFIG.write().unwrap() = Some(config);
}

/// Get the global configuration (or default if not set)
pub fn global_config() -> PipelineConfig {
    GLOBAL_CONFIG.read().unwrap()
        .as_ref()
        .cloned()
        .unwrap_or_else(PipelineConfig::load)
}

/// Clear the global configuration
pub fn clear_global_config() {
    *GLOBAL_CONFIG.write().unwrap() = None;
}

/// Builder for customizing configuration
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    /// Set number of parallel threads
    pub fn parallel_threads(mut self, threads: Option<usize>) -> Self {
        self.config.parallel_threads = threads;
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set risk thresholds
    pub fn risk_thresholds(mut self, risk: RiskThresholds) -> Self {
        self.config.risk = risk;
        self
    }

    /// Set model hyperparameters
    pub fn model_config(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    /// Set fallback defaults for unresolvable observations
    pub fn fallback_defaults(mut self, fallback: FallbackDefaults) -> Self {
        self.config.fallback = fallback;
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
