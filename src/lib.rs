/*!
 * # ReferralGuard Market Concentration & Risk Scoring
 *
 * A Rust library for analyzing provider market concentration in Medicare
 * billing data and scoring referral-leakage risk.
 *
 * ## Features
 *
 * - 🚀 **Streaming Ingestion**: Chunked parsing of multi-gigabyte CMS files
 * - 📊 **Market Analytics**: Per-market HHI, fragmentation, and dense share rankings
 * - 🎯 **Risk Labels**: Threshold-driven, fully configurable training targets
 * - 🧮 **Built-in Models**: Deterministic gradient boosting plus a logistic baseline
 * - 💾 **Stable Artifacts**: Insights, model, and report files round-trip via JSON
 * - 🛡️ **Graceful Degradation**: Rule-based scoring whenever no model artifact exists
 *
 * ## Quick Start
 *
 * ```no_run
 * use referralguard::prelude::*;
 *
 * # fn main() -> Result<()> {
 * // Aggregate billing data into analyzed markets
 * let dataset = MarketDatasetBuilder::new()
 *     .billing_data("data/MUP_PHY_R25_P05_V20_D23_Prov_Svc.csv")
 *     .provider_names("data/npidata_pfile_20240101-20240107.csv")
 *     .endpoints("data/endpoint_pfile_20240101-20240107.csv")
 *     .skip_invalid_records(true)
 *     .build()?;
 *
 * // Persist the dashboard insights
 * let insights = dataset.insights();
 * referralguard::export::write_insights(&insights, "outputs/real_insights.json")?;
 *
 * // Train and persist the risk model
 * let config = PipelineConfig::load();
 * let trainer = RiskModelTrainer::new(&config.model, &config.risk, &config.fallback);
 * let model = trainer.train(&dataset.analysis)?;
 * model.save("models/market_risk_gbdt.json")?;
 *
 * // Score a batch against the snapshot
 * let scorer = RiskScorer::new(
 *     Some(model),
 *     dataset.lookup(),
 *     config.fallback.clone(),
 *     config.risk.clone(),
 * )?;
 * let response = scorer.score_batch(&[]);
 * println!("high risk: {}", response.summary.high_risk_count);
 * # Ok(())
 * # }
 * ```
 *
 * ## Pipeline Stages
 *
 * Raw CSVs flow through five stages, each its own module:
 *
 * 1. [`normalize`] - raw billing rows into canonical claims
 * 2. [`market`] - claims into (zip, specialty, provider) records with shares
 * 3. [`analytics`] - HHI, market positions, leakage opportunities, networks
 * 4. [`risk`] - boolean training labels under configurable thresholds
 * 5. [`features`] + [`model`] - fixed-order vectors, training, and scoring
 *
 * ## Configuration
 *
 * Every rule threshold, model hyperparameter, and fallback default lives in
 * [`config::PipelineConfig`], loadable from TOML or environment variables:
 *
 * ```no_run
 * # use referralguard::prelude::*;
 * let config = ConfigBuilder::new()
 *     .skip_invalid_records(true)
 *     .batch_size(50_000)
 *     .build();
 * referralguard::config::set_global_config(config);
 * ```
 *
 * ## Source Data Files
 *
 * - **Medicare utilization**: `MUP_PHY_RXX_PXX_VXX_DXX_Prov_Svc.csv` from data.cms.gov
 * - **NPPES main file**: `npidata_pfile_YYYYMMDD-YYYYMMDD.csv` (names only)
 * - **NPPES endpoints**: `endpoint_pfile_YYYYMMDD-YYYYMMDD.csv` (affiliations)
 */

// Re-export error types from root
pub use error::{ReferralGuardError, Result, ErrorContext, ArtifactKind};

// Public modules
pub mod data_types;
pub mod schema;
pub mod error;
pub mod config;
pub mod normalize;
pub mod reader;
pub mod market;
pub mod analytics;
pub mod risk;
pub mod features;
pub mod model;
pub mod export;
pub mod dataset;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use referralguard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::error::{ReferralGuardError, Result};
    pub use crate::config::{ConfigBuilder, PipelineConfig, RiskThresholds};
    pub use crate::normalize::RecordNormalizer;
    pub use crate::reader::{ClaimsReader, MemoryEstimate, ProgressInfo};
    pub use crate::market::MarketAggregator;
    pub use crate::analytics::{ConcentrationAnalyzer, MarketAnalysis};
    pub use crate::risk::RiskTargetBuilder;
    pub use crate::features::{
        CategoricalVocabulary, FeatureEngineer, FeatureVector, MarketLookup, FEATURE_NAMES,
    };
    pub use crate::model::{RiskModelTrainer, RiskScorer, TrainedModel};
    pub use crate::export::{Insights, PerformanceReport};
    pub use crate::dataset::{DatasetStatistics, MarketDataset, MarketDatasetBuilder};
}

/// Pipeline constants
pub mod constants {
    /// Default insights artifact path
    pub const DEFAULT_INSIGHTS_FILE: &str = "outputs/real_insights.json";

    /// Default model artifact path
    pub const DEFAULT_MODEL_FILE: &str = "models/market_risk_gbdt.json";

    /// Default performance report path
    pub const DEFAULT_REPORT_FILE: &str = "outputs/model_performance.json";

    /// CMS file naming patterns
    pub const BILLING_FILE_PATTERN: &str = "MUP_PHY_*_Prov_Svc.csv";
    pub const NPPES_MAIN_FILE_PATTERN: &str = "npidata_pfile_*-*.csv";
    pub const ENDPOINT_FILE_PATTERN: &str = "endpoint_pfile_*-*.csv";
}

#[cfg(test)]
mod tests {
    use crate::data_types::{Npi, ZipCode};

    #[test]
    fn test_npi_validation() {
        assert!(Npi::new("1234567890".to_string()).is_ok());
        assert!(Npi::new("123".to_string()).is_err());
        assert!(Npi::new("12345678AB".to_string()).is_err());
    }

    #[test]
    fn test_zip_normalization() {
        assert_eq!(ZipCode::normalize("90210-1234").as_str(), "90210");
        assert_eq!(ZipCode::normalize("721").as_str(), "00721");
    }
}
