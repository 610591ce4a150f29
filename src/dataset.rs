/*!
 * Unified pipeline API
 *
 * Provides a builder for loading all raw sources and running the
 * aggregation and analysis stages in one pass, plus a dataset type holding
 * the results with summary statistics.
 */

use std::path::{Path, PathBuf};

use crate::{Result, ReferralGuardError};
use crate::analytics::{
    analyze_provider_networks, identify_leakage_opportunities, ConcentrationAnalyzer,
    MarketAnalysis, NetworkAnalysis,
};
use crate::config::PipelineConfig;
use crate::export::{build_insights, Insights};
use crate::features::MarketLookup;
use crate::market::MarketAggregator;
use crate::normalize::ProviderNameMap;
use crate::reader::ClaimsReader;

/// Builder for loading the raw sources and producing a `MarketDataset`
///
/// # Example
/// ```no_run
/// # use referralguard::dataset::MarketDatasetBuilder;
/// let dataset = MarketDatasetBuilder::new()
///     .billing_data("data/MUP_PHY_R25_P05_V20_D23_Prov_Svc.csv")
///     .provider_names("data/npidata_pfile_20240101-20240107.csv")
///     .endpoints("data/endpoint_pfile_20240101-20240107.csv")
///     .skip_invalid_records(true)
///     .build()?;
/// # Ok::<(), referralguard::ReferralGuardError>(())
/// ```
pub struct MarketDatasetBuilder {
    billing_path: Option<PathBuf>,
    provider_names_path: Option<PathBuf>,
    endpoints_path: Option<PathBuf>,
    config: PipelineConfig,
}

impl Default for MarketDatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDatasetBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self {
            billing_path: None,
            provider_names_path: None,
            endpoints_path: None,
            config: PipelineConfig::load(),
        }
    }

    /// Set the path to the Medicare utilization file (required)
    pub fn billing_data<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.billing_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the path to the NPPES main file for provider names (optional)
    pub fn provider_names<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.provider_names_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the path to the NPPES endpoint file for networks (optional)
    pub fn endpoints<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.endpoints_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable or disable skipping malformed records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Enable or disable progress bars
    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.enable_progress_bar = show;
        self
    }

    /// Override the full pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load everything and run aggregation and concentration analysis
    ///
    /// The billing file is required. The name and endpoint files are
    /// optional enrichments: when one is missing its stage logs the problem
    /// and degrades to an empty default instead of failing the run.
    pub fn build(self) -> Result<MarketDataset> {
        let billing_path = self.billing_path.clone()
            .ok_or_else(|| ReferralGuardError::Custom {
                message: "Billing data file path not specified".to_string(),
                suggestion: Some(
                    "Use .billing_data() to specify the Medicare utilization file".to_string(),
                ),
            })?;

        println!("Loading market dataset...");

        let reader = self.make_reader();

        // Optional: NPPES name map
        let name_map = match &self.provider_names_path {
            Some(path) => {
                println!("Loading provider names from: {}", path.display());
                match reader.load_provider_names(path) {
                    Ok(names) => names,
                    Err(e) => {
                        eprintln!("Warning: provider name map unavailable: {}", e);
                        ProviderNameMap::new()
                    }
                }
            }
            None => ProviderNameMap::new(),
        };

        // Required: billing claims, streamed into the aggregator in chunks
        println!("Loading billing data from: {}", billing_path.display());
        let mut aggregator = MarketAggregator::new();
        let skipped_records = reader.fold_billing_claims(
            &billing_path,
            &name_map,
            self.config.batch_size,
            |chunk| aggregator.absorb(chunk),
        )?;
        let claims_seen = aggregator.claims_seen();

        println!("Analyzing {} markets...", aggregator.market_count());
        let analyzer = ConcentrationAnalyzer::new(&self.config.risk);
        let analysis = analyzer.analyze(aggregator.finish());

        // Optional: endpoint affiliations -> provider networks
        let networks = match &self.endpoints_path {
            Some(path) => {
                println!("Loading endpoints from: {}", path.display());
                match reader.load_endpoint_records(path) {
                    Ok(records) => {
                        analyze_provider_networks(&records, self.config.network_limit)
                    }
                    Err(e) => {
                        eprintln!("Warning: provider network analysis unavailable: {}", e);
                        NetworkAnalysis::default()
                    }
                }
            }
            None => NetworkAnalysis::default(),
        };

        println!("Dataset loaded successfully!");
        Ok(MarketDataset {
            analysis,
            networks,
            config: self.config,
            claims_seen,
            skipped_records,
            provider_names_loaded: name_map.len(),
        })
    }

    fn make_reader(&self) -> ClaimsReader {
        #[allow(unused_mut)]
        let mut reader = ClaimsReader::new()
            .with_skip_invalid_records(self.config.skip_invalid_records);
        #[cfg(feature = "progress")]
        {
            reader = reader.with_progress_bar(self.config.enable_progress_bar);
        }
        reader
    }
}

/// A fully analyzed market dataset
#[derive(Debug)]
pub struct MarketDataset {
    /// Enriched records and per-market summaries
    pub analysis: MarketAnalysis,
    /// Provider networks from the endpoint file
    pub networks: NetworkAnalysis,
    /// Configuration the dataset was built with
    pub config: PipelineConfig,
    claims_seen: usize,
    skipped_records: usize,
    provider_names_loaded: usize,
}

impl MarketDataset {
    /// Assemble the insights artifact for this dataset
    pub fn insights(&self) -> Insights {
        let opportunities = identify_leakage_opportunities(
            &self.analysis,
            &self.config.risk,
            self.config.leakage_limit,
        );
        build_insights(&self.analysis, opportunities, &self.networks, &self.config)
    }

    /// Build the read-only snapshot lookup for serving
    pub fn lookup(&self) -> MarketLookup {
        MarketLookup::from_analysis(&self.analysis)
    }

    /// Summary statistics for this dataset
    pub fn statistics(&self) -> DatasetStatistics {
        let records = &self.analysis.records;
        let summaries = &self.analysis.summaries;

        DatasetStatistics {
            claims_processed: self.claims_seen,
            skipped_records: self.skipped_records,
            provider_names_loaded: self.provider_names_loaded,
            provider_market_records: records.len(),
            markets: summaries.len(),
            single_provider_markets: summaries.iter()
                .filter(|s| s.provider_count == 1)
                .count(),
            concentrated_markets: summaries.iter()
                .filter(|s| s.hhi > self.config.risk.moderate_hhi_max)
                .count(),
            total_revenue: summaries.iter().map(|s| s.total_market_revenue).sum(),
            provider_networks: self.networks.total_networks,
        }
    }
}

/// Statistics about an analyzed dataset
#[derive(Debug, Clone)]
pub struct DatasetStatistics {
    pub claims_processed: usize,
    pub skipped_records: usize,
    pub provider_names_loaded: usize,
    pub provider_market_records: usize,
    pub markets: usize,
    pub single_provider_markets: usize,
    pub concentrated_markets: usize,
    pub total_revenue: f64,
    pub provider_networks: usize,
}

impl DatasetStatistics {
    /// Print formatted statistics
    pub fn print_summary(&self) {
        println!("=== Market Dataset Statistics ===");
        println!("Claims Processed: {}", self.claims_processed);
        println!("Skipped Records: {}", self.skipped_records);
        println!("Provider Names Loaded: {}", self.provider_names_loaded);
        println!("Provider-Market Records: {}", self.provider_market_records);
        println!("Markets: {}", self.markets);
        println!("  Single-Provider Markets: {}", self.single_provider_markets);
        println!("  Concentrated Markets: {}", self.concentrated_markets);
        println!("Total Revenue Analyzed: ${:.2}", self.total_revenue);
        println!("Provider Networks: {}", self.provider_networks);

        if self.markets > 0 {
            let single_percent =
                (self.single_provider_markets as f64 / self.markets as f64) * 100.0;
            println!("Single-Provider Market Percentage: {:.1}%", single_percent);
        }
    }
}
