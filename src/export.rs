/*!
 * Persisted artifacts
 *
 * Assembles and writes the JSON artifacts consumed outside the pipeline:
 * the insights file feeding the dashboard, the model performance report,
 * and batch scoring output. Also reads insights back in, since training and
 * serving both start from a persisted snapshot.
 */

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, ReferralGuardError, ArtifactKind};
use crate::analytics::{
    LeakageOpportunity, MarketAnalysis, NetworkAnalysis, NetworkInsight, ProviderNetwork,
};
use crate::config::PipelineConfig;
use crate::data_types::{BatchScoringResponse, ProviderMarketRecord};
use crate::model::TrainedModel;

/// Dashboard summary block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsSummary {
    pub total_markets_analyzed: usize,
    pub high_concentration_markets: usize,
    pub fragmented_markets: usize,
    pub total_revenue_analyzed: f64,
    pub average_market_share: f64,
    pub provider_networks_count: usize,
    pub multi_affiliation_providers: usize,
}

/// The insights artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub summary: InsightsSummary,
    pub market_analysis: Vec<ProviderMarketRecord>,
    pub leakage_opportunities: Vec<LeakageOpportunity>,
    pub provider_networks: Vec<ProviderNetwork>,
    pub network_insights: Vec<NetworkInsight>,
}

/// Assemble the insights artifact from an analysis run
///
/// Summary statistics cover the full cohort; the market-analysis list is
/// then truncated to the configured top shares so the artifact stays small
/// enough for the dashboard to load.
pub fn build_insights(
    analysis: &MarketAnalysis,
    leakage_opportunities: Vec<LeakageOpportunity>,
    networks: &NetworkAnalysis,
    config: &PipelineConfig,
) -> Insights {
    let high_concentration_markets = analysis.records.iter()
        .filter(|r| r.market_share_percentage > config.risk.high_concentration_share)
        .count();
    let fragmented_markets = analysis.summaries.iter()
        .filter(|s| {
            s.leader_share < config.risk.fragmented_max_share
                && s.provider_count > config.risk.fragmented_min_providers
        })
        .count();
    let total_revenue_analyzed: f64 = analysis.summaries.iter()
        .map(|s| s.total_market_revenue)
        .sum();
    let average_market_share = if analysis.records.is_empty() {
        0.0
    } else {
        analysis.records.iter()
            .map(|r| r.market_share_percentage)
            .sum::<f64>() / analysis.records.len() as f64
    };

    let mut market_analysis = analysis.records.clone();
    market_analysis.sort_by(|a, b| {
        b.market_share_percentage
            .partial_cmp(&a.market_share_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    market_analysis.truncate(config.market_analysis_limit);

    Insights {
        summary: InsightsSummary {
            total_markets_analyzed: analysis.summaries.len(),
            high_concentration_markets,
            fragmented_markets,
            total_revenue_analyzed,
            average_market_share,
            provider_networks_count: networks.total_networks,
            multi_affiliation_providers: networks.multi_affiliation_providers.len(),
        },
        market_analysis,
        leakage_opportunities,
        provider_networks: networks.networks.clone(),
        network_insights: networks.multi_affiliation_providers.clone(),
    }
}

/// Write the insights artifact
pub fn write_insights<P: AsRef<Path>>(insights: &Insights, path: P) -> Result<()> {
    write_json(insights, path.as_ref(), ArtifactKind::Insights)
}

/// Read a previously written insights artifact
pub fn read_insights<P: AsRef<Path>>(path: P) -> Result<Insights> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ReferralGuardError::file_not_found_with_suggestion(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ReferralGuardError::Export {
        message: format!("Failed to parse insights file: {}", e),
        artifact: ArtifactKind::Insights,
        suggestion: Some("Regenerate the file with 'rgcli analyze'.".to_string()),
    })
}

/// Model performance report, written next to the model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub timestamp: DateTime<Utc>,
    pub model_name: String,
    pub metrics: ReportMetrics,
    pub baseline_metrics: ReportMetrics,
    pub feature_importance: std::collections::BTreeMap<String, f64>,
}

/// Held-out metrics pair as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub auc_score: f64,
    pub accuracy: f64,
}

impl PerformanceReport {
    /// Build the report from a trained model
    pub fn from_model(model: &TrainedModel) -> Self {
        Self {
            timestamp: model.created_at,
            model_name: model.model_name.clone(),
            metrics: ReportMetrics {
                auc_score: model.metrics.auc_score,
                accuracy: model.metrics.accuracy,
            },
            baseline_metrics: ReportMetrics {
                auc_score: model.metrics.baseline_auc_score,
                accuracy: model.metrics.baseline_accuracy,
            },
            feature_importance: model.feature_importance.clone(),
        }
    }
}

/// Write the performance report
pub fn write_performance_report<P: AsRef<Path>>(
    report: &PerformanceReport,
    path: P,
) -> Result<()> {
    write_json(report, path.as_ref(), ArtifactKind::PerformanceReport)
}

/// Write a batch scoring response, either to a file or to stdout
pub fn write_scoring_response(
    response: &BatchScoringResponse,
    path: Option<&Path>,
) -> Result<()> {
    match path {
        Some(path) => write_json(response, path, ArtifactKind::ScoringOutput),
        None => {
            let json = serde_json::to_string_pretty(response)?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json)?;
            Ok(())
        }
    }
}

/// Serialize a value as pretty JSON, creating parent directories
fn write_json<T: Serialize>(value: &T, path: &Path, artifact: ArtifactKind) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value).map_err(|e| ReferralGuardError::Export {
        message: e.to_string(),
        artifact,
        suggestion: None,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{
        analyze_provider_networks, identify_leakage_opportunities, ConcentrationAnalyzer,
    };
    use crate::config::RiskThresholds;
    use crate::data_types::{CanonicalClaim, ZipCode};
    use crate::market::aggregate_claims;

    fn sample_analysis() -> MarketAnalysis {
        let claims: Vec<CanonicalClaim> = [
            ("1111111111", "90210", "Cardiology", 900.0),
            ("2222222222", "90210", "Cardiology", 100.0),
            ("3333333333", "10001", "Oncology", 400.0),
            ("4444444444", "10001", "Oncology", 600.0),
        ].iter().map(|(npi, zip, specialty, revenue)| CanonicalClaim {
            npi: npi.to_string(),
            provider_name: format!("Provider {}", npi),
            zip_code: ZipCode::normalize(zip),
            specialty: specialty.to_string(),
            services: 1.0,
            avg_charge: *revenue,
            revenue: *revenue,
        }).collect();
        let thresholds = RiskThresholds::default();
        ConcentrationAnalyzer::new(&thresholds).analyze(aggregate_claims(claims))
    }

    #[test]
    fn test_insights_summary() {
        let analysis = sample_analysis();
        let config = PipelineConfig::default();
        let opportunities =
            identify_leakage_opportunities(&analysis, &config.risk, config.leakage_limit);
        let networks = analyze_provider_networks(&[], config.network_limit);
        let insights = build_insights(&analysis, opportunities, &networks, &config);

        assert_eq!(insights.summary.total_markets_analyzed, 2);
        assert_eq!(insights.summary.high_concentration_markets, 1);
        assert_eq!(insights.summary.fragmented_markets, 0);
        assert!((insights.summary.total_revenue_analyzed - 2000.0).abs() < 1e-9);
        // Shares: 90, 10, 40, 60 -> mean 50
        assert!((insights.summary.average_market_share - 50.0).abs() < 1e-9);
        assert_eq!(insights.market_analysis[0].provider_npi, "1111111111");
    }

    #[test]
    fn test_market_analysis_truncation() {
        let analysis = sample_analysis();
        let mut config = PipelineConfig::default();
        config.market_analysis_limit = 2;
        let networks = analyze_provider_networks(&[], config.network_limit);
        let insights = build_insights(&analysis, Vec::new(), &networks, &config);

        assert_eq!(insights.market_analysis.len(), 2);
        // Truncation keeps the top shares but the summary still covers all
        assert_eq!(insights.summary.total_markets_analyzed, 2);
        assert!((insights.market_analysis[0].market_share_percentage - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_insights_roundtrip() {
        let analysis = sample_analysis();
        let config = PipelineConfig::default();
        let opportunities =
            identify_leakage_opportunities(&analysis, &config.risk, config.leakage_limit);
        let networks = analyze_provider_networks(&[], config.network_limit);
        let insights = build_insights(&analysis, opportunities, &networks, &config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs").join("real_insights.json");
        write_insights(&insights, &path).unwrap();

        let restored = read_insights(&path).unwrap();
        assert_eq!(insights, restored);
    }

    #[test]
    fn test_insights_wire_field_names() {
        let analysis = sample_analysis();
        let config = PipelineConfig::default();
        let networks = analyze_provider_networks(&[], config.network_limit);
        let insights = build_insights(&analysis, Vec::new(), &networks, &config);

        let json = serde_json::to_value(&insights).unwrap();
        assert!(json["summary"]["totalMarketsAnalyzed"].is_number());
        assert!(json["summary"]["averageMarketShare"].is_number());
        let record = &json["marketAnalysis"][0];
        assert!(record["zipCode"].is_string());
        assert!(record["providerNPI"].is_string());
        assert!(record["marketSharePercentage"].is_number());
        assert!(record["totalMarketRevenue"].is_number());
    }

    #[test]
    fn test_missing_insights_file() {
        let err = read_insights("/nonexistent/real_insights.json").unwrap_err();
        assert!(matches!(err, ReferralGuardError::FileNotFound { .. }));
    }
}
