/*!
 * Risk target construction (training time)
 *
 * Derives the boolean training labels from analyzed provider-market records.
 * Four sub-rules are computed independently; the primary label composes
 * competitive OR concentrated OR positional. The revenue sub-rule is tracked
 * separately and only folds into the primary label when
 * `RiskThresholds::include_revenue_rule` is set.
 */

use crate::analytics::MarketAnalysis;
use crate::config::RiskThresholds;
use crate::data_types::{MarketSummary, ProviderMarketRecord, RiskLabels};

/// Builder for the boolean risk labels
pub struct RiskTargetBuilder<'a> {
    thresholds: &'a RiskThresholds,
}

impl<'a> RiskTargetBuilder<'a> {
    /// Create a builder using the given thresholds
    pub fn new(thresholds: &'a RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Small share in a fragmented market with several competitors
    pub fn competitive_risk(
        &self,
        record: &ProviderMarketRecord,
        summary: &MarketSummary,
    ) -> bool {
        record.market_share_percentage < self.thresholds.competitive_max_share
            && summary.provider_count >= self.thresholds.competitive_min_providers
            && summary.market_fragmentation > self.thresholds.competitive_min_fragmentation
    }

    /// Trailing position in a concentrated market
    pub fn concentrated_risk(
        &self,
        record: &ProviderMarketRecord,
        summary: &MarketSummary,
    ) -> bool {
        record.market_position >= self.thresholds.concentrated_min_position
            && summary.hhi > self.thresholds.concentrated_min_hhi
            && record.market_share_percentage < self.thresholds.concentrated_max_share
    }

    /// Weak market position or very small share
    pub fn positional_risk(&self, record: &ProviderMarketRecord) -> bool {
        record.market_position >= self.thresholds.positional_min_position
            || record.market_share_percentage < self.thresholds.positional_max_share
    }

    /// Below-median revenue combined with a small share
    pub fn revenue_risk(&self, record: &ProviderMarketRecord, cohort_median_revenue: f64) -> bool {
        record.provider_revenue < cohort_median_revenue
            && record.market_share_percentage < self.thresholds.revenue_max_share
    }

    /// Label one record against its market summary
    pub fn label(
        &self,
        record: &ProviderMarketRecord,
        summary: &MarketSummary,
        cohort_median_revenue: f64,
    ) -> RiskLabels {
        let competitive = self.competitive_risk(record, summary);
        let concentrated = self.concentrated_risk(record, summary);
        let positional = self.positional_risk(record);
        let revenue = self.revenue_risk(record, cohort_median_revenue);

        let mut is_high_risk = competitive || concentrated || positional;
        if self.thresholds.include_revenue_rule {
            is_high_risk = is_high_risk || revenue;
        }

        RiskLabels {
            competitive,
            concentrated,
            positional,
            revenue,
            is_high_risk,
        }
    }

    /// Label every record in an analyzed cohort
    ///
    /// The revenue sub-rule's median is computed over this cohort's provider
    /// revenues. Returns one label per record, in record order.
    pub fn build(&self, analysis: &MarketAnalysis) -> Vec<RiskLabels> {
        let median = cohort_median_revenue(&analysis.records);

        analysis.records.iter()
            .map(|record| {
                let summary = analysis.summary_for_record(record)
                    .expect("every analyzed record has a market summary");
                self.label(record, summary, median)
            })
            .collect()
    }
}

/// Median provider revenue over a cohort; 0 for an empty cohort
pub fn cohort_median_revenue(records: &[ProviderMarketRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }

    let mut revenues: Vec<f64> = records.iter().map(|r| r.provider_revenue).collect();
    revenues.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = revenues.len() / 2;
    if revenues.len() % 2 == 1 {
        revenues[mid]
    } else {
        (revenues[mid - 1] + revenues[mid]) / 2.0
    }
}
