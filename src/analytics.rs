/*!
 * Market concentration analysis and dashboard insights
 *
 * Computes per-market concentration statistics (HHI, fragmentation, dense
 * market positions, share gaps) over aggregated provider-market records,
 * and derives the insight artifacts the dashboard consumes: leakage
 * opportunities, provider networks, and the summary block.
 *
 * Leakage here is a proxy inferred from market concentration; actual
 * referral flow is never observed in the source data.
 */

use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::config::RiskThresholds;
use crate::data_types::{
    AffiliationRecord, ConcentrationCategory, MarketSummary, ProviderMarketRecord, ZipCode,
};

/// Analyzer for aggregated provider-market records
pub struct ConcentrationAnalyzer<'a> {
    thresholds: &'a RiskThresholds,
}

/// Analyzer output: enriched records plus one summary per market
#[derive(Debug, Clone)]
pub struct MarketAnalysis {
    /// Records enriched with position, share gap, and dominance flags
    pub records: Vec<ProviderMarketRecord>,
    /// One summary per (zip, specialty) market
    pub summaries: Vec<MarketSummary>,
    summary_index: HashMap<(String, String), usize>,
}

impl MarketAnalysis {
    /// Look up the market summary for a (zip, specialty) key
    pub fn summary_for(&self, zip_code: &str, specialty: &str) -> Option<&MarketSummary> {
        self.summary_index
            .get(&(zip_code.to_string(), specialty.to_string()))
            .map(|&idx| &self.summaries[idx])
    }

    /// Look up the market summary for a record
    pub fn summary_for_record(&self, record: &ProviderMarketRecord) -> Option<&MarketSummary> {
        self.summary_for(record.zip_code.as_str(), &record.specialty)
    }
}

impl<'a> ConcentrationAnalyzer<'a> {
    /// Create an analyzer using the given thresholds
    pub fn new(thresholds: &'a RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Categorize an HHI value
    pub fn categorize(&self, hhi: f64) -> ConcentrationCategory {
        if hhi <= self.thresholds.competitive_hhi_max {
            ConcentrationCategory::Competitive
        } else if hhi <= self.thresholds.moderate_hhi_max {
            ConcentrationCategory::Moderate
        } else {
            ConcentrationCategory::Concentrated
        }
    }

    /// Analyze aggregated records, producing enriched records and summaries
    ///
    /// Accepts records in any order; providers within a market are treated
    /// in input order, which is the documented first-encountered tie-break
    /// for the top provider.
    pub fn analyze(&self, records: Vec<ProviderMarketRecord>) -> MarketAnalysis {
        // Group record indexes by market key, preserving input order
        let mut market_order: Vec<(ZipCode, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let key = (record.zip_code.0.clone(), record.specialty.clone());
            let entry = groups.entry(key).or_default();
            if entry.is_empty() {
                market_order.push((record.zip_code.clone(), record.specialty.clone()));
            }
            entry.push(idx);
        }

        let mut enriched = records;
        let mut summaries = Vec::with_capacity(market_order.len());
        let mut summary_index = HashMap::with_capacity(market_order.len());

        for (zip_code, specialty) in market_order {
            let key = (zip_code.0.clone(), specialty.clone());
            let indexes = &groups[&key];

            let shares: Vec<f64> = indexes.iter()
                .map(|&i| enriched[i].market_share_percentage)
                .collect();

            let hhi = herfindahl_index(&shares);
            let market_fragmentation = 1.0 - hhi / 10_000.0;
            let leader_share = shares.iter().cloned().fold(0.0, f64::max);

            // Dense rank positions over descending shares
            let mut distinct = shares.clone();
            distinct.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            distinct.dedup();

            // Top provider: highest revenue, earliest-encountered on ties
            let top_idx = indexes.iter()
                .copied()
                .fold(indexes[0], |best, i| {
                    if enriched[i].provider_revenue > enriched[best].provider_revenue {
                        i
                    } else {
                        best
                    }
                });

            for (&i, &share) in indexes.iter().zip(shares.iter()) {
                let position = distinct.iter()
                    .position(|&s| s == share)
                    .map(|p| (p + 1) as u32)
                    .unwrap_or(1);

                let record = &mut enriched[i];
                record.market_position = position;
                record.share_gap_to_leader = leader_share - share;
                record.is_dominant = share > self.thresholds.dominant_share;
                record.is_second_place = position == 2;
                record.is_third_place = position == 3;
            }

            let total_market_revenue = enriched[indexes[0]].total_market_revenue;
            summary_index.insert(key, summaries.len());
            summaries.push(MarketSummary {
                zip_code,
                specialty,
                provider_count: indexes.len(),
                total_market_revenue,
                hhi,
                market_fragmentation,
                concentration_category: self.categorize(hhi),
                leader_share,
                top_provider_npi: enriched[top_idx].provider_npi.clone(),
                top_provider_name: enriched[top_idx].provider_name.clone(),
            });
        }

        MarketAnalysis {
            records: enriched,
            summaries,
            summary_index,
        }
    }
}

/// Herfindahl-Hirschman Index over market shares given in percent
///
/// Sum of squared share fractions x 10000; 10000 for a monopoly, 10000/N
/// for N equal-share providers, 0 for a zero-revenue market.
pub fn herfindahl_index(shares_percent: &[f64]) -> f64 {
    shares_percent.iter()
        .map(|share| {
            let fraction = share / 100.0;
            fraction * fraction
        })
        .sum::<f64>() * 10_000.0
}

/// One leakage risk or growth opportunity derived from market concentration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakageOpportunity {
    #[serde(rename = "type")]
    pub opportunity_type: String,
    pub zip_code: ZipCode,
    pub specialty: String,
    pub description: String,
    pub revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_share: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_count: Option<usize>,
}

/// One provider organization from the endpoint affiliation data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderNetwork {
    pub affiliation_legal_business_name: String,
    pub provider_count: usize,
    pub endpoint_count: usize,
}

/// A provider affiliated with more than one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInsight {
    pub provider_name: String,
    #[serde(rename = "providerNPI")]
    pub provider_npi: String,
    pub affiliation_count: usize,
    pub endpoint_count: usize,
    pub description: String,
}

/// Provider-network analysis output
#[derive(Debug, Clone, Default)]
pub struct NetworkAnalysis {
    /// Largest networks by distinct provider count
    pub networks: Vec<ProviderNetwork>,
    /// Providers spanning more than one affiliation
    pub multi_affiliation_providers: Vec<NetworkInsight>,
    /// Total distinct organizations seen, before truncation
    pub total_networks: usize,
}

/// Identify leakage risks and growth opportunities from analyzed records
///
/// High-concentration risk: a provider holding more than the configured
/// share of its market (competitors can target the captive volume).
/// Growth opportunity: a fragmented market whose top share is small.
/// Each list is capped at `limit`, ordered by share / market revenue so the
/// output is deterministic.
pub fn identify_leakage_opportunities(
    analysis: &MarketAnalysis,
    thresholds: &RiskThresholds,
    limit: usize,
) -> Vec<LeakageOpportunity> {
    let mut opportunities = Vec::new();

    let mut high_concentration: Vec<&ProviderMarketRecord> = analysis.records.iter()
        .filter(|r| r.market_share_percentage > thresholds.high_concentration_share)
        .collect();
    high_concentration.sort_by(|a, b| {
        b.market_share_percentage
            .partial_cmp(&a.market_share_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for record in high_concentration.into_iter().take(limit) {
        opportunities.push(LeakageOpportunity {
            opportunity_type: "High Concentration Risk".to_string(),
            zip_code: record.zip_code.clone(),
            specialty: record.specialty.clone(),
            description: format!(
                "{} has a {:.1}% market share in {} in zip {}.",
                record.provider_name,
                record.market_share_percentage,
                record.specialty,
                record.zip_code,
            ),
            revenue: record.total_market_revenue,
            market_share: Some(record.market_share_percentage),
            provider_count: None,
        });
    }

    // One opportunity per fragmented market, keyed off its summary
    let mut fragmented: Vec<&MarketSummary> = analysis.summaries.iter()
        .filter(|s| {
            s.leader_share < thresholds.fragmented_max_share
                && s.provider_count > thresholds.fragmented_min_providers
        })
        .collect();
    fragmented.sort_by(|a, b| {
        b.total_market_revenue
            .partial_cmp(&a.total_market_revenue)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for summary in fragmented.into_iter().take(limit) {
        opportunities.push(LeakageOpportunity {
            opportunity_type: "Market Share Opportunity".to_string(),
            zip_code: summary.zip_code.clone(),
            specialty: summary.specialty.clone(),
            description: format!(
                "Fragmented market: {} in zip {} has {} providers, with the top provider holding only {:.1}% share.",
                summary.specialty,
                summary.zip_code,
                summary.provider_count,
                summary.leader_share,
            ),
            revenue: summary.total_market_revenue,
            market_share: None,
            provider_count: Some(summary.provider_count),
        });
    }

    opportunities
}

/// Analyze endpoint affiliations into provider networks
pub fn analyze_provider_networks(
    affiliations: &[AffiliationRecord],
    network_limit: usize,
) -> NetworkAnalysis {
    // Distinct NPIs and endpoints per organization
    let mut by_organization: HashMap<&str, (HashSet<&str>, HashSet<&str>)> = HashMap::new();
    // Distinct organizations and endpoints per provider
    let mut by_provider: HashMap<&str, (HashSet<&str>, HashSet<&str>)> = HashMap::new();

    for record in affiliations {
        let Some(lbn) = record.affiliation_legal_business_name.as_deref() else {
            continue;
        };

        let (npis, endpoints) = by_organization.entry(lbn).or_default();
        npis.insert(record.npi.as_str());
        if let Some(endpoint) = record.endpoint.as_deref() {
            endpoints.insert(endpoint);
        }

        let (orgs, provider_endpoints) = by_provider.entry(record.npi.as_str()).or_default();
        orgs.insert(lbn);
        if let Some(endpoint) = record.endpoint.as_deref() {
            provider_endpoints.insert(endpoint);
        }
    }

    let total_networks = by_organization.len();

    let mut networks: Vec<ProviderNetwork> = by_organization.into_iter()
        .map(|(lbn, (npis, endpoints))| ProviderNetwork {
            affiliation_legal_business_name: lbn.to_string(),
            provider_count: npis.len(),
            endpoint_count: endpoints.len(),
        })
        .collect();
    networks.sort_by(|a, b| {
        b.provider_count.cmp(&a.provider_count)
            .then_with(|| a.affiliation_legal_business_name.cmp(&b.affiliation_legal_business_name))
    });
    networks.truncate(network_limit);

    let mut multi_affiliation_providers: Vec<NetworkInsight> = by_provider.into_iter()
        .filter(|(_, (orgs, _))| orgs.len() > 1)
        .map(|(npi, (orgs, endpoints))| NetworkInsight {
            provider_name: format!("Provider {}", npi),
            provider_npi: npi.to_string(),
            affiliation_count: orgs.len(),
            endpoint_count: endpoints.len(),
            description: format!(
                "Provider {} has {} affiliations across {} endpoints",
                npi,
                orgs.len(),
                endpoints.len(),
            ),
        })
        .collect();
    multi_affiliation_providers.sort_by(|a, b| {
        b.affiliation_count.cmp(&a.affiliation_count)
            .then_with(|| a.provider_npi.cmp(&b.provider_npi))
    });
    multi_affiliation_providers.truncate(network_limit);

    NetworkAnalysis {
        networks,
        multi_affiliation_providers,
        total_networks,
    }
}
