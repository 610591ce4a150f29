/*!
 * Data type definitions for the market concentration pipeline
 *
 * This module contains the typed entities flowing through the pipeline:
 * canonical billing claims, provider-market records, per-market summaries,
 * risk labels, and the scoring request/result contract.
 */

use serde::{Deserialize, Serialize};

/// NPI (National Provider Identifier) - 10 digit unique identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Npi(pub String);

impl Npi {
    /// Create a new NPI, validating format
    pub fn new(npi: String) -> Result<Self, crate::ReferralGuardError> {
        if npi.len() != 10 || !npi.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::ReferralGuardError::invalid_npi(&npi));
        }
        Ok(Npi(npi))
    }

    /// Get the NPI as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Npi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Five-digit ZIP code, zero-padded
///
/// Raw postal codes arrive as 5-digit ZIPs, 9-digit ZIP+4 values, or short
/// numeric strings with leading zeros stripped by spreadsheet round-trips.
/// Normalization keeps the first five characters and left-pads shorter
/// all-numeric values with zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZipCode(pub String);

impl ZipCode {
    /// Normalize a raw postal code value into a 5-character ZIP
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut zip: String = trimmed.chars().take(5).collect();
        if zip.len() < 5 && zip.chars().all(|c| c.is_ascii_digit()) {
            zip = format!("{:0>5}", zip);
        }
        ZipCode(zip)
    }

    /// Get the ZIP as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two characters of the ZIP, the coarse geographic region
    pub fn region(&self) -> &str {
        match self.0.char_indices().nth(2) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ZipCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical billing claim after normalization
///
/// One row of the Medicare utilization file reduced to the stable field set
/// the aggregator consumes. An unparseable provider identifier is kept as an
/// empty string rather than dropping the row, so the revenue still counts
/// under an "unknown provider" bucket in its market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalClaim {
    /// Rendering provider NPI; empty when the source value failed validation
    pub npi: String,
    /// Provider display name ("Last, First" or organization name)
    pub provider_name: String,
    pub zip_code: ZipCode,
    pub specialty: String,
    /// Count of billed services
    pub services: f64,
    /// Average submitted charge per service
    pub avg_charge: f64,
    /// services x avg_charge; 0.0 when either component was missing
    pub revenue: f64,
}

/// One row per (zip code, specialty, provider NPI)
///
/// Created by the aggregator, enriched by the concentration analyzer, and
/// superseded (never mutated) by the next pipeline run. Field names on the
/// wire match what the dashboard already consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMarketRecord {
    pub zip_code: ZipCode,
    pub specialty: String,
    pub provider_name: String,
    #[serde(rename = "providerNPI")]
    pub provider_npi: String,
    pub provider_revenue: f64,
    pub provider_services: f64,
    /// providerRevenue / totalMarketRevenue * 100; 0 for zero-revenue markets
    pub market_share_percentage: f64,
    /// Distinct providers in this (zip, specialty) market
    pub provider_count: usize,
    pub total_market_revenue: f64,
    /// Dense rank of share descending within the market; 1 = leader
    #[serde(default)]
    pub market_position: u32,
    /// Leader share minus this provider's share; 0 for the leader
    #[serde(default)]
    pub share_gap_to_leader: f64,
    #[serde(default)]
    pub is_dominant: bool,
    #[serde(default)]
    pub is_second_place: bool,
    #[serde(default)]
    pub is_third_place: bool,
}

impl ProviderMarketRecord {
    /// Key identifying the market this record belongs to
    pub fn market_key(&self) -> (ZipCode, String) {
        (self.zip_code.clone(), self.specialty.clone())
    }
}

/// One row of the NPPES endpoint file, reduced to the affiliation fields
/// consumed by the provider-network analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliationRecord {
    pub npi: String,
    pub endpoint: Option<String>,
    pub affiliation_legal_business_name: Option<String>,
}

/// HHI-based market concentration category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcentrationCategory {
    Competitive,
    Moderate,
    Concentrated,
}

impl std::fmt::Display for ConcentrationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcentrationCategory::Competitive => write!(f, "competitive"),
            ConcentrationCategory::Moderate => write!(f, "moderate"),
            ConcentrationCategory::Concentrated => write!(f, "concentrated"),
        }
    }
}

/// One row per (zip code, specialty) market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub zip_code: ZipCode,
    pub specialty: String,
    pub provider_count: usize,
    pub total_market_revenue: f64,
    /// Herfindahl-Hirschman Index, sum of squared shares x 10000, in [0, 10000]
    pub hhi: f64,
    /// 1 - hhi/10000
    pub market_fragmentation: f64,
    pub concentration_category: ConcentrationCategory,
    /// Highest share in the market
    pub leader_share: f64,
    /// Highest-revenue provider; revenue ties go to the earliest-encountered
    #[serde(rename = "topProviderNPI")]
    pub top_provider_npi: String,
    pub top_provider_name: String,
}

/// Boolean risk sub-labels for one provider-market observation
///
/// Each sub-rule is independently derived; the primary label composes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskLabels {
    /// Small share in a fragmented, multi-provider market
    pub competitive: bool,
    /// Trailing position in a concentrated market
    pub concentrated: bool,
    /// Weak position or very small share
    pub positional: bool,
    /// Below-median revenue with a small share (tracked, not composed by default)
    pub revenue: bool,
    /// Composed primary training label
    pub is_high_risk: bool,
}

/// Risk level bands over the 0-100 risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    /// Band a 0-100 risk score
    pub fn from_score(score: f64) -> Self {
        if score > 70.0 {
            RiskLevel::High
        } else if score > 50.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::Low => write!(f, "low"),
        }
    }
}

/// One provider-market observation submitted for scoring
///
/// Market aggregates may be absent; the feature engineer then looks the
/// provider up in the insights snapshot by NPI or (zip, specialty), and
/// falls back to configured defaults when nothing is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringRequest {
    #[serde(rename = "providerNPI", default)]
    pub provider_npi: String,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub market_share: Option<f64>,
    #[serde(default)]
    pub market_position: Option<u32>,
    #[serde(default)]
    pub provider_count: Option<usize>,
    #[serde(default)]
    pub total_market_revenue: Option<f64>,
}

/// Which scorer produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScorerKind {
    GradientBoosting,
    RuleBased,
}

/// Scoring result for one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    #[serde(rename = "providerNPI")]
    pub provider_npi: String,
    pub provider_name: String,
    /// Classifier probability in [0, 1]
    pub risk_probability: f64,
    /// probability x 100, clamped to [0, 100]
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// provider revenue x risk_score / 100
    pub revenue_at_risk: f64,
    pub model_used: ScorerKind,
    /// Set when this entry is a per-item fallback after a scoring failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch-level statistics returned alongside per-item results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_scored: usize,
    pub average_risk_score: f64,
    pub high_risk_count: usize,
    pub total_revenue_at_risk: f64,
}

/// Full batch scoring response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoringResponse {
    pub results: Vec<ScoringResult>,
    pub summary: BatchSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npi_validation() {
        assert!(Npi::new("1234567890".to_string()).is_ok());
        assert!(Npi::new("123".to_string()).is_err());
        assert!(Npi::new("12345678AB".to_string()).is_err());
    }

    #[test]
    fn test_zip_normalization() {
        assert_eq!(ZipCode::normalize("90210").as_str(), "90210");
        assert_eq!(ZipCode::normalize("90210-1234").as_str(), "90210");
        assert_eq!(ZipCode::normalize("902101234").as_str(), "90210");
        assert_eq!(ZipCode::normalize("721").as_str(), "00721");
        assert_eq!(ZipCode::normalize(" 06820 ").as_str(), "06820");
    }

    #[test]
    fn test_zip_region() {
        assert_eq!(ZipCode::normalize("90210").region(), "90");
        assert_eq!(ZipCode::normalize("721").region(), "00");
    }

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_score(85.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
    }
}
