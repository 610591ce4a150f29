/*!
 * Feature engineering
 *
 * Maps one provider-market observation into the fixed-order numeric vector
 * the classifiers consume. The same code path serves training (full records
 * with ground-truth aggregates) and inference (requests resolved against an
 * injected snapshot lookup, or configured deterministic defaults when the
 * provider is unknown).
 *
 * Numeric safety: every logarithm is ln(x + 1), every division guards its
 * denominator, and any non-finite intermediate is replaced by 0.0 and
 * counted, never handed to the model.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::analytics::{herfindahl_index, MarketAnalysis};
use crate::config::{FallbackDefaults, RiskThresholds};
use crate::data_types::{MarketSummary, ProviderMarketRecord, ScoringRequest, ZipCode};
use crate::normalize::UNKNOWN_PROVIDER;

/// Number of engineered features
pub const FEATURE_COUNT: usize = 18;

/// Canonical feature order, shared identically between training and
/// inference. Any mismatch silently corrupts predictions, so this array is
/// the single source of truth and is snapshotted into every model artifact.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "market_share_log",
    "market_share_squared",
    "position_inverse",
    "is_top_3",
    "hhi_log",
    "is_highly_concentrated",
    "revenue_log",
    "revenue_efficiency",
    "competition_intensity",
    "share_gap_log",
    "specialty_encoded",
    "zip_region_encoded",
    "share_position_interaction",
    "hhi_competition_interaction",
    "composite_risk_score",
    "is_dominant",
    "is_second_place",
    "is_third_place",
];

/// Composite-score blend weights over (share_log, position_inverse, hhi_log,
/// share_gap_log, competition_intensity)
pub const COMPOSITE_WEIGHTS: [f64; 5] = [0.2, 0.3, 0.2, 0.2, 0.1];

/// Fixed-order feature vector
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Reserved encoding for categories never seen at fit time
pub const UNKNOWN_CATEGORY: usize = 0;

/// Stable categorical vocabulary, fit once at training time and persisted
/// inside the model artifact
///
/// Categories are indexed from 1 in sorted order; 0 is the unknown bucket,
/// so encoding an unseen specialty or zip region at inference time is
/// well-defined rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoricalVocabulary {
    specialties: BTreeMap<String, usize>,
    zip_regions: BTreeMap<String, usize>,
}

impl CategoricalVocabulary {
    /// Fit the vocabulary over a training cohort
    pub fn fit(records: &[ProviderMarketRecord]) -> Self {
        let mut specialties: Vec<&str> = records.iter()
            .map(|r| r.specialty.as_str())
            .collect();
        specialties.sort_unstable();
        specialties.dedup();

        let mut zip_regions: Vec<String> = records.iter()
            .map(|r| r.zip_code.region().to_string())
            .collect();
        zip_regions.sort_unstable();
        zip_regions.dedup();

        Self {
            specialties: specialties.into_iter()
                .enumerate()
                .map(|(i, s)| (s.to_string(), i + 1))
                .collect(),
            zip_regions: zip_regions.into_iter()
                .enumerate()
                .map(|(i, s)| (s, i + 1))
                .collect(),
        }
    }

    /// Encode a specialty; unseen values map to the unknown bucket
    pub fn encode_specialty(&self, specialty: &str) -> usize {
        self.specialties.get(specialty).copied().unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Encode a zip region; unseen values map to the unknown bucket
    pub fn encode_zip_region(&self, region: &str) -> usize {
        self.zip_regions.get(region).copied().unwrap_or(UNKNOWN_CATEGORY)
    }

    /// Number of known specialties
    pub fn specialty_count(&self) -> usize {
        self.specialties.len()
    }
}

/// Where an observation's market aggregates came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObservationSource {
    /// Ground-truth aggregates from the current analysis
    Record,
    /// Resolved against a prior insights snapshot
    Lookup,
    /// Configured deterministic defaults
    Fallback,
}

/// A fully resolved provider-market observation, ready for featurization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub provider_npi: String,
    pub provider_name: String,
    pub zip_code: ZipCode,
    pub specialty: String,
    pub revenue: f64,
    pub market_share: f64,
    pub market_position: u32,
    pub provider_count: usize,
    pub total_market_revenue: f64,
    pub hhi: f64,
    pub market_fragmentation: f64,
    pub share_gap_to_leader: f64,
    pub source: ObservationSource,
}

impl MarketObservation {
    /// Build an observation from a training record and its market summary
    pub fn from_record(record: &ProviderMarketRecord, summary: &MarketSummary) -> Self {
        Self {
            provider_npi: record.provider_npi.clone(),
            provider_name: record.provider_name.clone(),
            zip_code: record.zip_code.clone(),
            specialty: record.specialty.clone(),
            revenue: record.provider_revenue,
            market_share: record.market_share_percentage,
            market_position: record.market_position.max(1),
            provider_count: record.provider_count,
            total_market_revenue: record.total_market_revenue,
            hhi: summary.hhi,
            market_fragmentation: summary.market_fragmentation,
            share_gap_to_leader: record.share_gap_to_leader,
            source: ObservationSource::Record,
        }
    }
}

/// Read-only snapshot lookup from a prior analysis run
///
/// Constructed explicitly and injected into the feature engineer, never a
/// module-level singleton, so tests can substitute fixtures.
#[derive(Debug, Clone, Default)]
pub struct MarketLookup {
    by_npi: HashMap<String, MarketObservation>,
    by_market: HashMap<(String, String), MarketObservation>,
}

impl MarketLookup {
    /// An empty lookup (training, or serving before any analysis exists)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a lookup from a full market analysis
    pub fn from_analysis(analysis: &MarketAnalysis) -> Self {
        let observations: Vec<MarketObservation> = analysis.records.iter()
            .map(|record| {
                let summary = analysis.summary_for_record(record)
                    .expect("every analyzed record has a market summary");
                let mut obs = MarketObservation::from_record(record, summary);
                obs.source = ObservationSource::Lookup;
                obs
            })
            .collect();
        Self::from_observations(observations)
    }

    /// Build a lookup from persisted provider-market records
    ///
    /// The insights file truncates each market to its retained rows, so HHI
    /// and share gaps recomputed here are approximations over what survived
    /// persistence. Acceptable for serving; training always uses the full
    /// analysis.
    pub fn from_records(records: &[ProviderMarketRecord]) -> Self {
        let mut groups: HashMap<(String, String), Vec<&ProviderMarketRecord>> = HashMap::new();
        for record in records {
            groups.entry((record.zip_code.0.clone(), record.specialty.clone()))
                .or_default()
                .push(record);
        }

        let mut observations = Vec::with_capacity(records.len());
        for group in groups.values() {
            let shares: Vec<f64> = group.iter().map(|r| r.market_share_percentage).collect();
            let hhi = herfindahl_index(&shares);
            let fragmentation = 1.0 - hhi / 10_000.0;
            let leader_share = shares.iter().cloned().fold(0.0, f64::max);

            for record in group {
                observations.push(MarketObservation {
                    provider_npi: record.provider_npi.clone(),
                    provider_name: record.provider_name.clone(),
                    zip_code: record.zip_code.clone(),
                    specialty: record.specialty.clone(),
                    revenue: record.provider_revenue,
                    market_share: record.market_share_percentage,
                    market_position: record.market_position.max(1),
                    provider_count: record.provider_count,
                    total_market_revenue: record.total_market_revenue,
                    hhi,
                    market_fragmentation: fragmentation,
                    share_gap_to_leader: leader_share - record.market_share_percentage,
                    source: ObservationSource::Lookup,
                });
            }
        }

        Self::from_observations(observations)
    }

    fn from_observations(observations: Vec<MarketObservation>) -> Self {
        let mut by_npi: HashMap<String, MarketObservation> = HashMap::new();
        let mut by_market: HashMap<(String, String), MarketObservation> = HashMap::new();

        for obs in observations {
            if !obs.provider_npi.is_empty() {
                // A provider billing in several markets keeps its
                // highest-revenue observation
                let replace = by_npi.get(&obs.provider_npi)
                    .map_or(true, |existing| existing.revenue < obs.revenue);
                if replace {
                    by_npi.insert(obs.provider_npi.clone(), obs.clone());
                }
            }

            // A market keys to its leading-share observation
            let key = (obs.zip_code.0.clone(), obs.specialty.clone());
            let replace = by_market.get(&key)
                .map_or(true, |existing| existing.market_share < obs.market_share);
            if replace {
                by_market.insert(key, obs);
            }
        }

        Self { by_npi, by_market }
    }

    /// Look an observation up by NPI
    pub fn get_by_npi(&self, npi: &str) -> Option<&MarketObservation> {
        self.by_npi.get(npi)
    }

    /// Look an observation up by (zip, specialty)
    pub fn get_by_market(&self, zip_code: &str, specialty: &str) -> Option<&MarketObservation> {
        self.by_market.get(&(zip_code.to_string(), specialty.to_string()))
    }

    /// Number of providers indexed by NPI
    pub fn provider_count(&self) -> usize {
        self.by_npi.len()
    }
}

/// Feature engineer: observation -> fixed-order vector
pub struct FeatureEngineer {
    vocabulary: CategoricalVocabulary,
    lookup: MarketLookup,
    fallback: FallbackDefaults,
    risk: RiskThresholds,
    substitutions: AtomicUsize,
}

impl FeatureEngineer {
    /// Create a feature engineer
    pub fn new(
        vocabulary: CategoricalVocabulary,
        lookup: MarketLookup,
        fallback: FallbackDefaults,
        risk: RiskThresholds,
    ) -> Self {
        Self {
            vocabulary,
            lookup,
            fallback,
            risk,
            substitutions: AtomicUsize::new(0),
        }
    }

    /// The vocabulary in use
    pub fn vocabulary(&self) -> &CategoricalVocabulary {
        &self.vocabulary
    }

    /// How many non-finite values were substituted so far
    pub fn substitution_count(&self) -> usize {
        self.substitutions.load(Ordering::Relaxed)
    }

    /// Featurize a training record with its ground-truth market summary
    pub fn engineer_record(
        &self,
        record: &ProviderMarketRecord,
        summary: &MarketSummary,
    ) -> FeatureVector {
        self.engineer_observation(&MarketObservation::from_record(record, summary))
    }

    /// Resolve a scoring request into an observation
    ///
    /// Resolution order: NPI lookup, then (zip, specialty) lookup, then the
    /// configured deterministic defaults. Explicit fields on the request
    /// override whatever the snapshot carries.
    pub fn resolve_request(&self, request: &ScoringRequest) -> MarketObservation {
        let mut obs = self.lookup.get_by_npi(&request.provider_npi)
            .cloned()
            .or_else(|| {
                match (request.zip_code.as_deref(), request.specialty.as_deref()) {
                    (Some(zip), Some(specialty)) => {
                        let zip = ZipCode::normalize(zip);
                        self.lookup.get_by_market(zip.as_str(), specialty).cloned()
                    }
                    _ => None,
                }
            })
            .unwrap_or_else(|| MarketObservation {
                provider_npi: request.provider_npi.clone(),
                provider_name: request.provider_name.clone()
                    .unwrap_or_else(|| UNKNOWN_PROVIDER.to_string()),
                zip_code: ZipCode::normalize(request.zip_code.as_deref().unwrap_or("00000")),
                specialty: request.specialty.clone().unwrap_or_else(|| "Unknown".to_string()),
                revenue: self.fallback.revenue,
                market_share: self.fallback.market_share,
                market_position: self.fallback.market_position.max(1),
                provider_count: self.fallback.provider_count,
                total_market_revenue: self.fallback.total_market_revenue,
                hhi: self.fallback.hhi,
                market_fragmentation: 1.0 - self.fallback.hhi / 10_000.0,
                share_gap_to_leader: self.fallback.share_gap_to_leader,
                source: ObservationSource::Fallback,
            });

        // The request's own NPI and display name always win
        if !request.provider_npi.is_empty() {
            obs.provider_npi = request.provider_npi.clone();
        }
        if let Some(name) = &request.provider_name {
            obs.provider_name = name.clone();
        }
        if let Some(revenue) = request.revenue {
            obs.revenue = revenue;
        }
        if let Some(share) = request.market_share {
            obs.market_share = share;
        }
        if let Some(position) = request.market_position {
            obs.market_position = position.max(1);
        }
        if let Some(count) = request.provider_count {
            obs.provider_count = count;
        }
        if let Some(total) = request.total_market_revenue {
            obs.total_market_revenue = total;
        }

        obs
    }

    /// Featurize a resolved observation
    pub fn engineer_observation(&self, obs: &MarketObservation) -> FeatureVector {
        let share = obs.market_share;
        let position = obs.market_position.max(1) as f64;
        let count = obs.provider_count as f64;

        let share_log = self.sanitize((share + 1.0).ln());
        let share_squared = self.sanitize(share * share);
        let position_inverse = self.sanitize(1.0 / position);
        let is_top_3 = if obs.market_position <= 3 { 1.0 } else { 0.0 };
        let hhi_log = self.sanitize((obs.hhi + 1.0).ln());
        let is_highly_concentrated = if obs.hhi > self.risk.concentrated_min_hhi { 1.0 } else { 0.0 };
        let revenue_log = self.sanitize((obs.revenue + 1.0).ln());
        let revenue_efficiency = if obs.total_market_revenue > 0.0 {
            self.sanitize(obs.revenue / obs.total_market_revenue)
        } else {
            0.0
        };
        let competition_intensity = self.sanitize(count * obs.market_fragmentation);
        let share_gap_log = self.sanitize((obs.share_gap_to_leader + 1.0).ln());
        let specialty_encoded = self.vocabulary.encode_specialty(&obs.specialty) as f64;
        let zip_region_encoded = self.vocabulary.encode_zip_region(obs.zip_code.region()) as f64;
        let share_position_interaction = self.sanitize(share * position_inverse);
        let hhi_competition_interaction = self.sanitize(obs.hhi * count);
        let composite_risk_score = self.sanitize(
            share_log * COMPOSITE_WEIGHTS[0]
                + position_inverse * COMPOSITE_WEIGHTS[1]
                + hhi_log * COMPOSITE_WEIGHTS[2]
                + share_gap_log * COMPOSITE_WEIGHTS[3]
                + competition_intensity * COMPOSITE_WEIGHTS[4],
        );
        let is_dominant = if share > self.risk.dominant_share { 1.0 } else { 0.0 };
        let is_second_place = if obs.market_position == 2 { 1.0 } else { 0.0 };
        let is_third_place = if obs.market_position == 3 { 1.0 } else { 0.0 };

        [
            share_log,
            share_squared,
            position_inverse,
            is_top_3,
            hhi_log,
            is_highly_concentrated,
            revenue_log,
            revenue_efficiency,
            competition_intensity,
            share_gap_log,
            specialty_encoded,
            zip_region_encoded,
            share_position_interaction,
            hhi_competition_interaction,
            composite_risk_score,
            is_dominant,
            is_second_place,
            is_third_place,
        ]
    }

    /// Replace a non-finite value with 0.0 and count the substitution
    fn sanitize(&self, value: f64) -> f64 {
        if value.is_finite() {
            value
        } else {
            self.substitutions.fetch_add(1, Ordering::Relaxed);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::ConcentrationAnalyzer;
    use crate::data_types::CanonicalClaim;
    use crate::market::aggregate_claims;

    fn analysis() -> MarketAnalysis {
        let claims: Vec<CanonicalClaim> = [
            ("1111111111", "90210", "Cardiology", 80.0),
            ("2222222222", "90210", "Cardiology", 15.0),
            ("3333333333", "90210", "Cardiology", 5.0),
            ("4444444444", "10001", "Oncology", 100.0),
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

    fn engineer(analysis: &MarketAnalysis) -> FeatureEngineer {
        FeatureEngineer::new(
            CategoricalVocabulary::fit(&analysis.records),
            MarketLookup::from_analysis(analysis),
            FallbackDefaults::default(),
            RiskThresholds::default(),
        )
    }

    #[test]
    fn test_feature_names_match_vector_length() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_engineering_is_deterministic() {
        let analysis = analysis();
        let engineer = engineer(&analysis);
        let record = &analysis.records[0];
        let summary = analysis.summary_for_record(record).unwrap();

        let first = engineer.engineer_record(record, summary);
        let second = engineer.engineer_record(record, summary);
        assert_eq!(first, second);
    }

    #[test]
    fn test_features_are_finite_for_zero_inputs() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let obs = MarketObservation {
            provider_npi: String::new(),
            provider_name: UNKNOWN_PROVIDER.to_string(),
            zip_code: ZipCode::normalize("00000"),
            specialty: "Unknown".to_string(),
            revenue: 0.0,
            market_share: 0.0,
            market_position: 1,
            provider_count: 0,
            total_market_revenue: 0.0,
            hhi: 0.0,
            market_fragmentation: 0.0,
            share_gap_to_leader: 0.0,
            source: ObservationSource::Record,
        };

        let features = engineer.engineer_observation(&obs);
        assert!(features.iter().all(|f| f.is_finite()));
    }

    #[test]
    fn test_known_feature_values() {
        let analysis = analysis();
        let engineer = engineer(&analysis);
        let record = &analysis.records[0]; // 80% share, position 1
        let summary = analysis.summary_for_record(record).unwrap();
        let features = engineer.engineer_record(record, summary);

        assert!((features[0] - 81.0_f64.ln()).abs() < 1e-9);
        assert!((features[1] - 6400.0).abs() < 1e-6);
        assert!((features[2] - 1.0).abs() < 1e-9);
        assert_eq!(features[3], 1.0); // top 3
        assert_eq!(features[5], 1.0); // hhi 6650 > 2500
        assert_eq!(features[15], 1.0); // dominant
        assert_eq!(features[16], 0.0);
        assert_eq!(features[17], 0.0);
    }

    #[test]
    fn test_unseen_categories_encode_to_unknown_bucket() {
        let analysis = analysis();
        let vocab = CategoricalVocabulary::fit(&analysis.records);
        assert_eq!(vocab.encode_specialty("Dermatology"), UNKNOWN_CATEGORY);
        assert_eq!(vocab.encode_zip_region("99"), UNKNOWN_CATEGORY);
        assert!(vocab.encode_specialty("Cardiology") > 0);
        assert!(vocab.encode_zip_region("90") > 0);
    }

    #[test]
    fn test_vocabulary_is_stable_across_fits() {
        let analysis = analysis();
        let first = CategoricalVocabulary::fit(&analysis.records);
        let mut reversed = analysis.records.clone();
        reversed.reverse();
        let second = CategoricalVocabulary::fit(&reversed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_request_resolution_by_npi() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let request = ScoringRequest {
            provider_npi: "2222222222".to_string(),
            provider_name: None,
            zip_code: None,
            specialty: None,
            revenue: None,
            market_share: None,
            market_position: None,
            provider_count: None,
            total_market_revenue: None,
        };

        let obs = engineer.resolve_request(&request);
        assert_eq!(obs.source, ObservationSource::Lookup);
        assert!((obs.market_share - 15.0).abs() < 1e-9);
        assert_eq!(obs.market_position, 2);
    }

    #[test]
    fn test_request_resolution_by_market_falls_back_to_leader() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let request = ScoringRequest {
            provider_npi: "9999999999".to_string(),
            provider_name: None,
            zip_code: Some("90210".to_string()),
            specialty: Some("Cardiology".to_string()),
            revenue: None,
            market_share: None,
            market_position: None,
            provider_count: None,
            total_market_revenue: None,
        };

        let obs = engineer.resolve_request(&request);
        assert_eq!(obs.source, ObservationSource::Lookup);
        assert!((obs.market_share - 80.0).abs() < 1e-9);
        assert_eq!(obs.provider_npi, "9999999999");
    }

    #[test]
    fn test_unresolvable_request_uses_deterministic_defaults() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let request = ScoringRequest {
            provider_npi: "9999999999".to_string(),
            provider_name: None,
            zip_code: None,
            specialty: Some("Dermatology".to_string()),
            revenue: None,
            market_share: None,
            market_position: None,
            provider_count: None,
            total_market_revenue: None,
        };

        let first = engineer.resolve_request(&request);
        let second = engineer.resolve_request(&request);
        assert_eq!(first.source, ObservationSource::Fallback);
        assert_eq!(first, second);
        assert_eq!(first.market_share, FallbackDefaults::default().market_share);
    }

    #[test]
    fn test_request_overrides_take_precedence() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let request = ScoringRequest {
            provider_npi: "2222222222".to_string(),
            provider_name: None,
            zip_code: None,
            specialty: None,
            revenue: Some(1234.0),
            market_share: Some(33.0),
            market_position: Some(4),
            provider_count: None,
            total_market_revenue: None,
        };

        let obs = engineer.resolve_request(&request);
        assert_eq!(obs.revenue, 1234.0);
        assert_eq!(obs.market_share, 33.0);
        assert_eq!(obs.market_position, 4);
        // Untouched fields still come from the snapshot
        assert_eq!(obs.provider_count, 3);
    }

    #[test]
    fn test_lookup_from_records_approximates_hhi() {
        let analysis = analysis();
        let lookup = MarketLookup::from_records(&analysis.records);
        let obs = lookup.get_by_npi("1111111111").unwrap();
        assert!((obs.hhi - 6650.0).abs() < 1e-6);
        assert!((obs.share_gap_to_leader - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_substitution_counter() {
        let analysis = analysis();
        let engineer = engineer(&analysis);

        let mut obs = MarketObservation {
            provider_npi: String::new(),
            provider_name: UNKNOWN_PROVIDER.to_string(),
            zip_code: ZipCode::normalize("00000"),
            specialty: "Unknown".to_string(),
            revenue: f64::INFINITY,
            market_share: 0.0,
            market_position: 1,
            provider_count: 1,
            total_market_revenue: 1.0,
            hhi: 0.0,
            market_fragmentation: 0.0,
            share_gap_to_leader: 0.0,
            source: ObservationSource::Record,
        };
        obs.revenue = f64::NAN;

        assert_eq!(engineer.substitution_count(), 0);
        let features = engineer.engineer_observation(&obs);
        assert!(features.iter().all(|f| f.is_finite()));
        assert!(engineer.substitution_count() > 0);
    }
}
