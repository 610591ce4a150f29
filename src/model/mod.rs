/*!
 * Risk model training and scoring
 *
 * Training fits a gradient-boosted classifier plus a logistic baseline on a
 * stratified, seeded train/test split, evaluates AUC and accuracy on the
 * held-out fraction, and persists everything needed to reproduce scoring:
 * the ensemble, the baseline, the exact feature order, the categorical
 * vocabulary, metrics, and per-feature importances.
 *
 * Scoring degrades gracefully: with no trained artifact the scorer applies
 * a documented rule-based formula, and a malformed batch item yields a
 * marked fallback entry instead of aborting the batch.
 */

pub mod gbdt;
pub mod linear;
pub mod metrics;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, ReferralGuardError};
use crate::analytics::MarketAnalysis;
use crate::config::{FallbackDefaults, ModelConfig, RiskThresholds};
use crate::data_types::{
    BatchScoringResponse, BatchSummary, RiskLevel, ScorerKind, ScoringRequest, ScoringResult,
};
use crate::features::{
    CategoricalVocabulary, FeatureEngineer, MarketLookup, MarketObservation, FEATURE_NAMES,
};
use crate::normalize::UNKNOWN_PROVIDER;
use crate::risk::RiskTargetBuilder;

use gbdt::{GbdtClassifier, GbdtParams};
use linear::LogisticRegression;
use metrics::{accuracy, roc_auc_score, stratified_split};

/// Default artifact name
pub const MODEL_NAME: &str = "market_risk_gbdt";

/// Held-out evaluation metrics for both models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub auc_score: f64,
    pub accuracy: f64,
    pub baseline_auc_score: f64,
    pub baseline_accuracy: f64,
    pub training_samples: usize,
    pub test_samples: usize,
    /// Positive-label fraction of the full cohort
    pub positive_rate: f64,
}

/// A fitted, persistable risk model
///
/// Read-only after training; serving shares one instance across requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    /// Snapshot of the feature order this model was trained with
    pub feature_names: Vec<String>,
    pub vocabulary: CategoricalVocabulary,
    pub classifier: GbdtClassifier,
    pub baseline: LogisticRegression,
    pub metrics: ModelMetrics,
    pub feature_importance: BTreeMap<String, f64>,
}

impl TrainedModel {
    /// Probability of the positive class for one feature row
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        self.classifier.predict_proba(features)
    }

    /// Persist the model as one opaque JSON artifact
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self).map_err(|e| ReferralGuardError::Model {
            message: format!("Failed to serialize model artifact: {}", e),
            suggestion: None,
        })?;
        Ok(())
    }

    /// Load a model artifact, verifying its feature order against the
    /// current engineering contract
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReferralGuardError::model_unavailable(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: TrainedModel =
            serde_json::from_reader(reader).map_err(|e| ReferralGuardError::Model {
                message: format!("Failed to deserialize model artifact: {}", e),
                suggestion: Some(
                    "The artifact may be from an incompatible version; retrain with 'rgcli train'."
                        .to_string(),
                ),
            })?;
        model.verify_feature_order()?;
        Ok(model)
    }

    /// Reject artifacts whose feature order diverges from the engineer's
    ///
    /// A silent mismatch would corrupt every prediction, so this is a hard
    /// error rather than a warning.
    pub fn verify_feature_order(&self) -> Result<()> {
        let expected: Vec<&str> = FEATURE_NAMES.to_vec();
        if self.feature_names.len() != expected.len()
            || self.feature_names.iter().zip(expected.iter()).any(|(a, b)| a != b)
        {
            return Err(ReferralGuardError::Model {
                message: format!(
                    "Model artifact feature order ({} features) does not match the current \
                    feature contract ({} features)",
                    self.feature_names.len(),
                    expected.len(),
                ),
                suggestion: Some("Retrain the model with 'rgcli train'.".to_string()),
            });
        }
        Ok(())
    }
}

/// Trainer over an analyzed market cohort
pub struct RiskModelTrainer<'a> {
    model_config: &'a ModelConfig,
    risk: &'a RiskThresholds,
    fallback: &'a FallbackDefaults,
}

impl<'a> RiskModelTrainer<'a> {
    /// Create a trainer
    pub fn new(
        model_config: &'a ModelConfig,
        risk: &'a RiskThresholds,
        fallback: &'a FallbackDefaults,
    ) -> Self {
        Self { model_config, risk, fallback }
    }

    /// Train both models over the cohort and package the artifact
    pub fn train(&self, analysis: &MarketAnalysis) -> Result<TrainedModel> {
        if analysis.records.is_empty() {
            return Err(ReferralGuardError::model_training(
                "no provider-market records to train on",
            ));
        }

        let labels: Vec<bool> = RiskTargetBuilder::new(self.risk)
            .build(analysis)
            .iter()
            .map(|l| l.is_high_risk)
            .collect();

        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(ReferralGuardError::model_training(format!(
                "risk labels are single-class ({} positive of {}); adjust the risk thresholds \
                or widen the cohort",
                positives,
                labels.len(),
            )));
        }

        let vocabulary = CategoricalVocabulary::fit(&analysis.records);
        let engineer = FeatureEngineer::new(
            vocabulary.clone(),
            MarketLookup::empty(),
            self.fallback.clone(),
            self.risk.clone(),
        );

        let rows: Vec<Vec<f64>> = analysis.records.iter()
            .map(|record| {
                let summary = analysis.summary_for_record(record)
                    .expect("every analyzed record has a market summary");
                engineer.engineer_record(record, summary).to_vec()
            })
            .collect();

        let (train_idx, test_idx) = stratified_split(
            &labels,
            self.model_config.test_fraction,
            self.model_config.seed,
        );

        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
        let train_labels: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();

        let params = GbdtParams {
            n_rounds: self.model_config.n_rounds,
            max_depth: self.model_config.max_depth,
            learning_rate: self.model_config.learning_rate,
            lambda: self.model_config.lambda,
            min_samples_leaf: self.model_config.min_samples_leaf,
        };

        println!(
            "Training on {} samples ({} held out, {} features)",
            train_rows.len(),
            test_idx.len(),
            FEATURE_NAMES.len()
        );

        let classifier = GbdtClassifier::fit(&train_rows, &train_labels, params)?;
        let baseline = LogisticRegression::fit(
            &train_rows,
            &train_labels,
            self.model_config.baseline_iterations,
            self.model_config.baseline_learning_rate,
        )?;

        // Tiny cohorts can leave the held-out split empty; fall back to the
        // training rows so the metrics are at least defined
        let (eval_idx, eval_on_train) = if test_idx.is_empty() {
            (&train_idx, true)
        } else {
            (&test_idx, false)
        };
        if eval_on_train {
            eprintln!("Warning: held-out split is empty; metrics computed on training data");
        }

        let eval_labels: Vec<bool> = eval_idx.iter().map(|&i| labels[i]).collect();
        let eval_probs: Vec<f64> = eval_idx.iter()
            .map(|&i| classifier.predict_proba(&rows[i]))
            .collect();
        let baseline_probs: Vec<f64> = eval_idx.iter()
            .map(|&i| baseline.predict_proba(&rows[i]))
            .collect();

        let model_metrics = ModelMetrics {
            auc_score: roc_auc_score(&eval_labels, &eval_probs),
            accuracy: accuracy(&eval_labels, &eval_probs),
            baseline_auc_score: roc_auc_score(&eval_labels, &baseline_probs),
            baseline_accuracy: accuracy(&eval_labels, &baseline_probs),
            training_samples: train_idx.len(),
            test_samples: test_idx.len(),
            positive_rate: positives as f64 / labels.len() as f64,
        };

        println!(
            "Gradient boosting: AUC {:.4}, accuracy {:.4} | baseline: AUC {:.4}, accuracy {:.4}",
            model_metrics.auc_score,
            model_metrics.accuracy,
            model_metrics.baseline_auc_score,
            model_metrics.baseline_accuracy,
        );

        let feature_importance: BTreeMap<String, f64> = FEATURE_NAMES.iter()
            .zip(classifier.feature_importances())
            .map(|(name, weight)| (name.to_string(), weight))
            .collect();

        Ok(TrainedModel {
            model_name: MODEL_NAME.to_string(),
            created_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            vocabulary,
            classifier,
            baseline,
            metrics: model_metrics,
            feature_importance,
        })
    }
}

/// Shared, read-only scorer for serving
///
/// Holds the trained model (when one exists) and the feature engineer with
/// its snapshot lookup. Loaded once at process start; scoring never mutates
/// it, so concurrent use needs no locking.
pub struct RiskScorer {
    model: Option<TrainedModel>,
    engineer: FeatureEngineer,
}

impl RiskScorer {
    /// Create a scorer, validating the artifact's feature order when a
    /// model is supplied
    pub fn new(
        model: Option<TrainedModel>,
        lookup: MarketLookup,
        fallback: FallbackDefaults,
        risk: RiskThresholds,
    ) -> Result<Self> {
        let vocabulary = match &model {
            Some(model) => {
                model.verify_feature_order()?;
                model.vocabulary.clone()
            }
            None => CategoricalVocabulary::default(),
        };

        Ok(Self {
            model,
            engineer: FeatureEngineer::new(vocabulary, lookup, fallback, risk),
        })
    }

    /// Which scorer requests will go through
    pub fn scorer_kind(&self) -> ScorerKind {
        if self.model.is_some() {
            ScorerKind::GradientBoosting
        } else {
            ScorerKind::RuleBased
        }
    }

    /// Metrics of the loaded model, if any
    pub fn model_metrics(&self) -> Option<&ModelMetrics> {
        self.model.as_ref().map(|m| &m.metrics)
    }

    /// How many non-finite feature substitutions scoring has made
    pub fn substitution_count(&self) -> usize {
        self.engineer.substitution_count()
    }

    /// Score one observation
    ///
    /// Never fails: a malformed request produces a neutral fallback entry
    /// carrying the error message.
    pub fn score_request(&self, request: &ScoringRequest) -> ScoringResult {
        if let Err(message) = validate_request(request) {
            return self.fallback_result(request, message);
        }

        let observation = self.engineer.resolve_request(request);
        let probability = match &self.model {
            Some(model) => {
                let features = self.engineer.engineer_observation(&observation);
                model.predict_proba(&features)
            }
            None => rule_based_score(&observation) / 100.0,
        };

        let risk_score = (probability * 100.0).clamp(0.0, 100.0);
        ScoringResult {
            provider_npi: observation.provider_npi.clone(),
            provider_name: observation.provider_name.clone(),
            risk_probability: probability,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            revenue_at_risk: observation.revenue * risk_score / 100.0,
            model_used: self.scorer_kind(),
            error: None,
        }
    }

    /// Score a batch, isolating per-item failures, and summarize it
    pub fn score_batch(&self, requests: &[ScoringRequest]) -> BatchScoringResponse {
        #[cfg(feature = "parallel")]
        let results: Vec<ScoringResult> = {
            use rayon::prelude::*;
            requests.par_iter().map(|request| self.score_request(request)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<ScoringResult> = requests.iter()
            .map(|request| self.score_request(request))
            .collect();

        let total_scored = results.len();
        let average_risk_score = if total_scored > 0 {
            results.iter().map(|r| r.risk_score).sum::<f64>() / total_scored as f64
        } else {
            0.0
        };
        let high_risk_count = results.iter()
            .filter(|r| r.risk_level == RiskLevel::High)
            .count();
        let total_revenue_at_risk = results.iter().map(|r| r.revenue_at_risk).sum();

        BatchScoringResponse {
            results,
            summary: BatchSummary {
                total_scored,
                average_risk_score,
                high_risk_count,
                total_revenue_at_risk,
            },
        }
    }

    /// Neutral mid-band entry for a request that failed validation
    fn fallback_result(&self, request: &ScoringRequest, message: String) -> ScoringResult {
        let revenue = request.revenue.filter(|r| r.is_finite() && *r >= 0.0).unwrap_or(0.0);
        ScoringResult {
            provider_npi: request.provider_npi.clone(),
            provider_name: request.provider_name.clone()
                .unwrap_or_else(|| UNKNOWN_PROVIDER.to_string()),
            risk_probability: 0.5,
            risk_score: 50.0,
            risk_level: RiskLevel::from_score(50.0),
            revenue_at_risk: revenue * 0.5,
            model_used: self.scorer_kind(),
            error: Some(message),
        }
    }
}

/// Rule-based score in [0, 100] for serving without a trained model
///
/// Small shares and trailing positions raise the score:
/// `(100 - share) * 0.4 + 25 * [position > 2] + 20 / (share + 1)`,
/// clamped to [0, 100].
pub fn rule_based_score(observation: &MarketObservation) -> f64 {
    let share = observation.market_share.max(0.0);
    let mut score = (100.0 - share) * 0.4;
    if observation.market_position > 2 {
        score += 25.0;
    }
    score += 20.0 / (share + 1.0);
    score.clamp(0.0, 100.0)
}

/// Reject requests whose numeric fields cannot be scored meaningfully
fn validate_request(request: &ScoringRequest) -> std::result::Result<(), String> {
    let checks = [
        ("revenue", request.revenue),
        ("marketShare", request.market_share),
        ("totalMarketRevenue", request.total_market_revenue),
    ];
    for (name, value) in checks {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(format!("field '{}' is not a finite number", name));
            }
            if value < 0.0 {
                return Err(format!("field '{}' is negative", name));
            }
        }
    }
    if let Some(share) = request.market_share {
        if share > 100.0 {
            return Err("field 'marketShare' exceeds 100 percent".to_string());
        }
    }
    if request.provider_npi.is_empty()
        && request.zip_code.is_none()
        && request.specialty.is_none()
        && request.market_share.is_none()
    {
        return Err("request carries no identifying or market fields".to_string());
    }
    Ok(())
}
