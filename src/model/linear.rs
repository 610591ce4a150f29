/*!
 * Logistic-regression baseline
 *
 * Interpretable companion model trained on the same split as the boosted
 * ensemble. Its standardized coefficient magnitudes serve as a sanity
 * check on the ensemble's feature importances.
 */

use serde::{Deserialize, Serialize};

use crate::{Result, ReferralGuardError};
use super::metrics::sigmoid;

/// L2 strength for the baseline; small, just enough to keep weights bounded
/// on separable cohorts
const RIDGE: f64 = 1e-3;

/// Logistic regression over standardized features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    weights: Vec<f64>,
    bias: f64,
    /// Per-feature standardization parameters captured at fit time
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl LogisticRegression {
    /// Fit with full-batch gradient descent
    pub fn fit(
        rows: &[Vec<f64>],
        labels: &[bool],
        iterations: usize,
        learning_rate: f64,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(ReferralGuardError::model_training(
                "cannot fit the baseline on an empty feature matrix",
            ));
        }
        if rows.len() != labels.len() {
            return Err(ReferralGuardError::model_training(format!(
                "feature matrix has {} rows but {} labels",
                rows.len(),
                labels.len(),
            )));
        }

        let n = rows.len();
        let n_features = rows[0].len();

        let mut means = vec![0.0; n_features];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row.iter()) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= n as f64;
        }

        let mut stds = vec![0.0; n_features];
        for row in rows {
            for ((std, value), mean) in stds.iter_mut().zip(row.iter()).zip(means.iter()) {
                let centered = value - mean;
                *std += centered * centered;
            }
        }
        for std in &mut stds {
            *std = (*std / n as f64).sqrt();
            // Constant features standardize to zero, not infinity
            if *std < 1e-12 {
                *std = 1.0;
            }
        }

        let standardized: Vec<Vec<f64>> = rows.iter()
            .map(|row| {
                row.iter()
                    .zip(means.iter())
                    .zip(stds.iter())
                    .map(|((value, mean), std)| (value - mean) / std)
                    .collect()
            })
            .collect();

        let targets: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();

        let mut weights = vec![0.0; n_features];
        let mut bias = 0.0;

        for _ in 0..iterations {
            let mut weight_grads = vec![0.0; n_features];
            let mut bias_grad = 0.0;

            for (row, &target) in standardized.iter().zip(targets.iter()) {
                let margin: f64 = bias
                    + weights.iter().zip(row.iter()).map(|(w, x)| w * x).sum::<f64>();
                let residual = sigmoid(margin) - target;
                for (grad, x) in weight_grads.iter_mut().zip(row.iter()) {
                    *grad += residual * x;
                }
                bias_grad += residual;
            }

            let scale = learning_rate / n as f64;
            for (weight, grad) in weights.iter_mut().zip(weight_grads.iter()) {
                *weight -= scale * (grad + RIDGE * *weight);
            }
            bias -= scale * bias_grad;
        }

        Ok(Self { weights, bias, means, stds })
    }

    /// Probability of the positive class for one feature row
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let margin: f64 = self.bias
            + self.weights.iter()
                .zip(features.iter())
                .zip(self.means.iter())
                .zip(self.stds.iter())
                .map(|(((w, x), mean), std)| w * (x - mean) / std)
                .sum::<f64>();
        sigmoid(margin)
    }

    /// Absolute standardized coefficients, for importance comparison
    pub fn coefficient_magnitudes(&self) -> Vec<f64> {
        self.weights.iter().map(|w| w.abs()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable_dataset() -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let x0 = i as f64 * 0.25;
            let x1 = 1.0; // constant
            rows.push(vec![x0, x1]);
            labels.push(x0 > 5.0);
        }
        (rows, labels)
    }

    #[test]
    fn test_fit_separable_data() {
        let (rows, labels) = separable_dataset();
        let model = LogisticRegression::fit(&rows, &labels, 500, 0.5).unwrap();

        let mut correct = 0;
        for (row, &label) in rows.iter().zip(labels.iter()) {
            if (model.predict_proba(row) > 0.5) == label {
                correct += 1;
            }
        }
        assert!(correct >= 38, "only {} of 40 classified correctly", correct);
    }

    #[test]
    fn test_constant_feature_gets_no_weight() {
        let (rows, labels) = separable_dataset();
        let model = LogisticRegression::fit(&rows, &labels, 500, 0.5).unwrap();
        let magnitudes = model.coefficient_magnitudes();
        assert!(magnitudes[0] > magnitudes[1]);
        assert!(magnitudes[1] < 1e-6);
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let (rows, labels) = separable_dataset();
        let model = LogisticRegression::fit(&rows, &labels, 200, 0.5).unwrap();
        for row in &rows {
            let p = model.predict_proba(row);
            assert!(p.is_finite());
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        assert!(LogisticRegression::fit(&[], &[], 10, 0.1).is_err());
    }
}
