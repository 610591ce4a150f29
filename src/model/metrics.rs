/*!
 * Evaluation metrics and the reproducible train/test split
 */

/// Logistic function
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// SplitMix64: tiny deterministic generator for the train/test shuffle
///
/// Seeded explicitly so every training run over the same cohort produces
/// the same split.
pub(crate) struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Fisher-Yates shuffle
    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}

/// Stratified train/test split over boolean labels
///
/// Shuffles positives and negatives separately with the seeded generator,
/// then carves `test_fraction` off each class, so both splits keep the
/// cohort's label balance. Returns (train indexes, test indexes).
pub fn stratified_split(
    labels: &[bool],
    test_fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut positives: Vec<usize> = Vec::new();
    let mut negatives: Vec<usize> = Vec::new();
    for (idx, &label) in labels.iter().enumerate() {
        if label {
            positives.push(idx);
        } else {
            negatives.push(idx);
        }
    }

    let mut rng = SplitMix64::new(seed);
    rng.shuffle(&mut positives);
    rng.shuffle(&mut negatives);

    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for class in [positives, negatives] {
        // Keep at least one sample of each class in training
        let mut test_count = (class.len() as f64 * test_fraction).round() as usize;
        if test_count >= class.len() && !class.is_empty() {
            test_count = class.len() - 1;
        }
        test.extend_from_slice(&class[..test_count]);
        train.extend_from_slice(&class[test_count..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Area under the ROC curve via the rank-sum formulation, tie-aware
///
/// Returns 0.5 when either class is absent (the curve is undefined).
pub fn roc_auc_score(labels: &[bool], scores: &[f64]) -> f64 {
    debug_assert_eq!(labels.len(), scores.len());

    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average ranks across tied score groups
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = average_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels.iter()
        .zip(ranks.iter())
        .filter(|(&label, _)| label)
        .map(|(_, &rank)| rank)
        .sum();

    let p = positives as f64;
    let n = negatives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)
}

/// Fraction of correct predictions at a 0.5 probability threshold
pub fn accuracy(labels: &[bool], probabilities: &[f64]) -> f64 {
    debug_assert_eq!(labels.len(), probabilities.len());
    if labels.is_empty() {
        return 0.0;
    }

    let correct = labels.iter()
        .zip(probabilities.iter())
        .filter(|(&label, &prob)| (prob > 0.5) == label)
        .count();
    correct as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_separation_auc() {
        let labels = [true, true, false, false];
        let scores = [0.9, 0.8, 0.2, 0.1];
        assert!((roc_auc_score(&labels, &scores) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverted_scores_auc() {
        let labels = [true, true, false, false];
        let scores = [0.1, 0.2, 0.8, 0.9];
        assert!((roc_auc_score(&labels, &scores) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_tied_scores_auc() {
        let labels = [true, false];
        let scores = [0.5, 0.5];
        assert!((roc_auc_score(&labels, &scores) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_auc_is_half() {
        let labels = [true, true];
        let scores = [0.5, 0.7];
        assert_eq!(roc_auc_score(&labels, &scores), 0.5);
    }

    #[test]
    fn test_accuracy() {
        let labels = [true, false, true, false];
        let probabilities = [0.9, 0.1, 0.4, 0.6];
        assert!((accuracy(&labels, &probabilities) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_stratified_split_is_deterministic() {
        let labels: Vec<bool> = (0..100).map(|i| i % 4 == 0).collect();
        let (train_a, test_a) = stratified_split(&labels, 0.2, 42);
        let (train_b, test_b) = stratified_split(&labels, 0.2, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);

        let (train_c, _) = stratified_split(&labels, 0.2, 7);
        assert_ne!(train_a, train_c);
    }

    #[test]
    fn test_stratified_split_preserves_balance() {
        let labels: Vec<bool> = (0..100).map(|i| i % 4 == 0).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42);
        assert_eq!(train.len() + test.len(), 100);
        assert_eq!(test.len(), 20);

        let test_positives = test.iter().filter(|&&i| labels[i]).count();
        assert_eq!(test_positives, 5);
        let train_positives = train.iter().filter(|&&i| labels[i]).count();
        assert_eq!(train_positives, 20);
    }

    #[test]
    fn test_split_keeps_a_training_sample_per_class() {
        let labels = [true, false, false, false];
        let (train, test) = stratified_split(&labels, 0.9, 1);
        assert!(train.iter().any(|&i| labels[i]));
        assert!(train.iter().any(|&i| !labels[i]));
        assert_eq!(train.len() + test.len(), 4);
    }
}
