// ============================================================
// Layer 5 — 10-Fold Verification Accuracy
// ============================================================
// Standard face-verification protocol over a pair list split
// into 10 folds. For each fold i:
//
//   1. μ = mean feature over both sides of all pairs NOT in fold i
//   2. subtract μ, L2-normalise, score = cosine(left, right)
//   3. pick the threshold t ∈ {k / 10000 : k = -10000..=10000}
//      with the best accuracy on the other nine folds
//      (several maxima → their mean)
//   4. accuracy on fold i = (#same with score > t + #diff with score < t) / #pairs
//
// Counting is done on sorted score arrays with binary search,
// so sweeping all 20001 thresholds stays cheap.
//
// Reference: Huang et al. (2007) Labeled Faces in the Wild

use anyhow::{bail, Result};

use crate::data::pairs::FOLDS;
use crate::infra::results::PairFeatures;

pub const THRESHOLD_STEPS: i32 = 10_000;

fn normalise(mut v: Vec<f64>) -> Vec<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-12);
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

/// Scores of a fold split into same-identity and different-identity pairs, sorted.
struct SortedScores {
    same: Vec<f64>,
    diff: Vec<f64>,
}

impl SortedScores {
    fn new(scores: impl Iterator<Item = (f64, i8)>) -> Self {
        let (mut same, mut diff) = (Vec::new(), Vec::new());
        for (score, flag) in scores {
            if flag == 1 {
                same.push(score);
            } else {
                diff.push(score);
            }
        }
        same.sort_by(f64::total_cmp);
        diff.sort_by(f64::total_cmp);
        Self { same, diff }
    }

    fn len(&self) -> usize {
        self.same.len() + self.diff.len()
    }

    fn correct(&self, threshold: f64) -> usize {
        let same_above = self.same.len() - self.same.partition_point(|s| *s <= threshold);
        let diff_below = self.diff.partition_point(|s| *s < threshold);
        same_above + diff_below
    }

    fn accuracy(&self, threshold: f64) -> f64 {
        if self.len() == 0 {
            return 0.0;
        }
        self.correct(threshold) as f64 / self.len() as f64
    }

    fn best_threshold(&self) -> f64 {
        let mut best = 0;
        let mut ties: Vec<f64> = Vec::new();
        for k in -THRESHOLD_STEPS..=THRESHOLD_STEPS {
            let threshold = k as f64 / THRESHOLD_STEPS as f64;
            let correct = self.correct(threshold);
            if correct > best || ties.is_empty() {
                best = correct;
                ties.clear();
                ties.push(threshold);
            } else if correct == best {
                ties.push(threshold);
            }
        }
        ties.iter().sum::<f64>() / ties.len() as f64
    }
}

fn fold_scores(features: &PairFeatures, fold: usize) -> Vec<f64> {
    let dim = features.left.first().map_or(0, Vec::len);
    let mut mu = vec![0.0f64; dim];
    let mut count = 0usize;
    for i in (0..features.len()).filter(|i| features.fold[*i] != fold) {
        for side in [&features.left[i], &features.right[i]] {
            for (m, x) in mu.iter_mut().zip(side) {
                *m += f64::from(*x);
            }
            count += 1;
        }
    }
    if count > 0 {
        mu.iter_mut().for_each(|m| *m /= count as f64);
    }

    let centred = |v: &[f32]| -> Vec<f64> {
        normalise(v.iter().zip(&mu).map(|(x, m)| f64::from(*x) - m).collect())
    };
    (0..features.len())
        .map(|i| {
            let left = centred(&features.left[i]);
            let right = centred(&features.right[i]);
            left.iter().zip(&right).map(|(a, b)| a * b).sum()
        })
        .collect()
}

/// Per-fold accuracies (fractions in `[0, 1]`), one per fold.
pub fn ten_fold_accuracy(features: &PairFeatures) -> Result<Vec<f64>> {
    if features.is_empty() {
        bail!("no pair features to score");
    }
    if let Some(bad) = features.fold.iter().find(|f| **f >= FOLDS) {
        bail!("fold index {bad} out of range 0..{FOLDS}");
    }
    let dim = features.left[0].len();
    if features.left.iter().chain(&features.right).any(|v| v.len() != dim) {
        bail!("pair features have inconsistent dimensions");
    }

    let mut accuracies = Vec::with_capacity(FOLDS);
    for fold in 0..FOLDS {
        let scores = fold_scores(features, fold);
        let pairs = || scores.iter().copied().zip(features.flag.iter().copied()).zip(&features.fold);

        let val = SortedScores::new(pairs().filter(|(_, f)| **f != fold).map(|(s, _)| s));
        let test = SortedScores::new(pairs().filter(|(_, f)| **f == fold).map(|(s, _)| s));
        if test.len() == 0 {
            bail!("fold {fold} has no pairs");
        }

        let threshold = val.best_threshold();
        accuracies.push(test.accuracy(threshold));
    }
    Ok(accuracies)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    /// Same pairs share a direction, different pairs are orthogonal-ish.
    fn separable(pairs_per_fold: usize) -> PairFeatures {
        let mut features = PairFeatures::default();
        for fold in 0..FOLDS {
            for j in 0..pairs_per_fold {
                let a = (fold * pairs_per_fold + j) % 4;
                let mut left = vec![0.0; 4];
                left[a] = 1.0;
                if j % 2 == 0 {
                    features.push(left.clone(), left, fold, 1);
                } else {
                    let mut right = vec![0.0; 4];
                    right[(a + 2) % 4] = 1.0;
                    features.push(left, right, fold, -1);
                }
            }
        }
        features
    }

    #[test]
    fn test_perfectly_separable_pairs_score_one() {
        let accs = ten_fold_accuracy(&separable(8)).unwrap();
        assert_eq!(accs.len(), FOLDS);
        assert!(accs.iter().all(|a| (*a - 1.0).abs() < 1e-12), "{accs:?}");
    }

    #[test]
    fn test_threshold_is_mean_of_ties() {
        let scores = SortedScores::new([(0.5, 1), (-0.5, -1)].into_iter());
        // every t strictly between -0.5 and 0.5 classifies both correctly
        let t = scores.best_threshold();
        assert!(t.abs() < 1e-9, "{t}");
        assert_eq!(scores.accuracy(t), 1.0);
    }

    #[test]
    fn test_strict_inequalities_at_threshold() {
        let scores = SortedScores::new([(0.2, 1), (0.2, -1)].into_iter());
        assert_eq!(scores.correct(0.2), 0);
        assert_eq!(scores.correct(0.1), 1);
        assert_eq!(scores.correct(0.3), 1);
    }

    #[test]
    fn test_inverted_pairs_score_low() {
        let mut features = separable(8);
        for flag in features.flag.iter_mut() {
            *flag = -*flag;
        }
        let accs = ten_fold_accuracy(&features).unwrap();
        assert!(accs.iter().all(|a| *a <= 0.5 + 1e-12), "{accs:?}");
    }

    #[test]
    fn test_missing_fold_is_an_error() {
        let mut features = PairFeatures::default();
        features.push(vec![1.0], vec![1.0], 0, 1);
        assert!(ten_fold_accuracy(&features).is_err());
        assert!(ten_fold_accuracy(&PairFeatures::default()).is_err());
    }
}
