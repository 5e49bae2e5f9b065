// ============================================================
// Layer 3 — Benchmarks and Accuracy Records
// ============================================================
// Each evaluation cycle produces one mean accuracy per
// benchmark. The best value seen so far (and the epoch it was
// seen in) is carried as an explicit value: the evaluation step
// takes the current records and returns updated ones.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The three pair-verification benchmarks evaluated every `test_freq` epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Benchmark {
    Lfw,
    AgeDb30,
    CfpFp,
}

impl Benchmark {
    /// Evaluation order; also the order used in summary lines.
    pub const ALL: [Benchmark; 3] = [Benchmark::Lfw, Benchmark::AgeDb30, Benchmark::CfpFp];

    /// Human readable name used in log lines.
    pub fn display_name(self) -> &'static str {
        match self {
            Benchmark::Lfw     => "LFW",
            Benchmark::AgeDb30 => "AgeDB-30",
            Benchmark::CfpFp   => "CFP-FP",
        }
    }

    /// Short slug used in result file names.
    pub fn slug(self) -> &'static str {
        match self {
            Benchmark::Lfw     => "lfw",
            Benchmark::AgeDb30 => "agedb30",
            Benchmark::CfpFp   => "cfpfp",
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Best mean accuracy (in percent) observed for one benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub best_accuracy: f64,
    pub best_epoch:    usize,
}

impl AccuracyRecord {
    /// Fold in one observation. Only a strictly higher accuracy
    /// replaces the record, so ties keep the earliest epoch.
    pub fn observe(self, epoch: usize, accuracy: f64) -> Self {
        if accuracy > self.best_accuracy {
            Self { best_accuracy: accuracy, best_epoch: epoch }
        } else {
            self
        }
    }
}

/// One record per benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BestAccuracies {
    pub lfw:     AccuracyRecord,
    pub agedb30: AccuracyRecord,
    pub cfp_fp:  AccuracyRecord,
}

impl BestAccuracies {
    pub fn get(&self, benchmark: Benchmark) -> AccuracyRecord {
        match benchmark {
            Benchmark::Lfw     => self.lfw,
            Benchmark::AgeDb30 => self.agedb30,
            Benchmark::CfpFp   => self.cfp_fp,
        }
    }

    pub fn observe(mut self, benchmark: Benchmark, epoch: usize, accuracy: f64) -> Self {
        let slot = match benchmark {
            Benchmark::Lfw     => &mut self.lfw,
            Benchmark::AgeDb30 => &mut self.agedb30,
            Benchmark::CfpFp   => &mut self.cfp_fp,
        };
        *slot = slot.observe(epoch, accuracy);
        self
    }

    /// `LFW: 99.1000 in Epoch: 3, AgeDB-30: ... and CFP-FP: ... in Epoch 4`
    pub fn summary(&self) -> String {
        format!(
            "LFW: {:.4} in Epoch: {}, AgeDB-30: {:.4} in Epoch: {} and CFP-FP: {:.4} in Epoch {}",
            self.lfw.best_accuracy, self.lfw.best_epoch,
            self.agedb30.best_accuracy, self.agedb30.best_epoch,
            self.cfp_fp.best_accuracy, self.cfp_fp.best_epoch,
        )
    }
}

/// Mean of a fold-accuracy distribution, as a fraction. Empty input yields 0.
pub fn mean_accuracy(folds: &[f64]) -> f64 {
    if folds.is_empty() {
        return 0.0;
    }
    folds.iter().sum::<f64>() / folds.len() as f64
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tracks_running_maximum() {
        let observations = [91.0, 95.5, 93.0, 97.25, 96.0];
        let mut record = AccuracyRecord::default();
        for (i, acc) in observations.iter().enumerate() {
            record = record.observe(i + 1, *acc);
            let best = observations[..=i].iter().cloned().fold(f64::MIN, f64::max);
            assert_eq!(record.best_accuracy, best);
        }
        assert_eq!(record.best_epoch, 4);
    }

    #[test]
    fn test_ties_keep_first_occurrence() {
        let record = AccuracyRecord::default()
            .observe(1, 90.0)
            .observe(2, 90.0)
            .observe(3, 89.0);
        assert_eq!(record.best_epoch, 1);
    }

    #[test]
    fn test_benchmarks_are_tracked_independently() {
        let best = BestAccuracies::default()
            .observe(Benchmark::Lfw, 1, 98.0)
            .observe(Benchmark::CfpFp, 1, 80.0)
            .observe(Benchmark::Lfw, 2, 97.0)
            .observe(Benchmark::CfpFp, 2, 85.0);
        assert_eq!(best.get(Benchmark::Lfw).best_epoch, 1);
        assert_eq!(best.get(Benchmark::CfpFp).best_epoch, 2);
        assert_eq!(best.get(Benchmark::AgeDb30), AccuracyRecord::default());
    }

    #[test]
    fn test_mean_accuracy() {
        assert_eq!(mean_accuracy(&[]), 0.0);
        assert!((mean_accuracy(&[0.9, 1.0]) - 0.95).abs() < 1e-12);
    }
}
