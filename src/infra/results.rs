// ============================================================
// Layer 6 — Evaluation Result Files
// ============================================================
// Each evaluation cycle extracts features for every pair of a
// benchmark and writes them to a fixed path:
//
//   <result dir>/cur_epoch_lfw_result.json
//   <result dir>/cur_epoch_agedb30_result.json
//   <result dir>/cur_epoch_cfpfp_result.json
//
// The file is overwritten every cycle and read straight back by
// the 10-fold accuracy routine, so it always reflects the most
// recently evaluated epoch.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::accuracy::Benchmark;

/// Features of both sides of every pair, with fold and same/different flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairFeatures {
    pub left:  Vec<Vec<f32>>,
    pub right: Vec<Vec<f32>>,
    pub fold:  Vec<usize>,
    /// `1` for same identity, `-1` for different identities.
    pub flag:  Vec<i8>,
}

impl PairFeatures {
    pub fn len(&self) -> usize {
        self.fold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fold.is_empty()
    }

    pub fn push(&mut self, left: Vec<f32>, right: Vec<f32>, fold: usize, flag: i8) {
        self.left.push(left);
        self.right.push(right);
        self.fold.push(fold);
        self.flag.push(flag);
    }

    fn check_consistent(&self) -> Result<()> {
        let n = self.fold.len();
        if self.left.len() != n || self.right.len() != n || self.flag.len() != n {
            bail!(
                "pair feature columns disagree: left={} right={} fold={} flag={}",
                self.left.len(), self.right.len(), n, self.flag.len()
            );
        }
        Ok(())
    }
}

pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create result directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, benchmark: Benchmark) -> PathBuf {
        self.dir.join(format!("cur_epoch_{}_result.json", benchmark.slug()))
    }

    pub fn save(&self, benchmark: Benchmark, features: &PairFeatures) -> Result<PathBuf> {
        features.check_consistent()?;
        let path = self.path_for(benchmark);
        let json = serde_json::to_string(features)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write results to '{}'", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<PairFeatures> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read results from '{}'", path.display()))?;
        let features: PairFeatures = serde_json::from_str(&json)
            .with_context(|| format!("Malformed result file '{}'", path.display()))?;
        features.check_consistent()?;
        Ok(features)
    }
}
