// ============================================================
// Layer 4 — Verification Pair Lists
// ============================================================
// Two on-disk formats are understood:
//
//   LFW pairs.txt
//     10 300                      ← header (folds, pairs per half-fold)
//     Abel_Pacheco 1 4            ← same person:  Abel_Pacheco/Abel_Pacheco_0001.jpg
//     Abdel_Madi_Shabneh 1 Dean_Barker 1   ← different people
//
//   Flagged (AgeDB-30, CFP-FP)
//     <left path> <right path> <flag>      ← flag 1 = same, anything else = different
//
// Pairs are split into 10 folds by position: pair i of N is in
// fold i*10/N. Both benchmark files are ordered fold by fold.

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::preprocess;
use crate::domain::accuracy::Benchmark;

pub const FOLDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFormat {
    Lfw,
    Flagged,
}

impl PairFormat {
    pub fn for_benchmark(benchmark: Benchmark) -> Self {
        match benchmark {
            Benchmark::Lfw => PairFormat::Lfw,
            Benchmark::AgeDb30 | Benchmark::CfpFp => PairFormat::Flagged,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacePair {
    pub left:  PathBuf,
    pub right: PathBuf,
    pub fold:  usize,
    /// `1` same identity, `-1` different.
    pub flag:  i8,
}

fn lfw_image(name: &str, index: &str) -> Result<PathBuf> {
    let index: usize = index
        .parse()
        .with_context(|| format!("invalid LFW image index {index:?}"))?;
    Ok(PathBuf::from(name).join(format!("{name}_{index:04}.jpg")))
}

/// Parse a pair list; paths are returned relative to the benchmark root.
pub fn parse_pairs(text: &str, format: PairFormat) -> Result<Vec<FacePair>> {
    let mut raw = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        let parsed = match (format, tokens.as_slice()) {
            // header line
            (PairFormat::Lfw, [_, _]) if raw.is_empty() => continue,
            (PairFormat::Lfw, [name, a, b]) => (lfw_image(name, a)?, lfw_image(name, b)?, 1),
            (PairFormat::Lfw, [n1, a, n2, b]) => (lfw_image(n1, a)?, lfw_image(n2, b)?, -1),
            (PairFormat::Flagged, [left, right, flag]) => {
                let flag: i64 = flag
                    .parse()
                    .with_context(|| format!("line {}: invalid flag {flag:?}", line_no + 1))?;
                (PathBuf::from(left), PathBuf::from(right), if flag == 1 { 1 } else { -1 })
            }
            _ => bail!("line {}: unexpected pair line {line:?}", line_no + 1),
        };
        raw.push(parsed);
    }

    let total = raw.len();
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, (left, right, flag))| FacePair { left, right, fold: i * FOLDS / total, flag })
        .collect())
}

/// One pair, decoded, with mirrored copies of both faces.
#[derive(Debug, Clone)]
pub struct PairSample {
    pub left:          Vec<f32>,
    pub left_flipped:  Vec<f32>,
    pub right:         Vec<f32>,
    pub right_flipped: Vec<f32>,
    pub fold:          usize,
    pub flag:          i8,
}

pub struct PairDataset {
    benchmark: Benchmark,
    root:      PathBuf,
    pairs:     Vec<FacePair>,
}

impl PairDataset {
    pub fn from_file(benchmark: Benchmark, root: impl Into<PathBuf>, list: &Path) -> Result<Self> {
        let text = fs::read_to_string(list)
            .with_context(|| format!("Cannot read {} pair list '{}'", benchmark, list.display()))?;
        let pairs = parse_pairs(&text, PairFormat::for_benchmark(benchmark))
            .with_context(|| format!("Malformed {} pair list '{}'", benchmark, list.display()))?;
        if pairs.is_empty() {
            bail!("{} pair list '{}' has no pairs", benchmark, list.display());
        }
        Ok(Self { benchmark, root: root.into(), pairs })
    }

    pub fn benchmark(&self) -> Benchmark {
        self.benchmark
    }

    fn load(&self, pair: &FacePair) -> Result<PairSample> {
        let left = preprocess::load_rgb(&self.root.join(&pair.left))?;
        let right = preprocess::load_rgb(&self.root.join(&pair.right))?;
        Ok(PairSample {
            left_flipped:  preprocess::to_chw(&preprocess::mirror(&left)),
            left:          preprocess::to_chw(&left),
            right_flipped: preprocess::to_chw(&preprocess::mirror(&right)),
            right:         preprocess::to_chw(&right),
            fold:          pair.fold,
            flag:          pair.flag,
        })
    }
}

impl Dataset<PairSample> for PairDataset {
    fn get(&self, index: usize) -> Option<PairSample> {
        let pair = self.pairs.get(index)?;
        match self.load(pair) {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::error!("{}: {e:#}", self.benchmark);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}
