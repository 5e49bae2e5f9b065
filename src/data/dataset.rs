// ============================================================
// Layer 4 — Training Dataset
// ============================================================
// Reads the `<path> <label>` train list and decodes one image per
// index on demand:
//
//   train.list ─► Vec<ManifestEntry> ─► FaceDataset ─► EpochShuffled ─► loader workers
//
// The loader splits its dataset into contiguous per-worker chunks,
// and the list is sorted by identity. EpochShuffled therefore
// permutes the whole index space before every pass, so each chunk
// draws from every identity.

use anyhow::{bail, Context, Result};
use burn::data::dataset::{transform::ShuffledDataset, Dataset};
use rand::Rng;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use crate::data::preprocess;
use crate::domain::manifest::ManifestEntry;

/// Read every non-blank line of a train list.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read train list '{}'", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            ManifestEntry::parse_line(line)
                .with_context(|| format!("{}:{}", path.display(), i + 1))
        })
        .collect()
}

/// Number of identities, checking labels are exactly `0..n`.
pub fn class_count(entries: &[ManifestEntry]) -> Result<usize> {
    let labels: BTreeSet<usize> = entries.iter().map(|e| e.label).collect();
    let count = labels.len();
    if let Some(max) = labels.last() {
        if *max + 1 != count {
            bail!("labels are not contiguous: {count} distinct labels but the largest is {max}");
        }
    }
    Ok(count)
}

/// One decoded training image.
#[derive(Debug, Clone)]
pub struct FaceSample {
    /// CHW, normalised to [-1, 1].
    pub pixels: Vec<f32>,
    pub label:  usize,
}

/// Training images listed by a manifest, relative to `root`.
/// Absolute manifest paths ignore the root.
pub struct FaceDataset {
    root:        PathBuf,
    entries:     Vec<ManifestEntry>,
    class_count: usize,
    /// Mirror each image with probability 1/2.
    random_flip: bool,
    failures:    AtomicUsize,
}

impl FaceDataset {
    pub fn from_manifest(root: impl Into<PathBuf>, manifest: &Path) -> Result<Self> {
        let entries = read_manifest(manifest)?;
        if entries.is_empty() {
            bail!("train list '{}' is empty", manifest.display());
        }
        let class_count = class_count(&entries)?;
        Ok(Self {
            root: root.into(),
            entries,
            class_count,
            random_flip: true,
            failures: AtomicUsize::new(0),
        })
    }

    pub fn with_random_flip(mut self, random_flip: bool) -> Self {
        self.random_flip = random_flip;
        self
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Images that failed to decode so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn load(&self, entry: &ManifestEntry) -> Result<FaceSample> {
        let img = preprocess::load_rgb(&self.root.join(&entry.path))?;
        let img = if self.random_flip && rand::thread_rng().gen_bool(0.5) {
            preprocess::mirror(&img)
        } else {
            img
        };
        Ok(FaceSample { pixels: preprocess::to_chw(&img), label: entry.label })
    }
}

impl Dataset<FaceSample> for FaceDataset {
    /// A decode failure is logged and counted; the training loop
    /// checks the count after every batch.
    fn get(&self, index: usize) -> Option<FaceSample> {
        let entry = self.entries.get(index)?;
        match self.load(entry) {
            Ok(sample) => Some(sample),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{e:#}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ─── EpochShuffled ────────────────────────────────────────────────────────────
/// A dataset whose whole index order is redrawn by `reshuffle`.
/// Pass `k` uses the order seeded with `seed + k`.
pub struct EpochShuffled<D, I> {
    base:   Arc<D>,
    seed:   u64,
    passes: AtomicU64,
    order:  RwLock<ShuffledDataset<Arc<D>, I>>,
}

impl<D, I> EpochShuffled<D, I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    pub fn new(base: Arc<D>, seed: u64) -> Self {
        let order = RwLock::new(ShuffledDataset::with_seed(base.clone(), seed));
        Self { base, seed, passes: AtomicU64::new(0), order }
    }

    pub fn base(&self) -> &D {
        &self.base
    }

    /// Draw the order of the next pass.
    pub fn reshuffle(&self) {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let shuffled = ShuffledDataset::with_seed(self.base.clone(), self.seed.wrapping_add(pass));
        match self.order.write() {
            Ok(mut order) => *order = shuffled,
            Err(poisoned) => *poisoned.into_inner() = shuffled,
        }
    }
}

impl<D, I> Dataset<I> for EpochShuffled<D, I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    fn get(&self, index: usize) -> Option<I> {
        self.order.read().ok()?.get(index)
    }

    fn len(&self) -> usize {
        self.base.as_ref().len()
    }
}
