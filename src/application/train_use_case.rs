// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// The Initializing state of a run, in order:
//
//   Step 1: Validate the configuration        (Layer 3 - domain)
//   Step 2: Create the run directory          <save_dir>/<model_pre><BACKBONE>_<stamp>
//   Step 3: Install the log sink, save config (Layer 6 - infra)
//   Step 4: Load train list + pair lists      (Layer 4 - data)
//   Step 5: Resolve devices                   (ExecutionStrategy → wgpu devices)
//   Step 6: Build backbone + margin head,
//           warm-start and/or resume          (Layer 5 - ml)
//   Step 7: Hand over to the training loop    (Layer 5 - ml)
//
// Everything from Step 6 on is generic over the autodiff backend;
// the binary instantiates it with Autodiff<Wgpu>.
//
// Reference: Burn Book §5 (Training)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::data::dataset::FaceDataset;
use crate::data::pairs::PairDataset;
use crate::domain::accuracy::Benchmark;
use crate::domain::architecture::{BackboneKind, ConfigError, ExecutionStrategy, MarginKind};
use crate::infra::checkpoint::CheckpointStore;
use crate::infra::logging;
use crate::infra::results::ResultStore;
use crate::ml::backbone::{BackboneConfig, FaceBackbone};
use crate::ml::evaluator::BenchmarkEvaluator;
use crate::ml::margin::MarginConfig;
use crate::ml::named_params::{load_state_dict, state_dict};
use crate::ml::optimizer::LrSchedule;
use crate::ml::session::{build_session, LoaderSource};
use crate::ml::trainer::{run_training, LoopConfig, TrainingReport, PROGRESS_EVERY};

const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a run needs, already validated by the CLI conversion.
// Serialisable so the run directory records how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_root:       PathBuf,
    pub train_file_list:  PathBuf,
    pub lfw_test_root:    PathBuf,
    pub lfw_file_list:    PathBuf,
    pub agedb_test_root:  PathBuf,
    pub agedb_file_list:  PathBuf,
    pub cfpfp_test_root:  PathBuf,
    pub cfpfp_file_list:  PathBuf,
    pub backbone:         BackboneKind,
    pub margin_type:      MarginKind,
    pub feature_dim:      usize,
    pub batch_size:       usize,
    pub total_epoch:      usize,
    pub save_freq:        usize,
    pub test_freq:        usize,
    /// Checkpoint to continue from (strict, same backbone).
    pub resume:           Option<PathBuf>,
    /// Checkpoint to warm-start from (matching names and shapes only).
    pub pretrain:         Option<PathBuf>,
    pub save_dir:         PathBuf,
    pub model_pre:        String,
    pub strategy:         ExecutionStrategy,
    pub result_dir:       PathBuf,
    pub num_workers:      usize,
    pub seed:             u64,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("feature_dim", self.feature_dim),
            ("batch_size", self.batch_size),
            ("total_epoch", self.total_epoch),
            ("save_freq", self.save_freq),
            ("test_freq", self.test_freq),
        ];
        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::ZeroValue(field)),
            None => Ok(()),
        }
    }

    /// `<save_dir>/<model_pre><BACKBONE>_<YYYYMMDD_HHMMSS>`
    pub fn run_dir(&self, started: DateTime<Local>) -> PathBuf {
        self.save_dir.join(format!(
            "{}{}_{}",
            self.model_pre,
            self.backbone.name().to_uppercase(),
            started.format(RUN_STAMP_FORMAT)
        ))
    }

    fn pair_lists(&self) -> [(Benchmark, &Path, &Path); 3] {
        [
            (Benchmark::Lfw, &self.lfw_test_root, &self.lfw_file_list),
            (Benchmark::AgeDb30, &self.agedb_test_root, &self.agedb_file_list),
            (Benchmark::CfpFp, &self.cfpfp_test_root, &self.cfpfp_file_list),
        ]
    }
}

/// Id 0 alone means "whatever adapter wgpu picks"; every other id
/// addresses a discrete GPU.
pub fn wgpu_devices(strategy: &ExecutionStrategy) -> Vec<WgpuDevice> {
    match strategy.device_ids().as_slice() {
        [0] => vec![WgpuDevice::default()],
        ids => ids.iter().map(|id| WgpuDevice::DiscreteGpu(*id)).collect(),
    }
}

// ─── Warm start / resume ──────────────────────────────────────────────────────
/// Copy every parameter of the checkpoint whose name and shape match
/// a parameter of `backbone`; everything else keeps its initial value.
pub fn warm_start<B: Backend>(backbone: FaceBackbone<B>, path: &Path) -> Result<FaceBackbone<B>> {
    let checkpoint = CheckpointStore::load(path)?;
    let mut dict = state_dict(&backbone);
    let report = dict.transplant_from(&checkpoint.net_state_dict);

    tracing::info!(
        "Pretrained weights '{}': {} copied, {} shape mismatches, {} unused",
        path.display(),
        report.copied.len(),
        report.shape_mismatch.len(),
        report.unused.len(),
    );
    for name in &report.shape_mismatch {
        tracing::warn!("Shape mismatch, keeping initial value for {name}");
    }
    for name in &report.unused {
        tracing::debug!("Unused pretrained parameter {name}");
    }

    load_state_dict(backbone, &dict)
}

/// Restore every backbone parameter from the checkpoint. Returns the
/// restored backbone and the epoch to continue at.
pub fn resume<B: Backend>(backbone: FaceBackbone<B>, path: &Path) -> Result<(FaceBackbone<B>, usize)> {
    let checkpoint = CheckpointStore::load(path)?;
    let backbone = load_state_dict(backbone, &checkpoint.net_state_dict)
        .with_context(|| format!("Checkpoint '{}' does not fit this backbone", path.display()))?;
    tracing::info!("Resumed from '{}' at epoch {}", path.display(), checkpoint.epoch);
    Ok((backbone, checkpoint.next_epoch()))
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainingReport> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Run directory ─────────────────────────────────────────────
        fs::create_dir_all(&cfg.save_dir)
            .with_context(|| format!("Cannot create save dir '{}'", cfg.save_dir.display()))?;
        let run_dir = cfg.run_dir(Local::now());
        fs::create_dir(&run_dir)
            .with_context(|| format!("Cannot create run directory '{}'", run_dir.display()))?;

        // ── Step 3: Log sink + config ─────────────────────────────────────────
        let log_path = logging::init_log(&run_dir)?;
        tracing::info!("Logging to '{}'", log_path.display());
        let store = CheckpointStore::new(&run_dir);
        tracing::info!("Run directory '{}'", store.dir().display());
        let config_path = store.save_config(cfg)?;
        tracing::info!("Config saved to '{}'", config_path.display());

        // ── Step 4: Datasets ──────────────────────────────────────────────────
        let train = FaceDataset::from_manifest(&cfg.train_root, &cfg.train_file_list)?;
        tracing::info!(
            "Train list '{}': {} identities",
            cfg.train_file_list.display(),
            train.class_count()
        );
        let pairs = cfg
            .pair_lists()
            .into_iter()
            .map(|(benchmark, root, list)| PairDataset::from_file(benchmark, root, list))
            .collect::<Result<Vec<_>>>()?;

        // ── Step 5: Devices ───────────────────────────────────────────────────
        let devices = wgpu_devices(&cfg.strategy);
        if cfg.strategy.is_replicated() {
            tracing::info!("Replicating over devices {:?}", cfg.strategy.device_ids());
        } else {
            tracing::info!("Training on device {:?}", devices);
        }

        // ── Steps 6-7 ─────────────────────────────────────────────────────────
        train_on::<Autodiff<Wgpu>>(cfg, store, train, pairs, devices)
    }
}

fn train_on<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    store:   CheckpointStore,
    train:   FaceDataset,
    pairs:   Vec<PairDataset>,
    devices: Vec<B::Device>,
) -> Result<TrainingReport> {
    let Some(primary) = devices.first().cloned() else {
        anyhow::bail!("no device to train on");
    };

    // ── Model ─────────────────────────────────────────────────────────────────
    let mut backbone = BackboneConfig::new(cfg.backbone)
        .with_feature_dim(cfg.feature_dim)
        .init::<B>(&primary);
    let margin = MarginConfig::new(cfg.margin_type, cfg.feature_dim, train.class_count()).init::<B>(&primary);
    tracing::info!(
        "Backbone {} ({}-d features, {} parameters), margin head {}",
        cfg.backbone,
        cfg.feature_dim,
        state_dict(&backbone).numel(),
        cfg.margin_type
    );

    if let Some(path) = &cfg.pretrain {
        backbone = warm_start(backbone, path)?;
    }
    let mut start_epoch = 1;
    if let Some(path) = &cfg.resume {
        (backbone, start_epoch) = resume(backbone, path)?;
    }
    if start_epoch > cfg.total_epoch {
        tracing::warn!("Start epoch {} is past total epoch {}; nothing to train", start_epoch, cfg.total_epoch);
    }

    // ── Loop ──────────────────────────────────────────────────────────────────
    let source = LoaderSource::<B>::new(train, cfg.batch_size, cfg.num_workers, cfg.seed, primary.clone());
    let mut session = build_session(backbone, margin, devices)?;
    let results = ResultStore::new(&cfg.result_dir)?;
    let mut evaluator = BenchmarkEvaluator::<B::InnerBackend>::new(pairs, results, primary);

    let loop_cfg = LoopConfig {
        start_epoch,
        total_epoch: cfg.total_epoch,
        save_freq: cfg.save_freq,
        test_freq: cfg.test_freq,
        progress_every: PROGRESS_EVERY,
    };
    run_training(&loop_cfg, &LrSchedule::default(), &source, &mut session, &mut evaluator, &store)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::Checkpoint;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};
    use chrono::TimeZone;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn config() -> TrainConfig {
        TrainConfig {
            train_root:      PathBuf::from("data/train"),
            train_file_list: PathBuf::from("data/train.list"),
            lfw_test_root:   PathBuf::from("data/lfw"),
            lfw_file_list:   PathBuf::from("data/pairs.txt"),
            agedb_test_root: PathBuf::from("data/agedb"),
            agedb_file_list: PathBuf::from("data/agedb_30_pair.txt"),
            cfpfp_test_root: PathBuf::from("data/cfp"),
            cfpfp_file_list: PathBuf::from("data/cfp_fp_pair.txt"),
            backbone:        BackboneKind::Res50Ir,
            margin_type:     MarginKind::ArcFace,
            feature_dim:     128,
            batch_size:      256,
            total_epoch:     50,
            save_freq:       1,
            test_freq:       1,
            resume:          None,
            pretrain:        None,
            save_dir:        PathBuf::from("./model"),
            model_pre:       "CASIA_".to_string(),
            strategy:        ExecutionStrategy::SingleDevice(0),
            result_dir:      PathBuf::from("./result"),
            num_workers:     8,
            seed:            42,
        }
    }

    fn small_backbone(feature_dim: usize) -> FaceBackbone<TestBackend> {
        BackboneConfig::new(BackboneKind::MobileFace)
            .with_feature_dim(feature_dim)
            .init::<TestBackend>(&NdArrayDevice::Cpu)
    }

    fn save_checkpoint(dir: &Path, epoch: usize, backbone: &FaceBackbone<TestBackend>) -> PathBuf {
        CheckpointStore::new(dir)
            .save(&Checkpoint { epoch, net_state_dict: state_dict(backbone) })
            .unwrap()
    }

    #[test]
    fn test_run_dir_name() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(config().run_dir(started), PathBuf::from("./model/CASIA_RES50-IR_20240309_070501"));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        assert_eq!(config().validate(), Ok(()));
        let cfg = TrainConfig { save_freq: 0, ..config() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroValue("save_freq")));
        let cfg = TrainConfig { batch_size: 0, ..config() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroValue("batch_size")));
    }

    #[test]
    fn test_config_json_round_trip() {
        let cfg = TrainConfig { strategy: ExecutionStrategy::Replicated(vec![0, 1]), ..config() };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<TrainConfig>(&json).unwrap(), cfg);
    }

    #[test]
    fn test_device_mapping() {
        assert_eq!(wgpu_devices(&ExecutionStrategy::SingleDevice(0)), vec![WgpuDevice::default()]);
        assert_eq!(
            wgpu_devices(&ExecutionStrategy::Replicated(vec![0, 2])),
            vec![WgpuDevice::DiscreteGpu(0), WgpuDevice::DiscreteGpu(2)]
        );
    }

    #[test]
    fn test_resume_restores_and_continues_at_next_epoch() {
        let tmp = TempDir::new().unwrap();
        let saved = small_backbone(16);
        let path = save_checkpoint(tmp.path(), 7, &saved);

        let (restored, start) = resume(small_backbone(16), &path).unwrap();

        assert_eq!(start, 8);
        assert_eq!(state_dict(&restored), state_dict(&saved));
    }

    #[test]
    fn test_resume_rejects_other_shapes() {
        let tmp = TempDir::new().unwrap();
        let path = save_checkpoint(tmp.path(), 1, &small_backbone(16));
        assert!(resume(small_backbone(32), &path).is_err());
    }

    #[test]
    fn test_warm_start_skips_shape_mismatches() {
        let tmp = TempDir::new().unwrap();
        let pretrained = small_backbone(16);
        let path = save_checkpoint(tmp.path(), 3, &pretrained);

        let fresh = small_backbone(32);
        let fresh_dict = state_dict(&fresh);
        let warmed = state_dict(&warm_start(fresh, &path).unwrap());
        let source = state_dict(&pretrained);

        let mut copied = 0;
        for (name, tensor) in warmed.iter() {
            match source.get(name) {
                Some(src) if src.shape == tensor.shape => {
                    assert_eq!(src, tensor, "{name}");
                    copied += 1;
                }
                _ => assert_eq!(fresh_dict.get(name), Some(tensor), "{name}"),
            }
        }
        assert!(copied > 0);
        assert!(copied < warmed.len());
    }
}
