// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `gen-list`, and all
// their configurable flags.
//
// Backbone, margin and device names arrive as plain strings and
// are resolved in one place, the TrainArgs → TrainConfig
// conversion, so an unknown name fails before anything is
// created on disk.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;
use crate::domain::architecture::{BackboneKind, ConfigError, ExecutionStrategy, MarginKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a backbone with a margin head and track benchmark accuracy
    Train(TrainArgs),

    /// Append a `<path> <label>` train list for a root of identity folders
    GenList(GenListArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Root of the aligned training images
    #[arg(long, default_value = "/media/ramdisk/webface_align_112/")]
    pub train_root: PathBuf,

    /// Train list, one `<path> <label>` per line
    #[arg(long, default_value = "/media/ramdisk/webface_align_train.list")]
    pub train_file_list: PathBuf,

    #[arg(long, default_value = "/media/ramdisk/lfw_align_112")]
    pub lfw_test_root: PathBuf,

    #[arg(long, default_value = "/media/ramdisk/pairs.txt")]
    pub lfw_file_list: PathBuf,

    #[arg(long, default_value = "/media/sda/AgeDB-30/agedb30_align_112")]
    pub agedb_test_root: PathBuf,

    #[arg(long, default_value = "/media/sda/AgeDB-30/agedb_30_pair.txt")]
    pub agedb_file_list: PathBuf,

    #[arg(long, default_value = "/media/sda/CFP-FP/CFP_FP_aligned_112")]
    pub cfpfp_test_root: PathBuf,

    #[arg(long, default_value = "/media/sda/CFP-FP/cfp_fp_pair.txt")]
    pub cfpfp_file_list: PathBuf,

    /// MobileFace, Res50, Res101, Res50-IR or SERes50-IR
    #[arg(long, default_value = "MobileFace")]
    pub backbone: String,

    /// arcface or cosface
    #[arg(long, default_value = "arcface")]
    pub margin_type: String,

    /// Embedding size, usually 128 or 512
    #[arg(long, default_value_t = 128)]
    pub feature_dim: usize,

    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 50)]
    pub total_epoch: usize,

    /// Save a checkpoint every N epochs
    #[arg(long, default_value_t = 1)]
    pub save_freq: usize,

    /// Evaluate on the benchmarks every N epochs
    #[arg(long, default_value_t = 1)]
    pub test_freq: usize,

    /// Checkpoint to resume from
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Checkpoint to initialise matching parameters from
    #[arg(long)]
    pub pretrain: Option<PathBuf>,

    #[arg(long, default_value = "./model")]
    pub save_dir: PathBuf,

    /// Prefix of the run directory name
    #[arg(long, default_value = "CASIA_")]
    pub model_pre: String,

    /// Comma-separated device ids; more than one replicates the model
    #[arg(long, default_value = "0")]
    pub gpus: String,

    /// Where per-benchmark feature files are written
    #[arg(long, default_value = "./result")]
    pub result_dir: PathBuf,

    /// Data loader worker threads; 0 loads on the training thread
    #[arg(long, default_value_t = 8)]
    pub num_workers: usize,

    /// Shuffle seed of the train loader
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl TryFrom<TrainArgs> for TrainConfig {
    type Error = ConfigError;

    fn try_from(a: TrainArgs) -> Result<Self, Self::Error> {
        let config = TrainConfig {
            train_root:      a.train_root,
            train_file_list: a.train_file_list,
            lfw_test_root:   a.lfw_test_root,
            lfw_file_list:   a.lfw_file_list,
            agedb_test_root: a.agedb_test_root,
            agedb_file_list: a.agedb_file_list,
            cfpfp_test_root: a.cfpfp_test_root,
            cfpfp_file_list: a.cfpfp_file_list,
            backbone:        a.backbone.parse::<BackboneKind>()?,
            margin_type:     a.margin_type.parse::<MarginKind>()?,
            feature_dim:     a.feature_dim,
            batch_size:      a.batch_size,
            total_epoch:     a.total_epoch,
            save_freq:       a.save_freq,
            test_freq:       a.test_freq,
            resume:          a.resume,
            pretrain:        a.pretrain,
            save_dir:        a.save_dir,
            model_pre:       a.model_pre,
            strategy:        ExecutionStrategy::from_device_ids(&a.gpus)?,
            result_dir:      a.result_dir,
            num_workers:     a.num_workers,
            seed:            a.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct GenListArgs {
    /// Directory holding one sub-directory per identity
    #[arg(long)]
    pub root: PathBuf,

    /// Train list to append to
    #[arg(long, default_value = "train.list")]
    pub output: PathBuf,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_args(extra: &[&str]) -> TrainArgs {
        let argv = ["facetrain", "train"].iter().chain(extra).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Train(args) => args,
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_train_defaults() {
        let config = TrainConfig::try_from(train_args(&[])).unwrap();
        assert_eq!(config.backbone, BackboneKind::MobileFace);
        assert_eq!(config.margin_type, MarginKind::ArcFace);
        assert_eq!(config.feature_dim, 128);
        assert_eq!(config.batch_size, 256);
        assert_eq!(config.total_epoch, 50);
        assert_eq!(config.strategy, ExecutionStrategy::SingleDevice(0));
        assert_eq!(config.model_pre, "CASIA_");
        assert_eq!(config.resume, None);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_train_flags() {
        let args = train_args(&[
            "--backbone", "SERes50-IR",
            "--margin-type", "cosface",
            "--feature-dim", "512",
            "--gpus", "0,1",
            "--resume", "model/run/010.ckpt",
        ]);
        let config = TrainConfig::try_from(args).unwrap();
        assert_eq!(config.backbone, BackboneKind::SeRes50Ir);
        assert_eq!(config.margin_type, MarginKind::CosFace);
        assert_eq!(config.feature_dim, 512);
        assert_eq!(config.strategy, ExecutionStrategy::Replicated(vec![0, 1]));
        assert_eq!(config.resume, Some(PathBuf::from("model/run/010.ckpt")));
    }

    #[test]
    fn test_bad_values_fail_conversion() {
        let err = TrainConfig::try_from(train_args(&["--backbone", "SphereNet"])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownBackbone("SphereNet".into()));
        let err = TrainConfig::try_from(train_args(&["--margin-type", "sphereface"])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownMargin("sphereface".into()));
        let err = TrainConfig::try_from(train_args(&["--test-freq", "0"])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroValue("test_freq"));
        assert!(TrainConfig::try_from(train_args(&["--gpus", "0,x"])).is_err());
    }

    #[test]
    fn test_zero_workers_is_accepted() {
        let config = TrainConfig::try_from(train_args(&["--num-workers", "0"])).unwrap();
        assert_eq!(config.num_workers, 0);
    }

    #[test]
    fn test_gen_list_args() {
        let cli = Cli::try_parse_from(["facetrain", "gen-list", "--root", "faces"]).unwrap();
        let Commands::GenList(args) = cli.command else {
            panic!("expected gen-list");
        };
        assert_eq!(args.root, PathBuf::from("faces"));
        assert_eq!(args.output, PathBuf::from("train.list"));
        assert!(Cli::try_parse_from(["facetrain", "gen-list"]).is_err());
    }
}
