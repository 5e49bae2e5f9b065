// ============================================================
// Layer 6 — Checkpoint Store
// ============================================================
// Persists `(epoch, backbone state dict)` snapshots.
//
// File format:
//   A safetensors container; every backbone parameter is stored
//   as an F32 tensor under its dotted name, and the epoch lives
//   in the header metadata. Because entries are keyed by name,
//   a checkpoint from one backbone can warm-start another.
//
// File naming convention:
//   <run dir>/
//     train_config.json  ← validated run configuration
//     001.ckpt   ← after epoch 1
//     002.ckpt   ← after epoch 2
//     ...
//
// Each file is written to `<name>.tmp` and renamed into place,
// so a crash mid-write never leaves a truncated `.ckpt` behind.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            safetensors format specification

use anyhow::{anyhow, bail, Context, Result};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::domain::state_dict::{ParamTensor, StateDict};

const EPOCH_KEY:  &str = "epoch";
const FORMAT_KEY: &str = "format";
const FORMAT:     &str = "facetrain-checkpoint-v1";

pub const CONFIG_FILE_NAME: &str = "train_config.json";

/// A parameter snapshot taken at the end of an epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub epoch:          usize,
    pub net_state_dict: StateDict,
}

impl Checkpoint {
    /// The epoch a run resumed from this checkpoint starts at.
    pub fn next_epoch(&self) -> usize {
        self.epoch + 1
    }
}

/// Writes checkpoints into one run directory.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// The directory must already exist; the training use case creates it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<epoch, 3-digit zero padded>.ckpt`
    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{epoch:03}.ckpt"))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.path_for(checkpoint.epoch);
        let bytes = encode(checkpoint)?;

        let tmp_path = path.with_extension("ckpt.tmp");
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write checkpoint to '{}'", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move checkpoint into '{}'", path.display()))?;

        tracing::debug!(
            "Saved checkpoint '{}' ({} tensors)",
            path.display(),
            checkpoint.net_state_dict.len()
        );
        Ok(path)
    }

    /// Read any checkpoint file, not only ones from this store.
    pub fn load(path: &Path) -> Result<Checkpoint> {
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read checkpoint '{}'", path.display()))?;
        decode(&bytes).with_context(|| format!("Malformed checkpoint '{}'", path.display()))
    }

    /// Save the run configuration next to the checkpoints as
    /// pretty-printed JSON.
    pub fn save_config<T: Serialize>(&self, config: &T) -> Result<PathBuf> {
        let path = self.dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write config to '{}'", path.display()))?;
        Ok(path)
    }
}

fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>> {
    // Byte buffers must outlive the views that borrow them.
    let buffers: Vec<(&str, Vec<u8>, Vec<usize>)> = checkpoint
        .net_state_dict
        .iter()
        .map(|(name, tensor)| {
            let bytes = tensor.values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name, bytes, tensor.shape.clone())
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, bytes, shape) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
            .map_err(|e| anyhow!("tensor '{name}' cannot be stored: {e}"))?;
        views.push((*name, view));
    }

    let mut metadata = HashMap::new();
    metadata.insert(EPOCH_KEY.to_string(), checkpoint.epoch.to_string());
    metadata.insert(FORMAT_KEY.to_string(), FORMAT.to_string());

    safetensors::serialize(views, Some(metadata))
        .map_err(|e| anyhow!("checkpoint serialization failed: {e}"))
}

fn decode(bytes: &[u8]) -> Result<Checkpoint> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)
        .map_err(|e| anyhow!("cannot read checkpoint header: {e}"))?;
    let epoch = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(EPOCH_KEY))
        .ok_or_else(|| anyhow!("checkpoint header has no '{EPOCH_KEY}' entry"))?
        .parse::<usize>()
        .context("checkpoint epoch is not an integer")?;

    let tensors = SafeTensors::deserialize(bytes)
        .map_err(|e| anyhow!("cannot parse checkpoint tensors: {e}"))?;

    let mut net_state_dict = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            bail!("tensor '{name}' has dtype {:?}, expected F32", view.dtype());
        }
        let values = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        net_state_dict.insert(name, ParamTensor::new(view.shape().to_vec(), values));
    }

    Ok(Checkpoint { epoch, net_state_dict })
}
