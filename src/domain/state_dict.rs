// ============================================================
// Layer 3 — State Dict
// ============================================================
// A snapshot of model parameters keyed by dotted name, e.g.
//
//   blocks.3.body.1.conv.weight   shape [128, 128, 3, 3]
//   blocks.3.body.1.prelu.weight  shape [128]
//
// Values are always copied out of the live model, never shared
// with it, so a snapshot stays valid while training continues.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parameter tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self { shape, values }
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

/// Outcome of a name-based partial transplant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransplantReport {
    /// Names copied from the source.
    pub copied: Vec<String>,
    /// Names present in both but with different shapes; left untouched.
    pub shape_mismatch: Vec<String>,
    /// Source names with no counterpart in the target.
    pub unused: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    params: BTreeMap<String, ParamTensor>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ParamTensor) {
        self.params.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.params.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Total number of scalar values in the snapshot.
    pub fn numel(&self) -> usize {
        self.params.values().map(ParamTensor::numel).sum()
    }

    /// Copy every entry of `source` whose name already exists here
    /// with the same shape. Everything else keeps its current value.
    pub fn transplant_from(&mut self, source: &StateDict) -> TransplantReport {
        let mut report = TransplantReport::default();
        for (name, tensor) in &source.params {
            match self.params.get_mut(name) {
                Some(target) if target.shape == tensor.shape => {
                    *target = tensor.clone();
                    report.copied.push(name.clone());
                }
                Some(_) => report.shape_mismatch.push(name.clone()),
                None    => report.unused.push(name.clone()),
            }
        }
        report
    }
}
