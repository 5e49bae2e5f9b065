// ============================================================
// Layer 3 — Optimizer Parameter Groups
// ============================================================
// Every trainable parameter goes into exactly one of three
// groups, each with its own weight decay:
//
//   margin           — class-weight matrix of the margin head  5e-4
//   activation-bias  — slopes of every PReLU in the backbone    0
//   base             — everything else in the backbone         5e-5
//
// The partition is computed once at startup and never changes.
// It is generic over the parameter id type so it can be checked
// without a tensor backend.

use std::collections::HashSet;
use std::hash::Hash;

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamGroup {
    Base,
    Margin,
    ActivationBias,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 3] = [ParamGroup::Base, ParamGroup::Margin, ParamGroup::ActivationBias];

    /// L2 weight decay applied to parameters of this group;
    /// `None` means no decay at all.
    pub fn weight_decay(self) -> Option<f64> {
        match self {
            ParamGroup::Base           => Some(5e-5),
            ParamGroup::Margin         => Some(5e-4),
            ParamGroup::ActivationBias => None,
        }
    }
}

/// How a backbone parameter is used, as reported by the module that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Weights, biases and normalisation parameters.
    Weight,
    /// Slope of a parameterised activation.
    Activation,
}

/// One trainable parameter as seen by the partitioner.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry<I> {
    pub name: String,
    pub id:   I,
    /// Tensor rank, needed to move gradients between devices.
    pub rank: usize,
    pub role: ParamRole,
}

#[derive(Debug, Clone)]
pub struct GroupPartition<I> {
    pub base:            Vec<ParamEntry<I>>,
    pub margin:          Vec<ParamEntry<I>>,
    pub activation_bias: Vec<ParamEntry<I>>,
}

impl<I: Clone + Eq + Hash> GroupPartition<I> {
    /// Split backbone and margin-head parameters into the three groups.
    /// Fails if any parameter id is reported twice.
    pub fn partition(backbone: Vec<ParamEntry<I>>, margin: Vec<ParamEntry<I>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in backbone.iter().chain(margin.iter()) {
            if !seen.insert(entry.id.clone()) {
                bail!("parameter {} is registered more than once", entry.name);
            }
        }

        let (activation_bias, base): (Vec<_>, Vec<_>) = backbone
            .into_iter()
            .partition(|entry| entry.role == ParamRole::Activation);

        Ok(Self { base, margin, activation_bias })
    }

    pub fn group(&self, group: ParamGroup) -> &[ParamEntry<I>] {
        match group {
            ParamGroup::Base           => &self.base,
            ParamGroup::Margin         => &self.margin,
            ParamGroup::ActivationBias => &self.activation_bias,
        }
    }

    pub fn ids(&self, group: ParamGroup) -> Vec<I> {
        self.group(group).iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.margin.len() + self.activation_bias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
