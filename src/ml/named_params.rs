// ============================================================
// Layer 5 — Named Parameters
// ============================================================
// Burn records are positional; checkpoints and warm-starts here
// are keyed by name. `NamedParams` gives every module a dotted
// path for each of its tensors:
//
//   Conv2d     <p>.weight  <p>.bias
//   BatchNorm  <p>.weight  <p>.bias  <p>.running_mean  <p>.running_var
//   PRelu      <p>.weight                       (activation slope)
//   Linear     <p>.weight  <p>.bias
//   Vec<M>     <p>.0.…  <p>.1.…
//   Option<M>  same as M when present, nothing otherwise
//
// `export` copies values out, `import` replaces values while
// keeping each parameter's id (so optimizer state stays keyed
// correctly), and `param_entries` lists trainable parameters
// for the optimizer groups. Running statistics are exported
// but are not trainable.

use anyhow::{anyhow, bail, Result};
use burn::{
    module::{Param, ParamId, RunningState},
    nn::{conv::Conv2d, BatchNorm, Linear, PRelu},
    prelude::*,
    tensor::TensorData,
};

use crate::domain::params::{ParamEntry, ParamRole};
use crate::domain::state_dict::{ParamTensor, StateDict};

pub trait NamedParams<B: Backend>: Sized {
    fn export(&self, prefix: &str, dict: &mut StateDict);

    /// Every name this module exports must be present in `dict`
    /// with the same shape.
    fn import(self, prefix: &str, dict: &StateDict) -> Result<Self>;

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>);
}

pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// ─── Whole-module helpers ─────────────────────────────────────────────────────

pub fn state_dict<B: Backend, M: NamedParams<B>>(module: &M) -> StateDict {
    let mut dict = StateDict::new();
    module.export("", &mut dict);
    dict
}

/// Replace all values of `module` from `dict`. Names in `dict` the module
/// does not have are an error too.
pub fn load_state_dict<B: Backend, M: NamedParams<B>>(module: M, dict: &StateDict) -> Result<M> {
    let own = state_dict(&module);
    if let Some(extra) = dict.names().find(|name| !own.contains(name)) {
        bail!("unexpected parameter '{extra}' in state dict");
    }
    module.import("", dict)
}

pub fn param_entries<B: Backend, M: NamedParams<B>>(module: &M) -> Vec<ParamEntry<ParamId>> {
    let mut out = Vec::new();
    module.param_entries("", &mut out);
    out
}

// ─── Tensor helpers ───────────────────────────────────────────────────────────

pub(crate) fn export_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> ParamTensor {
    let shape = tensor.dims().to_vec();
    let values = tensor.into_data().iter::<f32>().collect();
    ParamTensor::new(shape, values)
}

fn import_tensor<B: Backend, const D: usize>(
    current: &Tensor<B, D>,
    name:    &str,
    dict:    &StateDict,
) -> Result<Tensor<B, D>> {
    let saved = dict
        .get(name)
        .ok_or_else(|| anyhow!("missing parameter '{name}'"))?;
    let dims = current.dims();
    if saved.shape.as_slice() != dims.as_slice() {
        bail!("parameter '{name}' has shape {:?}, expected {:?}", saved.shape, dims);
    }
    let data = TensorData::new(saved.values.clone(), saved.shape.clone());
    Ok(Tensor::from_data(data, &current.device()))
}

pub(crate) fn import_param<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    name:  &str,
    dict:  &StateDict,
) -> Result<Param<Tensor<B, D>>> {
    let tensor = import_tensor(&param.val(), name, dict)?;
    Ok(Param::initialized(param.id, tensor.require_grad()))
}

fn import_running<B: Backend, const D: usize>(
    state: RunningState<Tensor<B, D>>,
    name:  &str,
    dict:  &StateDict,
) -> Result<RunningState<Tensor<B, D>>> {
    Ok(RunningState::new(import_tensor(&state.value(), name, dict)?))
}

pub(crate) fn entry<B: Backend, const D: usize>(
    param: &Param<Tensor<B, D>>,
    name:  String,
    role:  ParamRole,
) -> ParamEntry<ParamId> {
    ParamEntry { name, id: param.id, rank: D, role }
}

// ─── Leaf modules ─────────────────────────────────────────────────────────────

impl<B: Backend> NamedParams<B> for Conv2d<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        dict.insert(join(prefix, "weight"), export_tensor(self.weight.val()));
        if let Some(bias) = &self.bias {
            dict.insert(join(prefix, "bias"), export_tensor(bias.val()));
        }
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.weight = import_param(self.weight, &join(prefix, "weight"), dict)?;
        self.bias = self
            .bias
            .map(|bias| import_param(bias, &join(prefix, "bias"), dict))
            .transpose()?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        out.push(entry(&self.weight, join(prefix, "weight"), ParamRole::Weight));
        if let Some(bias) = &self.bias {
            out.push(entry(bias, join(prefix, "bias"), ParamRole::Weight));
        }
    }
}

impl<B: Backend, const D: usize> NamedParams<B> for BatchNorm<B, D> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        dict.insert(join(prefix, "weight"), export_tensor(self.gamma.val()));
        dict.insert(join(prefix, "bias"), export_tensor(self.beta.val()));
        dict.insert(join(prefix, "running_mean"), export_tensor(self.running_mean.value()));
        dict.insert(join(prefix, "running_var"), export_tensor(self.running_var.value()));
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.gamma = import_param(self.gamma, &join(prefix, "weight"), dict)?;
        self.beta = import_param(self.beta, &join(prefix, "bias"), dict)?;
        self.running_mean = import_running(self.running_mean, &join(prefix, "running_mean"), dict)?;
        self.running_var = import_running(self.running_var, &join(prefix, "running_var"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        out.push(entry(&self.gamma, join(prefix, "weight"), ParamRole::Weight));
        out.push(entry(&self.beta, join(prefix, "bias"), ParamRole::Weight));
    }
}

impl<B: Backend> NamedParams<B> for PRelu<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        dict.insert(join(prefix, "weight"), export_tensor(self.alpha.val()));
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.alpha = import_param(self.alpha, &join(prefix, "weight"), dict)?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        out.push(entry(&self.alpha, join(prefix, "weight"), ParamRole::Activation));
    }
}

impl<B: Backend> NamedParams<B> for Linear<B> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        dict.insert(join(prefix, "weight"), export_tensor(self.weight.val()));
        if let Some(bias) = &self.bias {
            dict.insert(join(prefix, "bias"), export_tensor(bias.val()));
        }
    }

    fn import(mut self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.weight = import_param(self.weight, &join(prefix, "weight"), dict)?;
        self.bias = self
            .bias
            .map(|bias| import_param(bias, &join(prefix, "bias"), dict))
            .transpose()?;
        Ok(self)
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        out.push(entry(&self.weight, join(prefix, "weight"), ParamRole::Weight));
        if let Some(bias) = &self.bias {
            out.push(entry(bias, join(prefix, "bias"), ParamRole::Weight));
        }
    }
}

// ─── Containers ───────────────────────────────────────────────────────────────

impl<B: Backend, M: NamedParams<B>> NamedParams<B> for Option<M> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        if let Some(module) = self {
            module.export(prefix, dict);
        }
    }

    fn import(self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.map(|module| module.import(prefix, dict)).transpose()
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        if let Some(module) = self {
            module.param_entries(prefix, out);
        }
    }
}

impl<B: Backend, M: NamedParams<B>> NamedParams<B> for Vec<M> {
    fn export(&self, prefix: &str, dict: &mut StateDict) {
        for (i, module) in self.iter().enumerate() {
            module.export(&join(prefix, &i.to_string()), dict);
        }
    }

    fn import(self, prefix: &str, dict: &StateDict) -> Result<Self> {
        self.into_iter()
            .enumerate()
            .map(|(i, module)| module.import(&join(prefix, &i.to_string()), dict))
            .collect()
    }

    fn param_entries(&self, prefix: &str, out: &mut Vec<ParamEntry<ParamId>>) {
        for (i, module) in self.iter().enumerate() {
            module.param_entries(&join(prefix, &i.to_string()), out);
        }
    }
}
