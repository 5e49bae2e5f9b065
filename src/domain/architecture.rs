// ============================================================
// Layer 3 — Architecture Selection
// ============================================================
// Backbones and margin heads are chosen by name on the command
// line. The names map onto closed enums here, at one place, and
// an unknown name is a configuration error raised before any
// directory, loader or network is created.
//
// The device list is turned into an explicit execution strategy
// in the same way: one id trains on a single device, several
// ids replicate the model across them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── ConfigError ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownBackbone(String),
    UnknownMargin(String),
    InvalidDeviceList(String),
    ZeroValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBackbone(name) => write!(
                f,
                "{name} is not available! expected one of: {}",
                BackboneKind::NAMES.join(", ")
            ),
            Self::UnknownMargin(name) => write!(
                f,
                "{name} is not available! expected one of: {}",
                MarginKind::NAMES.join(", ")
            ),
            Self::InvalidDeviceList(list) => {
                write!(f, "invalid device list {list:?}: expected comma-separated ids like 0,1")
            }
            Self::ZeroValue(field) => write!(f, "{field} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ─── BackboneKind ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneKind {
    MobileFace,
    Res50,
    Res101,
    Res50Ir,
    SeRes50Ir,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 5] = [
        BackboneKind::MobileFace,
        BackboneKind::Res50,
        BackboneKind::Res101,
        BackboneKind::Res50Ir,
        BackboneKind::SeRes50Ir,
    ];

    pub const NAMES: [&'static str; 5] = ["MobileFace", "Res50", "Res101", "Res50-IR", "SERes50-IR"];

    /// The command-line name.
    pub fn name(self) -> &'static str {
        match self {
            BackboneKind::MobileFace => "MobileFace",
            BackboneKind::Res50      => "Res50",
            BackboneKind::Res101     => "Res101",
            BackboneKind::Res50Ir    => "Res50-IR",
            BackboneKind::SeRes50Ir  => "SERes50-IR",
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigError::UnknownBackbone(s.to_string()))
    }
}

// ─── MarginKind ───────────────────────────────────────────────────────────────
// "sphereface" has no head behind it and is rejected like any
// other unknown name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginKind {
    ArcFace,
    CosFace,
}

impl MarginKind {
    pub const ALL: [MarginKind; 2] = [MarginKind::ArcFace, MarginKind::CosFace];

    pub const NAMES: [&'static str; 2] = ["arcface", "cosface"];

    pub fn name(self) -> &'static str {
        match self {
            MarginKind::ArcFace => "arcface",
            MarginKind::CosFace => "cosface",
        }
    }
}

impl fmt::Display for MarginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MarginKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigError::UnknownMargin(s.to_string()))
    }
}

// ─── ExecutionStrategy ────────────────────────────────────────────────────────
/// Where the forward/backward passes run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    SingleDevice(usize),
    /// Data-parallel replicas; the first id is the primary device
    /// that owns the parameters and the optimizer state.
    Replicated(Vec<usize>),
}

impl ExecutionStrategy {
    /// Parse a comma-separated id list such as `"0"` or `"0,1,3"`.
    pub fn from_device_ids(list: &str) -> Result<Self, ConfigError> {
        let ids = list
            .split(',')
            .map(|id| id.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigError::InvalidDeviceList(list.to_string()))?;

        let mut seen = Vec::with_capacity(ids.len());
        for id in &ids {
            if seen.contains(id) {
                return Err(ConfigError::InvalidDeviceList(list.to_string()));
            }
            seen.push(*id);
        }

        match ids.as_slice() {
            []     => Err(ConfigError::InvalidDeviceList(list.to_string())),
            [only] => Ok(Self::SingleDevice(*only)),
            _      => Ok(Self::Replicated(ids)),
        }
    }

    pub fn device_ids(&self) -> Vec<usize> {
        match self {
            Self::SingleDevice(id) => vec![*id],
            Self::Replicated(ids)  => ids.clone(),
        }
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, Self::Replicated(_))
    }
}
