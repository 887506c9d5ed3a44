//! Decision policies and the trait the run loop drives them through.
//!
//! Three algorithms are provided (DQN, PPO, A2C), all built on the linear
//! function approximation in [`linear`]. Construction goes through
//! [`build_policy`] so callers only ever hold a `Box<dyn Policy>`; the
//! algorithm and its hyperparameters stay data, not types.

pub mod a2c;
pub mod dqn;
pub mod linear;
pub mod ppo;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::env::{ActionSpaceKind, AgentAction};
use crate::error::{Result, TradegymError};
use crate::replay::ReplayBatch;

pub use a2c::A2cPolicy;
pub use dqn::DqnPolicy;
pub use linear::LinearLayer;
pub use ppo::PpoPolicy;

/// A trainable decision policy.
///
/// `select_action` must stay cheap; it sits on the hot path of every
/// environment step. `update` owns the learning math and reports metrics
/// keyed per algorithm (every policy at least reports `loss`).
pub trait Policy: Send + std::fmt::Debug {
    /// Display name, e.g. "DQN"
    fn name(&self) -> &'static str;

    /// Choose an action for `observation`. With `exploring` the policy takes
    /// its stochastic branch; without it, the greedy one.
    fn select_action(&mut self, observation: &[f64], exploring: bool) -> AgentAction;

    /// One gradient step over `batch`, returning training metrics
    fn update(&mut self, batch: &ReplayBatch) -> Result<HashMap<String, f64>>;

    fn save_checkpoint(&self, path: &Path) -> Result<()>;

    fn load_checkpoint(&mut self, path: &Path) -> Result<()>;
}

/// Supported training algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    Ppo,
    Dqn,
    A2c,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ppo => "ppo",
            Self::Dqn => "dqn",
            Self::A2c => "a2c",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ppo => "PPO",
            Self::Dqn => "DQN",
            Self::A2c => "A2C",
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ppo" => Ok(Self::Ppo),
            "dqn" => Ok(Self::Dqn),
            "a2c" => Ok(Self::A2c),
            _ => Err("expected one of ppo, dqn, a2c"),
        }
    }
}

pub fn parse_algorithm(raw: &str) -> Result<AlgorithmKind> {
    AlgorithmKind::from_str(raw).map_err(|_| TradegymError::UnknownAlgorithm(raw.to_string()))
}

/// Hyperparameter keys accepted per algorithm; anything else is dropped by
/// [`Hyperparameters::retain_known`]
pub fn valid_keys(kind: AlgorithmKind) -> &'static [&'static str] {
    match kind {
        AlgorithmKind::Ppo => &[
            "learning_rate",
            "gamma",
            "gae_lambda",
            "clip_epsilon",
            "value_coef",
            "entropy_coef",
            "max_grad_norm",
            "n_epochs",
            "batch_size",
            "hidden_size",
            "device",
        ],
        AlgorithmKind::Dqn => &[
            "learning_rate",
            "gamma",
            "epsilon_start",
            "epsilon_end",
            "epsilon_decay",
            "target_update_freq",
            "batch_size",
            "hidden_size",
            "buffer_size",
            "device",
        ],
        AlgorithmKind::A2c => &[
            "learning_rate",
            "gamma",
            "value_coef",
            "entropy_coef",
            "max_grad_norm",
            "hidden_size",
            "device",
        ],
    }
}

/// Untyped hyperparameter bag, as received from config or an API payload.
///
/// Values stay JSON until a policy asks for them through a typed getter;
/// a present-but-mistyped value is an error, an absent one is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(HashMap<String, serde_json::Value>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, serde_json::Value>) -> Self {
        Self(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                TradegymError::InvalidHyperparameter(format!(
                    "{key} must be a number, got {value}"
                ))
            }),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => value.as_u64().map(|v| Some(v as usize)).ok_or_else(|| {
                TradegymError::InvalidHyperparameter(format!(
                    "{key} must be a non-negative integer, got {value}"
                ))
            }),
        }
    }

    /// Drop every key `kind` does not recognize. Unknown keys are not an
    /// error; callers pass whole config sections through here.
    pub fn retain_known(&mut self, kind: AlgorithmKind) {
        let allowed = valid_keys(kind);
        self.0.retain(|key, _| allowed.contains(&key.as_str()));
    }
}

/// Construct a policy for the given algorithm and action interface.
///
/// `seed` pins the weight init and every stochastic draw the policy makes;
/// `None` seeds from entropy.
pub fn build_policy(
    kind: AlgorithmKind,
    action_space: ActionSpaceKind,
    observation_dim: usize,
    action_dim: usize,
    hyperparameters: &Hyperparameters,
    seed: Option<u64>,
) -> Result<Box<dyn Policy>> {
    if observation_dim == 0 {
        return Err(TradegymError::Validation(
            "observation_dim must be positive".to_string(),
        ));
    }
    if action_dim == 0 {
        return Err(TradegymError::Validation(
            "action_dim must be positive".to_string(),
        ));
    }
    match kind {
        AlgorithmKind::Dqn => {
            if action_space == ActionSpaceKind::Continuous {
                return Err(TradegymError::Validation(
                    "DQN supports only the DISCRETE action space".to_string(),
                ));
            }
            Ok(Box::new(DqnPolicy::new(
                observation_dim,
                action_dim,
                hyperparameters,
                seed,
            )?))
        }
        AlgorithmKind::Ppo => Ok(Box::new(PpoPolicy::new(
            action_space,
            observation_dim,
            action_dim,
            hyperparameters,
            seed,
        )?)),
        AlgorithmKind::A2c => Ok(Box::new(A2cPolicy::new(
            action_space,
            observation_dim,
            action_dim,
            hyperparameters,
            seed,
        )?)),
    }
}

/// Write `value` as pretty JSON through a temp file, then rename into place
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Reject a checkpoint whose layer shapes do not match the live policy
pub(crate) fn ensure_checkpoint_dims(
    name: &str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<()> {
    if expected != found {
        return Err(TradegymError::Validation(format!(
            "{name} checkpoint dims ({}x{}) do not match configured ({}x{})",
            found.0, found.1, expected.0, expected.1
        )));
    }
    Ok(())
}
