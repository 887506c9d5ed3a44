//! Deep Q-Network policy over a linear Q head.
//!
//! Discrete-only: the Q head scores every action index and selection is
//! epsilon-greedy. Updates are one-step TD against a frozen target head
//! that is re-synced every `target_update_freq` updates.

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::AgentAction;
use crate::error::{Result, TradegymError};
use crate::replay::ReplayBatch;

use super::linear::{argmax, LinearLayer};
use super::{ensure_checkpoint_dims, read_json, write_json_atomic, Hyperparameters, Policy};

const DEFAULT_LEARNING_RATE: f64 = 1e-3;
const DEFAULT_GAMMA: f64 = 0.99;
const DEFAULT_EPSILON_START: f64 = 1.0;
const DEFAULT_EPSILON_END: f64 = 0.01;
const DEFAULT_EPSILON_DECAY: f64 = 0.995;
const DEFAULT_TARGET_UPDATE_FREQ: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct DqnCheckpoint {
    q: LinearLayer,
    target: LinearLayer,
    epsilon: f64,
    update_count: usize,
}

#[derive(Debug)]
pub struct DqnPolicy {
    q: LinearLayer,
    target: LinearLayer,
    observation_dim: usize,
    action_dim: usize,
    learning_rate: f64,
    gamma: f64,
    epsilon: f64,
    epsilon_end: f64,
    epsilon_decay: f64,
    target_update_freq: usize,
    update_count: usize,
    rng: StdRng,
}

impl DqnPolicy {
    pub fn new(
        observation_dim: usize,
        action_dim: usize,
        hyperparameters: &Hyperparameters,
        seed: Option<u64>,
    ) -> Result<Self> {
        let learning_rate = hyperparameters
            .get_f64("learning_rate")?
            .unwrap_or(DEFAULT_LEARNING_RATE);
        let gamma = hyperparameters.get_f64("gamma")?.unwrap_or(DEFAULT_GAMMA);
        let epsilon = hyperparameters
            .get_f64("epsilon_start")?
            .unwrap_or(DEFAULT_EPSILON_START);
        let epsilon_end = hyperparameters
            .get_f64("epsilon_end")?
            .unwrap_or(DEFAULT_EPSILON_END);
        let epsilon_decay = hyperparameters
            .get_f64("epsilon_decay")?
            .unwrap_or(DEFAULT_EPSILON_DECAY);
        let target_update_freq = hyperparameters
            .get_usize("target_update_freq")?
            .unwrap_or(DEFAULT_TARGET_UPDATE_FREQ);

        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(TradegymError::InvalidHyperparameter(format!(
                "learning_rate must be positive, got {learning_rate}"
            )));
        }
        if !(0.0..=1.0).contains(&gamma) {
            return Err(TradegymError::InvalidHyperparameter(format!(
                "gamma must be in [0, 1], got {gamma}"
            )));
        }
        if !(0.0..=1.0).contains(&epsilon) || !(0.0..=1.0).contains(&epsilon_end) {
            return Err(TradegymError::InvalidHyperparameter(
                "epsilon_start and epsilon_end must be in [0, 1]".to_string(),
            ));
        }
        if !(epsilon_decay > 0.0 && epsilon_decay <= 1.0) {
            return Err(TradegymError::InvalidHyperparameter(format!(
                "epsilon_decay must be in (0, 1], got {epsilon_decay}"
            )));
        }
        if target_update_freq == 0 {
            return Err(TradegymError::InvalidHyperparameter(
                "target_update_freq must be at least 1".to_string(),
            ));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let q = LinearLayer::random(observation_dim, action_dim, &mut rng);
        let target = q.clone();

        Ok(Self {
            q,
            target,
            observation_dim,
            action_dim,
            learning_rate,
            gamma,
            epsilon,
            epsilon_end,
            epsilon_decay,
            target_update_freq,
            update_count: 0,
            rng,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl Policy for DqnPolicy {
    fn name(&self) -> &'static str {
        "DQN"
    }

    fn select_action(&mut self, observation: &[f64], exploring: bool) -> AgentAction {
        if exploring && self.rng.gen::<f64>() < self.epsilon {
            return AgentAction::Discrete(self.rng.gen_range(0..self.action_dim));
        }
        AgentAction::Discrete(argmax(&self.q.forward(observation)))
    }

    fn update(&mut self, batch: &ReplayBatch) -> Result<HashMap<String, f64>> {
        let mut loss_sum = 0.0;
        let mut counted = 0usize;

        for i in 0..batch.len() {
            // Off-policy buffers can hold foreign action shapes; skip them
            let action = match &batch.actions[i] {
                AgentAction::Discrete(index) if *index < self.action_dim => *index,
                _ => continue,
            };
            let observation = &batch.observations[i];
            let current = self.q.forward(observation)[action];
            let next_max = self
                .target
                .forward(&batch.next_observations[i])
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max);
            let target_value = if batch.dones[i] {
                batch.rewards[i]
            } else {
                batch.rewards[i] + self.gamma * next_max
            };
            let td_error = target_value - current;
            loss_sum += td_error * td_error;
            self.q
                .nudge_row(action, observation, self.learning_rate * td_error);
            counted += 1;
        }

        self.update_count += 1;
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_end);
        if self.update_count % self.target_update_freq == 0 {
            self.target = self.q.clone();
            debug!(update_count = self.update_count, "synced target network");
        }

        let loss = if counted > 0 {
            loss_sum / counted as f64
        } else {
            0.0
        };
        let mean_reward = if batch.is_empty() {
            0.0
        } else {
            batch.rewards.iter().sum::<f64>() / batch.len() as f64
        };

        let mut metrics = HashMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("epsilon".to_string(), self.epsilon);
        metrics.insert("reward".to_string(), mean_reward);
        Ok(metrics)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        write_json_atomic(
            path,
            &DqnCheckpoint {
                q: self.q.clone(),
                target: self.target.clone(),
                epsilon: self.epsilon,
                update_count: self.update_count,
            },
        )
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint: DqnCheckpoint = read_json(path)?;
        ensure_checkpoint_dims(
            "DQN",
            (self.observation_dim, self.action_dim),
            (checkpoint.q.input_dim(), checkpoint.q.output_dim()),
        )?;
        self.q = checkpoint.q;
        self.target = checkpoint.target;
        self.epsilon = checkpoint.epsilon;
        self.update_count = checkpoint.update_count;
        Ok(())
    }
}
