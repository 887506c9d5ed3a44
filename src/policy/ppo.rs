//! Proximal Policy Optimization over linear actor and critic heads.
//!
//! Works in either action space: a softmax head over action indices for
//! DISCRETE, a Gaussian mean head squashed through tanh for CONTINUOUS.
//! Each `update` snapshots the current heads as the "old" policy, computes
//! one-step advantages with the frozen critic, normalizes them across the
//! batch, then runs `n_epochs` clipped-surrogate passes against the snapshot.

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::env::{ActionSpaceKind, AgentAction};
use crate::error::{Result, TradegymError};
use crate::replay::ReplayBatch;

use super::linear::{argmax, entropy, sample_categorical, sample_normal, softmax, LinearLayer};
use super::{ensure_checkpoint_dims, read_json, write_json_atomic, Hyperparameters, Policy};

const DEFAULT_LEARNING_RATE: f64 = 3e-4;
const DEFAULT_GAMMA: f64 = 0.99;
const DEFAULT_CLIP_EPSILON: f64 = 0.2;
const DEFAULT_VALUE_COEF: f64 = 0.5;
const DEFAULT_ENTROPY_COEF: f64 = 0.01;
const DEFAULT_N_EPOCHS: usize = 10;

/// tanh inverse saturates; continuous actions are pulled off the rails first
const SQUASH_LIMIT: f64 = 0.999;
const PROB_FLOOR: f64 = 1e-8;

#[derive(Debug, Serialize, Deserialize)]
struct PpoCheckpoint {
    actor: LinearLayer,
    critic: LinearLayer,
    log_std: Vec<f64>,
    action_space: ActionSpaceKind,
    update_count: usize,
}

#[derive(Debug)]
pub struct PpoPolicy {
    action_space: ActionSpaceKind,
    actor: LinearLayer,
    critic: LinearLayer,
    log_std: Vec<f64>,
    observation_dim: usize,
    action_dim: usize,
    learning_rate: f64,
    gamma: f64,
    clip_epsilon: f64,
    value_coef: f64,
    entropy_coef: f64,
    n_epochs: usize,
    update_count: usize,
    rng: StdRng,
}

impl PpoPolicy {
    pub fn new(
        action_space: ActionSpaceKind,
        observation_dim: usize,
        action_dim: usize,
        hyperparameters: &Hyperparameters,
        seed: Option<u64>,
    ) -> Result<Self> {
        let learning_rate = hyperparameters
            .get_f64("learning_rate")?
            .unwrap_or(DEFAULT_LEARNING_RATE);
        let gamma = hyperparameters.get_f64("gamma")?.unwrap_or(DEFAULT_GAMMA);
        let clip_epsilon = hyperparameters
            .get_f64("clip_epsilon")?
            .unwrap_or(DEFAULT_CLIP_EPSILON);
        let value_coef = hyperparameters
            .get_f64("value_coef")?
            .unwrap_or(DEFAULT_VALUE_COEF);
        let entropy_coef = hyperparameters
            .get_f64("entropy_coef")?
            .unwrap_or(DEFAULT_ENTROPY_COEF);
        let n_epochs = hyperparameters
            .get_usize("n_epochs")?
            .unwrap_or(DEFAULT_N_EPOCHS);

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
        if !(clip_epsilon > 0.0 && clip_epsilon < 1.0) {
            return Err(TradegymError::InvalidHyperparameter(format!(
                "clip_epsilon must be in (0, 1), got {clip_epsilon}"
            )));
        }
        if n_epochs == 0 {
            return Err(TradegymError::InvalidHyperparameter(
                "n_epochs must be at least 1".to_string(),
            ));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let actor = LinearLayer::random(observation_dim, action_dim, &mut rng);
        let critic = LinearLayer::random(observation_dim, 1, &mut rng);

        Ok(Self {
            action_space,
            actor,
            critic,
            log_std: vec![0.0; action_dim],
            observation_dim,
            action_dim,
            learning_rate,
            gamma,
            clip_epsilon,
            value_coef,
            entropy_coef,
            n_epochs,
            update_count: 0,
            rng,
        })
    }

    pub fn state_value(&self, observation: &[f64]) -> f64 {
        self.critic.forward(observation)[0]
    }

    /// Per-dim log density of the pre-squash Gaussian sample
    fn gaussian_log_prob(means: &[f64], log_std: &[f64], sample: &[f64]) -> f64 {
        means
            .iter()
            .zip(log_std)
            .zip(sample)
            .map(|((mean, log_std), u)| {
                let std = log_std.exp();
                let z = (u - mean) / std;
                -0.5 * z * z - log_std - 0.5 * (2.0 * std::f64::consts::PI).ln()
            })
            .sum()
    }

    /// Recover the pre-tanh sample from a stored action
    fn unsquash(values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .map(|v| v.clamp(-SQUASH_LIMIT, SQUASH_LIMIT).atanh())
            .collect()
    }

    /// Whether the clipped surrogate zeroes the policy gradient at this ratio
    fn clipped_out(&self, ratio: f64, advantage: f64) -> bool {
        (advantage >= 0.0 && ratio > 1.0 + self.clip_epsilon)
            || (advantage < 0.0 && ratio < 1.0 - self.clip_epsilon)
    }

    /// One-step TD targets and batch-normalized advantages, both computed
    /// with the pre-update critic
    fn targets_and_advantages(&self, batch: &ReplayBatch) -> (Vec<f64>, Vec<f64>) {
        let n = batch.len();
        let mut targets = Vec::with_capacity(n);
        let mut advantages = Vec::with_capacity(n);
        for i in 0..n {
            let value = self.critic.forward(&batch.observations[i])[0];
            let next_value = if batch.dones[i] {
                0.0
            } else {
                self.critic.forward(&batch.next_observations[i])[0]
            };
            let target = batch.rewards[i] + self.gamma * next_value;
            targets.push(target);
            advantages.push(target - value);
        }
        if n > 1 {
            let mean = advantages.iter().sum::<f64>() / n as f64;
            let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n as f64;
            let std = var.sqrt().max(1e-8);
            for adv in &mut advantages {
                *adv = (*adv - mean) / std;
            }
        }
        (targets, advantages)
    }

    fn step_discrete_actor(
        &mut self,
        observation: &[f64],
        action: usize,
        advantage: f64,
        ratio: f64,
    ) {
        let probs = softmax(&self.actor.forward(observation));
        let sample_entropy = entropy(&probs);
        for k in 0..self.action_dim {
            let indicator = if k == action { 1.0 } else { 0.0 };
            let surrogate = advantage * ratio * (indicator - probs[k]);
            let entropy_step = -probs[k] * (probs[k].max(1e-12).ln() + sample_entropy);
            self.actor.nudge_row(
                k,
                observation,
                self.learning_rate * (surrogate + self.entropy_coef * entropy_step),
            );
        }
    }

    fn step_continuous_actor(
        &mut self,
        observation: &[f64],
        sample: &[f64],
        advantage: f64,
        ratio: f64,
    ) {
        let means = self.actor.forward(observation);
        for k in 0..self.action_dim {
            let variance = (2.0 * self.log_std[k]).exp();
            let grad_mean = advantage * ratio * (sample[k] - means[k]) / variance;
            self.actor
                .nudge_row(k, observation, self.learning_rate * grad_mean);
        }
    }
}

impl Policy for PpoPolicy {
    fn name(&self) -> &'static str {
        "PPO"
    }

    fn select_action(&mut self, observation: &[f64], exploring: bool) -> AgentAction {
        match self.action_space {
            ActionSpaceKind::Discrete => {
                let probs = softmax(&self.actor.forward(observation));
                if exploring {
                    AgentAction::Discrete(sample_categorical(&probs, &mut self.rng))
                } else {
                    AgentAction::Discrete(argmax(&probs))
                }
            }
            ActionSpaceKind::Continuous => {
                let means = self.actor.forward(observation);
                let values = means
                    .iter()
                    .zip(&self.log_std)
                    .map(|(mean, log_std)| {
                        let raw = if exploring {
                            mean + log_std.exp() * sample_normal(&mut self.rng)
                        } else {
                            *mean
                        };
                        raw.tanh()
                    })
                    .collect();
                AgentAction::continuous(values)
            }
        }
    }

    fn update(&mut self, batch: &ReplayBatch) -> Result<HashMap<String, f64>> {
        let n = batch.len();
        if n == 0 {
            return Err(TradegymError::Validation(
                "cannot update on an empty batch".to_string(),
            ));
        }

        let old_actor = self.actor.clone();
        let (targets, advantages) = self.targets_and_advantages(batch);

        for _ in 0..self.n_epochs {
            for i in 0..n {
                let observation = &batch.observations[i];

                let value = self.critic.forward(observation)[0];
                self.critic.nudge_row(
                    0,
                    observation,
                    self.learning_rate * self.value_coef * (targets[i] - value),
                );

                match &batch.actions[i] {
                    AgentAction::Discrete(action) if *action < self.action_dim => {
                        let old_p =
                            softmax(&old_actor.forward(observation))[*action].max(PROB_FLOOR);
                        let p =
                            softmax(&self.actor.forward(observation))[*action].max(PROB_FLOOR);
                        let ratio = p / old_p;
                        if !self.clipped_out(ratio, advantages[i]) {
                            self.step_discrete_actor(observation, *action, advantages[i], ratio);
                        }
                    }
                    AgentAction::Continuous(values) if values.len() == self.action_dim => {
                        let sample = Self::unsquash(values);
                        let log_p_old = Self::gaussian_log_prob(
                            &old_actor.forward(observation),
                            &self.log_std,
                            &sample,
                        );
                        let log_p = Self::gaussian_log_prob(
                            &self.actor.forward(observation),
                            &self.log_std,
                            &sample,
                        );
                        let ratio = (log_p - log_p_old).clamp(-20.0, 20.0).exp();
                        if !self.clipped_out(ratio, advantages[i]) {
                            self.step_continuous_actor(observation, &sample, advantages[i], ratio);
                        }
                    }
                    _ => continue,
                }
            }
        }
        self.update_count += 1;

        // Post-update measurement pass
        let mut policy_loss_sum = 0.0;
        let mut value_loss_sum = 0.0;
        let mut entropy_sum = 0.0;
        for i in 0..n {
            let observation = &batch.observations[i];
            let value = self.critic.forward(observation)[0];
            value_loss_sum += (targets[i] - value).powi(2);

            let (ratio, sample_entropy) = match &batch.actions[i] {
                AgentAction::Discrete(action) if *action < self.action_dim => {
                    let old_p = softmax(&old_actor.forward(observation))[*action].max(PROB_FLOOR);
                    let probs = softmax(&self.actor.forward(observation));
                    (probs[*action].max(PROB_FLOOR) / old_p, entropy(&probs))
                }
                AgentAction::Continuous(values) if values.len() == self.action_dim => {
                    let sample = Self::unsquash(values);
                    let log_p_old = Self::gaussian_log_prob(
                        &old_actor.forward(observation),
                        &self.log_std,
                        &sample,
                    );
                    let log_p = Self::gaussian_log_prob(
                        &self.actor.forward(observation),
                        &self.log_std,
                        &sample,
                    );
                    let tau = 2.0 * std::f64::consts::PI * std::f64::consts::E;
                    let gaussian_entropy: f64 =
                        self.log_std.iter().map(|ls| ls + 0.5 * tau.ln()).sum();
                    ((log_p - log_p_old).clamp(-20.0, 20.0).exp(), gaussian_entropy)
                }
                _ => (1.0, 0.0),
            };
            let clipped = ratio.clamp(1.0 - self.clip_epsilon, 1.0 + self.clip_epsilon);
            policy_loss_sum -= (ratio * advantages[i]).min(clipped * advantages[i]);
            entropy_sum += sample_entropy;
        }
        let policy_loss = policy_loss_sum / n as f64;
        let value_loss = value_loss_sum / n as f64;
        let mean_entropy = entropy_sum / n as f64;
        let mean_reward = batch.rewards.iter().sum::<f64>() / n as f64;

        let mut metrics = HashMap::new();
        metrics.insert(
            "loss".to_string(),
            policy_loss + self.value_coef * value_loss - self.entropy_coef * mean_entropy,
        );
        metrics.insert("value_loss".to_string(), value_loss);
        metrics.insert("entropy".to_string(), mean_entropy);
        metrics.insert("reward".to_string(), mean_reward);
        Ok(metrics)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        write_json_atomic(
            path,
            &PpoCheckpoint {
                actor: self.actor.clone(),
                critic: self.critic.clone(),
                log_std: self.log_std.clone(),
                action_space: self.action_space,
                update_count: self.update_count,
            },
        )
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint: PpoCheckpoint = read_json(path)?;
        if checkpoint.action_space != self.action_space {
            return Err(TradegymError::Validation(format!(
                "PPO checkpoint is {} but the policy is configured {}",
                checkpoint.action_space, self.action_space
            )));
        }
        ensure_checkpoint_dims(
            "PPO",
            (self.observation_dim, self.action_dim),
            (checkpoint.actor.input_dim(), checkpoint.actor.output_dim()),
        )?;
        self.actor = checkpoint.actor;
        self.critic = checkpoint.critic;
        self.log_std = checkpoint.log_std;
        self.update_count = checkpoint.update_count;
        Ok(())
    }
}
