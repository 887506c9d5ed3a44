//! Advantage Actor-Critic over linear heads.
//!
//! The simplest of the three algorithms: a single score-function pass per
//! batch, one-step advantages, no trust region.

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

const DEFAULT_LEARNING_RATE: f64 = 7e-4;
const DEFAULT_GAMMA: f64 = 0.99;
const DEFAULT_VALUE_COEF: f64 = 0.5;
const DEFAULT_ENTROPY_COEF: f64 = 0.01;

const SQUASH_LIMIT: f64 = 0.999;

#[derive(Debug, Serialize, Deserialize)]
struct A2cCheckpoint {
    actor: LinearLayer,
    critic: LinearLayer,
    log_std: Vec<f64>,
    action_space: ActionSpaceKind,
    update_count: usize,
}

#[derive(Debug)]
pub struct A2cPolicy {
    action_space: ActionSpaceKind,
    actor: LinearLayer,
    critic: LinearLayer,
    log_std: Vec<f64>,
    observation_dim: usize,
    action_dim: usize,
    learning_rate: f64,
    gamma: f64,
    value_coef: f64,
    entropy_coef: f64,
    update_count: usize,
    rng: StdRng,
}

impl A2cPolicy {
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
        let value_coef = hyperparameters
            .get_f64("value_coef")?
            .unwrap_or(DEFAULT_VALUE_COEF);
        let entropy_coef = hyperparameters
            .get_f64("entropy_coef")?
            .unwrap_or(DEFAULT_ENTROPY_COEF);

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
            value_coef,
            entropy_coef,
            update_count: 0,
            rng,
        })
    }

    pub fn state_value(&self, observation: &[f64]) -> f64 {
        self.critic.forward(observation)[0]
    }
}

impl Policy for A2cPolicy {
    fn name(&self) -> &'static str {
        "A2C"
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

        let mut actor_loss_sum = 0.0;
        let mut critic_loss_sum = 0.0;
        let mut entropy_sum = 0.0;

        for i in 0..n {
            let observation = &batch.observations[i];
            let value = self.critic.forward(observation)[0];
            let next_value = if batch.dones[i] {
                0.0
            } else {
                self.critic.forward(&batch.next_observations[i])[0]
            };
            let target = batch.rewards[i] + self.gamma * next_value;
            let advantage = target - value;
            critic_loss_sum += advantage * advantage;
            self.critic.nudge_row(
                0,
                observation,
                self.learning_rate * self.value_coef * advantage,
            );

            match &batch.actions[i] {
                AgentAction::Discrete(action) if *action < self.action_dim => {
                    let probs = softmax(&self.actor.forward(observation));
                    let sample_entropy = entropy(&probs);
                    actor_loss_sum -= probs[*action].max(1e-12).ln() * advantage;
                    entropy_sum += sample_entropy;
                    for k in 0..self.action_dim {
                        let indicator = if k == *action { 1.0 } else { 0.0 };
                        let score = advantage * (indicator - probs[k]);
                        let entropy_step =
                            -probs[k] * (probs[k].max(1e-12).ln() + sample_entropy);
                        self.actor.nudge_row(
                            k,
                            observation,
                            self.learning_rate * (score + self.entropy_coef * entropy_step),
                        );
                    }
                }
                AgentAction::Continuous(values) if values.len() == self.action_dim => {
                    let sample: Vec<f64> = values
                        .iter()
                        .map(|v| v.clamp(-SQUASH_LIMIT, SQUASH_LIMIT).atanh())
                        .collect();
                    let means = self.actor.forward(observation);
                    let mut log_prob = 0.0;
                    for k in 0..self.action_dim {
                        let std = self.log_std[k].exp();
                        let z = (sample[k] - means[k]) / std;
                        log_prob += -0.5 * z * z
                            - self.log_std[k]
                            - 0.5 * (2.0 * std::f64::consts::PI).ln();
                        self.actor.nudge_row(
                            k,
                            observation,
                            self.learning_rate * advantage * (sample[k] - means[k])
                                / (std * std),
                        );
                    }
                    actor_loss_sum -= log_prob * advantage;
                    entropy_sum += self
                        .log_std
                        .iter()
                        .map(|ls| {
                            ls + 0.5 * (2.0 * std::f64::consts::PI * std::f64::consts::E).ln()
                        })
                        .sum::<f64>();
                }
                _ => continue,
            }
        }
        self.update_count += 1;

        let mut metrics = HashMap::new();
        metrics.insert("loss".to_string(), actor_loss_sum / n as f64);
        metrics.insert("critic_loss".to_string(), critic_loss_sum / n as f64);
        metrics.insert("entropy".to_string(), entropy_sum / n as f64);
        metrics.insert(
            "reward".to_string(),
            batch.rewards.iter().sum::<f64>() / n as f64,
        );
        Ok(metrics)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        write_json_atomic(
            path,
            &A2cCheckpoint {
                actor: self.actor.clone(),
                critic: self.critic.clone(),
                log_std: self.log_std.clone(),
                action_space: self.action_space,
                update_count: self.update_count,
            },
        )
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint: A2cCheckpoint = read_json(path)?;
        if checkpoint.action_space != self.action_space {
            return Err(TradegymError::Validation(format!(
                "A2C checkpoint is {} but the policy is configured {}",
                checkpoint.action_space, self.action_space
            )));
        }
        ensure_checkpoint_dims(
            "A2C",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete_policy() -> A2cPolicy {
        A2cPolicy::new(
            ActionSpaceKind::Discrete,
            2,
            3,
            &Hyperparameters::new(),
            Some(31),
        )
        .unwrap()
    }

    fn rewarding_batch(action: AgentAction) -> ReplayBatch {
        ReplayBatch {
            observations: vec![vec![1.0, 0.5]],
            actions: vec![action],
            rewards: vec![1.0],
            next_observations: vec![vec![0.5, 1.0]],
            dones: vec![true],
        }
    }

    #[test]
    fn greedy_selection_is_argmax() {
        let mut policy = discrete_policy();
        policy.actor = LinearLayer {
            weights: vec![vec![0.0, 0.0], vec![-1.0, -1.0], vec![3.0, 0.0]],
            bias: vec![0.0; 3],
        };
        assert_eq!(
            policy.select_action(&[1.0, 1.0], false),
            AgentAction::Discrete(2)
        );
    }

    #[test]
    fn sampled_selection_stays_inside_the_action_space() {
        let mut policy = discrete_policy();
        for _ in 0..50 {
            match policy.select_action(&[0.3, -0.3], true) {
                AgentAction::Discrete(index) => assert!(index < 3),
                other => panic!("unexpected action {other:?}"),
            }
        }
    }

    #[test]
    fn positive_advantage_raises_action_probability() {
        let mut policy = discrete_policy();
        policy.critic = LinearLayer::zeros(2, 1);
        let batch = rewarding_batch(AgentAction::Discrete(2));
        let observation = batch.observations[0].clone();
        let before = softmax(&policy.actor.forward(&observation))[2];
        for _ in 0..10 {
            policy.update(&batch).unwrap();
        }
        let after = softmax(&policy.actor.forward(&observation))[2];
        assert!(after > before, "probability fell from {before} to {after}");
    }

    #[test]
    fn critic_regresses_to_the_observed_return() {
        let mut hp = Hyperparameters::new();
        hp.insert("learning_rate", serde_json::json!(0.05));
        let mut policy =
            A2cPolicy::new(ActionSpaceKind::Discrete, 2, 3, &hp, Some(3)).unwrap();
        let batch = rewarding_batch(AgentAction::Discrete(0));
        for _ in 0..300 {
            policy.update(&batch).unwrap();
        }
        let value = policy.state_value(&batch.observations[0]);
        assert!((value - 1.0).abs() < 0.05, "value stuck at {value}");
    }

    #[test]
    fn continuous_update_tracks_the_rewarded_direction() {
        let mut policy = A2cPolicy::new(
            ActionSpaceKind::Continuous,
            2,
            1,
            &Hyperparameters::new(),
            Some(17),
        )
        .unwrap();
        policy.critic = LinearLayer::zeros(2, 1);
        let batch = rewarding_batch(AgentAction::Continuous(vec![0.7]));
        let observation = batch.observations[0].clone();
        let target = 0.7f64;
        let gap_before = (policy.actor.forward(&observation)[0].tanh() - target).abs();
        for _ in 0..50 {
            policy.update(&batch).unwrap();
        }
        let gap_after = (policy.actor.forward(&observation)[0].tanh() - target).abs();
        assert!(gap_after < gap_before);
    }

    #[test]
    fn update_reports_the_expected_metrics() {
        let mut policy = discrete_policy();
        let metrics = policy
            .update(&rewarding_batch(AgentAction::Discrete(1)))
            .unwrap();
        for key in ["loss", "critic_loss", "entropy", "reward"] {
            assert!(metrics.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn mismatched_actions_are_skipped() {
        let mut policy = discrete_policy();
        let batch = rewarding_batch(AgentAction::Continuous(vec![0.1, 0.2]));
        let weights_before = policy.actor.weights.clone();
        policy.update(&batch).unwrap();
        assert_eq!(policy.actor.weights, weights_before);
    }

    #[test]
    fn checkpoint_round_trips_and_checks_space() {
        let dir = std::env::temp_dir().join(format!("a2c-ckpt-{}", uuid::Uuid::new_v4()));
        let path = dir.join("agent.json");
        let mut policy = discrete_policy();
        policy
            .update(&rewarding_batch(AgentAction::Discrete(0)))
            .unwrap();
        policy.save_checkpoint(&path).unwrap();

        let mut restored = discrete_policy();
        restored.load_checkpoint(&path).unwrap();
        assert_eq!(restored.actor.weights, policy.actor.weights);
        assert_eq!(restored.update_count, policy.update_count);

        let mut wrong_space = A2cPolicy::new(
            ActionSpaceKind::Continuous,
            2,
            3,
            &Hyperparameters::new(),
            Some(1),
        )
        .unwrap();
        assert!(wrong_space.load_checkpoint(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
