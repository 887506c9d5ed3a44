//! Experience replay for off-policy training.
//!
//! A fixed-capacity ring of transitions: pushes overwrite the oldest entry
//! once full, and batches are drawn uniformly with replacement over the
//! filled range.

use rand::{thread_rng, Rng};

use crate::env::AgentAction;
use crate::error::{Result, TradegymError};

/// One environment transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub observation: Vec<f64>,
    pub action: AgentAction,
    pub reward: f64,
    pub next_observation: Vec<f64>,
    pub done: bool,
}

impl Transition {
    pub fn new(
        observation: Vec<f64>,
        action: AgentAction,
        reward: f64,
        next_observation: Vec<f64>,
        done: bool,
    ) -> Self {
        Self {
            observation,
            action,
            reward,
            next_observation,
            done,
        }
    }
}

/// Column-wise batch of sampled transitions
#[derive(Debug, Clone)]
pub struct ReplayBatch {
    pub observations: Vec<Vec<f64>>,
    pub actions: Vec<AgentAction>,
    pub rewards: Vec<f64>,
    pub next_observations: Vec<Vec<f64>>,
    pub dones: Vec<bool>,
}

impl ReplayBatch {
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

/// Circular experience buffer with preallocated slots
#[derive(Debug)]
pub struct ReplayBuffer {
    slots: Vec<Option<Transition>>,
    position: usize,
    size: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TradegymError::Validation(
                "replay buffer capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            slots: vec![None; capacity],
            position: 0,
            size: 0,
        })
    }

    /// Store a transition, overwriting the oldest once the buffer is full
    pub fn push(&mut self, transition: Transition) {
        self.slots[self.position] = Some(transition);
        self.position = (self.position + 1) % self.slots.len();
        self.size = (self.size + 1).min(self.slots.len());
    }

    /// Draw `batch_size` transitions uniformly with replacement
    pub fn sample(&self, batch_size: usize) -> Result<ReplayBatch> {
        if self.size < batch_size {
            return Err(TradegymError::InsufficientSamples {
                requested: batch_size,
                available: self.size,
            });
        }

        let mut rng = thread_rng();
        let mut observations = Vec::with_capacity(batch_size);
        let mut actions = Vec::with_capacity(batch_size);
        let mut rewards = Vec::with_capacity(batch_size);
        let mut next_observations = Vec::with_capacity(batch_size);
        let mut dones = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let index = rng.gen_range(0..self.size);
            // Filled slots are never None within `size`
            if let Some(transition) = &self.slots[index] {
                observations.push(transition.observation.clone());
                actions.push(transition.action.clone());
                rewards.push(transition.reward);
                next_observations.push(transition.next_observation.clone());
                dones.push(transition.done);
            }
        }

        Ok(ReplayBatch {
            observations,
            actions,
            rewards,
            next_observations,
            dones,
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn fill_ratio(&self) -> f64 {
        self.size as f64 / self.slots.len() as f64
    }

    pub fn has_enough_samples(&self, min_samples: usize) -> bool {
        self.size >= min_samples
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.position = 0;
        self.size = 0;
    }
}
