//! Linear function approximation shared by the policy implementations.
//!
//! One serializable dense layer per head, trained with explicit gradient
//! steps. Sampling and updates are deterministic under a seed.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One dense layer, weights stored row-major `[output][input]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LinearLayer {
    /// Small symmetric random init scaled by the input width
    pub fn random(input_dim: usize, output_dim: usize, rng: &mut StdRng) -> Self {
        let scale = 1.0 / (input_dim.max(1) as f64).sqrt();
        let weights = (0..output_dim)
            .map(|_| (0..input_dim).map(|_| rng.gen_range(-scale..scale)).collect())
            .collect();
        Self {
            weights,
            bias: vec![0.0; output_dim],
        }
    }

    pub fn zeros(input_dim: usize, output_dim: usize) -> Self {
        Self {
            weights: vec![vec![0.0; input_dim]; output_dim],
            bias: vec![0.0; output_dim],
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.weights.len()
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                row.iter()
                    .zip(input)
                    .map(|(w, x)| w * x)
                    .sum::<f64>()
                    + bias
            })
            .collect()
    }

    /// Gradient step on one output row: `w += step * input`, `b += step`
    pub fn nudge_row(&mut self, row: usize, input: &[f64], step: f64) {
        if let Some(weights) = self.weights.get_mut(row) {
            for (w, x) in weights.iter_mut().zip(input) {
                *w += step * x;
            }
            self.bias[row] += step;
        }
    }
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f64; logits.len()]
    }
}

pub fn sample_categorical(probs: &[f64], rng: &mut StdRng) -> usize {
    let draw: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (i, p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Entropy of a categorical distribution, in nats
pub fn entropy(probs: &[f64]) -> f64 {
    -probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// Box-Muller standard normal sample
pub fn sample_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
