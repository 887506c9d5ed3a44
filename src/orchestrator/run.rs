//! Run lifecycle records.
//!
//! A run is one policy attached to one environment, training or live.
//! Records are created by the orchestrator at start and mutated only by it;
//! the terminal states are never overwritten.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::env::{ActionSpaceKind, EnvConfig};
use crate::error::{Result, TradegymError};
use crate::policy::{AlgorithmKind, Hyperparameters};

use super::metrics::MetricRecord;

/// What the run loop does with the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Explore, learn, checkpoint
    Train,
    /// Greedy decisions on a cadence, no learning
    Live,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Live => "live",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "train" | "training" => Ok(Self::Train),
            "live" => Ok(Self::Live),
            _ => Err("expected train or live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
    Failed,
    Completed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Terminal states are never overwritten
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to start a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub algorithm: AlgorithmKind,
    pub mode: RunMode,
    pub env: EnvConfig,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Earlier run whose checkpoint seeds this run's policy
    #[serde(default)]
    pub resume_from: Option<Uuid>,
}

impl RunConfig {
    pub fn new(algorithm: AlgorithmKind, mode: RunMode, env: EnvConfig) -> Self {
        Self {
            algorithm,
            mode,
            env,
            hyperparameters: Hyperparameters::new(),
            seed: None,
            resume_from: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.env.validate()
    }
}

/// Persistent view of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub algorithm: AlgorithmKind,
    pub mode: RunMode,
    pub action_space: ActionSpaceKind,
    pub state: RunState,
    /// Hyperparameters after algorithm filtering, as the policy saw them
    pub hyperparameters: Hyperparameters,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_nav: Option<Decimal>,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn new(
        id: Uuid,
        algorithm: AlgorithmKind,
        mode: RunMode,
        action_space: ActionSpaceKind,
        hyperparameters: Hyperparameters,
    ) -> Self {
        Self {
            id,
            algorithm,
            mode,
            action_space,
            state: RunState::Running,
            hyperparameters,
            started_at: Utc::now(),
            ended_at: None,
            final_nav: None,
            error_message: None,
        }
    }

    pub fn uptime(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Record plus the freshest metric, as returned by status/list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub record: RunRecord,
    pub latest_metric: Option<MetricRecord>,
}

pub fn parse_run_mode(raw: &str) -> Result<RunMode> {
    RunMode::from_str(raw).map_err(|e| TradegymError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_parses_both_directions() {
        assert_eq!(parse_run_mode("TRAIN").unwrap(), RunMode::Train);
        assert_eq!(parse_run_mode("live").unwrap(), RunMode::Live);
        assert!(parse_run_mode("replay").is_err());
        assert_eq!(RunMode::Train.to_string(), "train");
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunState::Running.is_terminal());
        for state in [RunState::Stopped, RunState::Failed, RunState::Completed] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn new_records_start_running_and_open_ended() {
        let record = RunRecord::new(
            Uuid::new_v4(),
            AlgorithmKind::Dqn,
            RunMode::Train,
            ActionSpaceKind::Discrete,
            Hyperparameters::new(),
        );
        assert_eq!(record.state, RunState::Running);
        assert!(record.ended_at.is_none());
        assert!(record.final_nav.is_none());
        assert!(record.error_message.is_none());
    }
}
