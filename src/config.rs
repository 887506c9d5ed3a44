use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::env::{ActionSpaceKind, EnvConfig};
use crate::market::parse_provider_kind;
use crate::orchestrator::OrchestratorConfig;
use crate::sim::RiskProfile;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Tickers traded when the CLI does not name any
    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,
    /// Starting cash per episode
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Steps per episode before truncation
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Price history rows kept per ticker for observations
    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,
    #[serde(default)]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub action_space: ActionSpaceKind,
}

fn default_tickers() -> Vec<String> {
    vec!["AAPL".to_string(), "GOOGL".to_string(), "MSFT".to_string()]
}

fn default_initial_cash() -> Decimal {
    dec!(10_000)
}

fn default_max_steps() -> usize {
    1_000
}

fn default_lookback_window() -> usize {
    30
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tickers: default_tickers(),
            initial_cash: default_initial_cash(),
            max_steps: default_max_steps(),
            lookback_window: default_lookback_window(),
            risk_profile: RiskProfile::default(),
            action_space: ActionSpaceKind::default(),
        }
    }
}

impl SimulationConfig {
    /// Environment parameters for a run trading `tickers`
    pub fn env_config(&self, tickers: Vec<String>) -> EnvConfig {
        EnvConfig {
            tickers,
            initial_cash: self.initial_cash,
            max_steps: self.max_steps,
            lookback_window: self.lookback_window,
            risk_profile: self.risk_profile,
            action_space: self.action_space,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Market data provider ("mock")
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Seed for the synthetic price generator; unset means entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_provider() -> String {
    "mock".to_string()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Episodes per training run
    #[serde(default = "default_episodes")]
    pub episodes: usize,
    /// Checkpoint every N episodes
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Emit a training metric every N steps
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// Transitions per policy update
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Replay buffer slots
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Attempt a policy update every N steps
    #[serde(default = "default_update_interval")]
    pub update_interval: usize,
    /// Emit a live metric every N decisions
    #[serde(default = "default_live_metric_interval")]
    pub live_metric_interval: usize,
    /// Seconds between live decisions
    #[serde(default = "default_live_decision_secs")]
    pub live_decision_secs: u64,
}

fn default_episodes() -> usize {
    100
}

fn default_checkpoint_interval() -> usize {
    10
}

fn default_log_interval() -> usize {
    25
}

fn default_batch_size() -> usize {
    64
}

fn default_replay_capacity() -> usize {
    10_000
}

fn default_update_interval() -> usize {
    4
}

fn default_live_metric_interval() -> usize {
    10
}

fn default_live_decision_secs() -> u64 {
    60
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: default_episodes(),
            checkpoint_interval: default_checkpoint_interval(),
            log_interval: default_log_interval(),
            batch_size: default_batch_size(),
            replay_capacity: default_replay_capacity(),
            update_interval: default_update_interval(),
            live_metric_interval: default_live_metric_interval(),
            live_decision_secs: default_live_decision_secs(),
        }
    }
}

impl TrainingConfig {
    /// Loop cadences for the orchestrator
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            episodes: self.episodes,
            checkpoint_interval: self.checkpoint_interval,
            log_interval: self.log_interval,
            live_metric_interval: self.live_metric_interval,
            live_decision_interval: Duration::from_secs(self.live_decision_secs),
            yield_every: OrchestratorConfig::default().yield_every,
            replay_capacity: self.replay_capacity,
            batch_size: self.batch_size,
            update_interval: self.update_interval,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding per-run policy checkpoints
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("market.provider", "mock")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGYM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADEGYM_SIMULATION__MAX_STEPS, etc.)
            .add_source(
                Environment::with_prefix("TRADEGYM")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Baseline configuration for CLI usage without any config file
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.simulation.tickers.is_empty() {
            errors.push("simulation.tickers must not be empty".to_string());
        }
        if self.simulation.initial_cash <= Decimal::ZERO {
            errors.push("simulation.initial_cash must be positive".to_string());
        }
        if self.simulation.max_steps == 0 {
            errors.push("simulation.max_steps must be positive".to_string());
        }
        if self.simulation.lookback_window == 0 {
            errors.push("simulation.lookback_window must be positive".to_string());
        }

        if parse_provider_kind(&self.market.provider).is_err() {
            errors.push(format!(
                "market.provider must be \"mock\", got \"{}\"",
                self.market.provider
            ));
        }

        if self.training.episodes == 0 {
            errors.push("training.episodes must be positive".to_string());
        }
        if self.training.batch_size == 0 {
            errors.push("training.batch_size must be positive".to_string());
        }
        if self.training.batch_size > self.training.replay_capacity {
            errors.push(format!(
                "training.batch_size ({}) exceeds training.replay_capacity ({})",
                self.training.batch_size, self.training.replay_capacity
            ));
        }
        if self.training.live_decision_secs == 0 {
            errors.push("training.live_decision_secs must be positive".to_string());
        }

        if self.checkpoint.dir.as_os_str().is_empty() {
            errors.push("checkpoint.dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = AppConfig::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = AppConfig::default_config();
        config.simulation.tickers.clear();
        config.market.provider = "bloomberg".to_string();
        config.training.batch_size = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tickers")));
        assert!(errors.iter().any(|e| e.contains("bloomberg")));
        assert!(errors.iter().any(|e| e.contains("batch_size")));
    }

    #[test]
    fn batch_size_cannot_exceed_replay_capacity() {
        let mut config = AppConfig::default_config();
        config.training.batch_size = 512;
        config.training.replay_capacity = 128;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("replay_capacity"));
    }

    #[test]
    fn simulation_section_maps_onto_env_config() {
        let simulation = SimulationConfig::default();
        let env = simulation.env_config(vec!["TSLA".to_string()]);
        assert_eq!(env.tickers, vec!["TSLA".to_string()]);
        assert_eq!(env.initial_cash, dec!(10_000));
        assert_eq!(env.max_steps, 1_000);
        assert_eq!(env.lookback_window, 30);
    }

    #[test]
    fn training_section_maps_onto_orchestrator_config() {
        let training = TrainingConfig {
            live_decision_secs: 5,
            ..TrainingConfig::default()
        };
        let orchestrator = training.orchestrator_config();
        assert_eq!(orchestrator.episodes, 100);
        assert_eq!(orchestrator.live_decision_interval, Duration::from_secs(5));
        assert_eq!(orchestrator.batch_size, 64);
    }
}
