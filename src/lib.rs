//! Simulated stock-trading playground for reinforcement-learning agents.
//!
//! The crate wires a decimal-accurate portfolio simulator (slippage, fees,
//! order execution) into a gym-style environment, adds linear PPO/DQN/A2C
//! policies with JSON checkpoints, and drives everything through an async
//! orchestrator that manages concurrent, cancellable agent runs.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod market;
pub mod orchestrator;
pub mod policy;
pub mod replay;
pub mod sim;

pub use config::AppConfig;
pub use error::{Result, TradegymError};
pub use orchestrator::{AgentRunOrchestrator, RunConfig, RunMode, RunState};
