//! Agent run orchestration.
//!
//! Manages the lifecycle of concurrent agent runs:
//! - Start/stop runs (one tokio task each)
//! - Drive the train and live loops
//! - Track run state and final NAV
//! - Emit metrics through the configured sink
//!
//! The run table is the only shared mutable state. Cancellation is
//! cooperative: a shared flag checked at episode boundaries (train) or every
//! iteration (live).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::Checkpointer;
use crate::env::TradingEnvironment;
use crate::error::{Result, TradegymError};
use crate::market::{build_market_source, MarketDataSource, ProviderKind};
use crate::policy::{build_policy, Policy};
use crate::replay::{ReplayBuffer, Transition};

use super::metrics::{rolling_sharpe, MetricRecord, MetricSink};
use super::run::{RunConfig, RunMode, RunRecord, RunState, RunStatus};

/// Trailing returns feeding the rolling Sharpe metric
const SHARPE_WINDOW: usize = 20;

/// Loop cadences; per-run hyperparameters may override episodes,
/// max_steps, log_interval, batch_size, buffer_size and update_interval
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub episodes: usize,
    /// Checkpoint the policy every this many episodes
    pub checkpoint_interval: usize,
    /// Emit a training metric every this many steps
    pub log_interval: usize,
    pub live_metric_interval: usize,
    /// Pause between live decisions
    pub live_decision_interval: Duration,
    /// Yield to the scheduler every this many steps
    pub yield_every: usize,
    pub replay_capacity: usize,
    pub batch_size: usize,
    /// Attempt a policy update every this many steps
    pub update_interval: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            episodes: 100,
            checkpoint_interval: 10,
            log_interval: 25,
            live_metric_interval: 10,
            live_decision_interval: Duration::from_secs(60),
            yield_every: 100,
            replay_capacity: 10_000,
            batch_size: 64,
            update_interval: 4,
        }
    }
}

pub type MarketFactory = Arc<dyn Fn(Option<u64>) -> Arc<dyn MarketDataSource> + Send + Sync>;

/// A registered run with its task handle and cancellation flag
struct RunEntry {
    record: RunRecord,
    live: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Cadences resolved for one run, after hyperparameter overrides
#[derive(Debug, Clone, Copy)]
struct LoopParams {
    episodes: usize,
    checkpoint_interval: usize,
    log_interval: usize,
    yield_every: usize,
    batch_size: usize,
    update_interval: usize,
    live_metric_interval: u64,
    live_decision_interval: Duration,
}

/// Everything a run task owns
struct RunContext {
    run_id: Uuid,
    env: TradingEnvironment,
    policy: Box<dyn Policy>,
    sink: Arc<dyn MetricSink>,
    checkpointer: Checkpointer,
    /// Where to load weights from at startup; the run's own path unless
    /// resuming another run
    load_path: std::path::PathBuf,
    live: Arc<AtomicBool>,
    replay_capacity: usize,
    params: LoopParams,
}

enum LoopOutcome {
    Completed(Decimal),
    Stopped(Decimal),
}

/// NAV-based period returns over a sliding window
struct ReturnWindow {
    prev_nav: f64,
    returns: Vec<f64>,
}

impl ReturnWindow {
    fn new(initial_nav: f64) -> Self {
        Self {
            prev_nav: initial_nav,
            returns: Vec::with_capacity(SHARPE_WINDOW),
        }
    }

    fn push(&mut self, nav: f64) {
        if self.prev_nav > 0.0 {
            self.returns.push((nav - self.prev_nav) / self.prev_nav);
            if self.returns.len() > SHARPE_WINDOW {
                self.returns.remove(0);
            }
        }
        self.prev_nav = nav;
    }

    fn sharpe(&self) -> Option<f64> {
        rolling_sharpe(&self.returns)
    }
}

/// Record a metric and fan out the stored copy. Sink failures are logged
/// and swallowed; they never change run state.
async fn emit_metric(
    sink: &Arc<dyn MetricSink>,
    run_id: Uuid,
    step: u64,
    reward_delta: f64,
    nav: f64,
    sharpe: Option<f64>,
) {
    let record = MetricRecord::new(run_id, step, reward_delta, nav, sharpe);
    match sink.record_metric(record).await {
        Ok(stored) => {
            if let Ok(payload) = serde_json::to_value(&stored) {
                sink.publish_update(&format!("run_metrics:{run_id}"), payload);
            }
        }
        Err(err) => warn!("Run {} metric write failed: {}", run_id, err),
    }
}

/// Manages concurrent agent runs and routes their lifecycle
pub struct AgentRunOrchestrator {
    /// Registered runs
    runs: Arc<RwLock<HashMap<Uuid, RunEntry>>>,
    sink: Arc<dyn MetricSink>,
    checkpointer: Checkpointer,
    /// Builds one market source per run, seeded with the run seed
    market_factory: MarketFactory,
    config: OrchestratorConfig,
}

impl AgentRunOrchestrator {
    pub fn new(
        sink: Arc<dyn MetricSink>,
        checkpointer: Checkpointer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            sink,
            checkpointer,
            market_factory: Arc::new(|seed| build_market_source(ProviderKind::Mock, seed)),
            config,
        }
    }

    pub fn with_market_factory(mut self, factory: MarketFactory) -> Self {
        self.market_factory = factory;
        self
    }

    /// Validate, build the policy and environment, register the run and
    /// spawn its task. Construction failures leave no trace in the table.
    pub async fn start(&self, config: RunConfig) -> Result<Uuid> {
        config.validate()?;

        let hp = &config.hyperparameters;
        let episodes = hp.get_usize("episodes")?.unwrap_or(self.config.episodes);
        let log_interval = hp
            .get_usize("log_interval")?
            .unwrap_or(self.config.log_interval);
        let batch_size = hp.get_usize("batch_size")?.unwrap_or(self.config.batch_size);
        let replay_capacity = hp
            .get_usize("buffer_size")?
            .unwrap_or(self.config.replay_capacity);
        let update_interval = hp
            .get_usize("update_interval")?
            .unwrap_or(self.config.update_interval);

        let mut env_config = config.env.clone();
        if let Some(max_steps) = hp.get_usize("max_steps")? {
            env_config.max_steps = max_steps;
        }

        let mut hyperparameters = config.hyperparameters.clone();
        hyperparameters.retain_known(config.algorithm);

        let action_space = env_config.action_space;
        let market = (self.market_factory)(config.seed);
        let env = TradingEnvironment::new(env_config, market)?;
        let policy = build_policy(
            config.algorithm,
            action_space,
            env.observation_dim(),
            env.action_dim(),
            &hyperparameters,
            config.seed,
        )?;

        let run_id = Uuid::new_v4();
        let record = RunRecord::new(
            run_id,
            config.algorithm,
            config.mode,
            action_space,
            hyperparameters,
        );
        let live = Arc::new(AtomicBool::new(true));
        {
            let mut runs = self.runs.write().await;
            runs.insert(
                run_id,
                RunEntry {
                    record,
                    live: live.clone(),
                    handle: None,
                },
            );
        }

        info!(
            "Starting {} {} run {} ({} policy)",
            config.algorithm.display_name(),
            config.mode,
            run_id,
            action_space
        );

        let load_path = self
            .checkpointer
            .path_for(config.resume_from.unwrap_or(run_id));
        let ctx = RunContext {
            run_id,
            env,
            policy,
            sink: self.sink.clone(),
            checkpointer: self.checkpointer.clone(),
            load_path,
            live,
            replay_capacity: replay_capacity.max(1),
            params: LoopParams {
                episodes,
                checkpoint_interval: self.config.checkpoint_interval.max(1),
                log_interval: log_interval.max(1),
                yield_every: self.config.yield_every.max(1),
                batch_size: batch_size.max(1),
                update_interval: update_interval.max(1),
                live_metric_interval: self.config.live_metric_interval.max(1) as u64,
                live_decision_interval: self.config.live_decision_interval,
            },
        };

        let runs = self.runs.clone();
        let mode = config.mode;
        let handle = tokio::spawn(async move {
            let outcome = match mode {
                RunMode::Train => Self::train_loop(ctx).await,
                RunMode::Live => Self::live_loop(ctx).await,
            };
            let mut runs = runs.write().await;
            let Some(entry) = runs.get_mut(&run_id) else {
                return;
            };
            if entry.record.state.is_terminal() {
                return;
            }
            match outcome {
                Ok(LoopOutcome::Completed(nav)) => {
                    entry.record.state = RunState::Completed;
                    entry.record.final_nav = Some(nav);
                    info!("Run {} completed with NAV {}", run_id, nav);
                }
                Ok(LoopOutcome::Stopped(nav)) => {
                    entry.record.state = RunState::Stopped;
                    entry.record.final_nav = Some(nav);
                    info!("Run {} stopped with NAV {}", run_id, nav);
                }
                Err(err) => {
                    entry.record.state = RunState::Failed;
                    entry.record.error_message = Some(err.to_string());
                    error!("Run {} failed: {}", run_id, err);
                }
            }
            entry.record.ended_at = Some(Utc::now());
        });

        if let Some(entry) = self.runs.write().await.get_mut(&run_id) {
            entry.handle = Some(handle);
        }
        Ok(run_id)
    }

    /// Request cancellation and wait for the task to wind down. Idempotent:
    /// unknown ids and already-terminal runs are fine, and a second stop
    /// never overwrites Completed/Failed.
    pub async fn stop(&self, run_id: Uuid) -> Result<()> {
        let (live, handle) = {
            let mut runs = self.runs.write().await;
            match runs.get_mut(&run_id) {
                None => return Ok(()),
                Some(entry) => (entry.live.clone(), entry.handle.take()),
            }
        };

        live.store(false, Ordering::Relaxed);
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Run {} task join error: {}", run_id, err);
            }
        }

        let mut runs = self.runs.write().await;
        if let Some(entry) = runs.get_mut(&run_id) {
            if !entry.record.state.is_terminal() {
                entry.record.state = RunState::Stopped;
                entry.record.ended_at = Some(Utc::now());
                info!("Run {} marked stopped", run_id);
            }
        }
        Ok(())
    }

    pub async fn status(&self, run_id: Uuid) -> Result<RunStatus> {
        let record = {
            let runs = self.runs.read().await;
            runs.get(&run_id)
                .map(|entry| entry.record.clone())
                .ok_or(TradegymError::RunNotFound(run_id))?
        };
        let latest_metric = self.sink.latest(run_id).await?;
        Ok(RunStatus {
            record,
            latest_metric,
        })
    }

    pub async fn list(&self) -> Vec<RunStatus> {
        let records: Vec<RunRecord> = {
            let runs = self.runs.read().await;
            runs.values().map(|entry| entry.record.clone()).collect()
        };
        let mut statuses = Vec::with_capacity(records.len());
        for record in records {
            let latest_metric = self.sink.latest(record.id).await.unwrap_or(None);
            statuses.push(RunStatus {
                record,
                latest_metric,
            });
        }
        statuses
    }

    pub async fn stop_all(&self) {
        let run_ids: Vec<Uuid> = {
            let runs = self.runs.read().await;
            runs.keys().copied().collect()
        };
        for run_id in run_ids {
            if let Err(err) = self.stop(run_id).await {
                error!("Error stopping run {}: {}", run_id, err);
            }
        }
    }

    async fn train_loop(mut ctx: RunContext) -> Result<LoopOutcome> {
        let params = ctx.params;
        if ctx.load_path.is_file() {
            ctx.policy.load_checkpoint(&ctx.load_path)?;
            info!(
                "Run {} resumed policy from {}",
                ctx.run_id,
                ctx.load_path.display()
            );
        }
        let mut replay = ReplayBuffer::new(ctx.replay_capacity)?;
        let mut global_step: u64 = 0;
        let mut stopped = false;

        for episode in 0..params.episodes {
            if !ctx.live.load(Ordering::Relaxed) {
                info!(
                    "Run {} stop requested, exiting before episode {}",
                    ctx.run_id,
                    episode + 1
                );
                stopped = true;
                break;
            }

            let mut observation = ctx.env.reset().await;
            let episode_start_nav = ctx.env.current_nav().to_f64().unwrap_or(0.0);
            let mut window = ReturnWindow::new(episode_start_nav);
            emit_metric(&ctx.sink, ctx.run_id, global_step, 0.0, episode_start_nav, None).await;

            let mut interval_reward = 0.0;
            let mut steps_since_log = 0usize;
            let mut episode_reward = 0.0;
            let mut episode_step = 0usize;
            let mut last_nav = episode_start_nav;

            loop {
                let action = ctx.policy.select_action(&observation, true);
                let outcome = ctx.env.step(&action).await?;
                episode_step += 1;
                global_step += 1;
                last_nav = outcome.info.nav.to_f64().unwrap_or(0.0);
                window.push(last_nav);
                replay.push(Transition::new(
                    observation,
                    action,
                    outcome.reward,
                    outcome.observation.clone(),
                    outcome.done,
                ));
                observation = outcome.observation;
                interval_reward += outcome.reward;
                episode_reward += outcome.reward;
                steps_since_log += 1;

                if episode_step % params.update_interval == 0 && replay.len() >= params.batch_size
                {
                    let batch = replay.sample(params.batch_size)?;
                    let metrics = ctx.policy.update(&batch)?;
                    if let Some(loss) = metrics.get("loss") {
                        debug!("Run {} step {} loss {:.6}", ctx.run_id, global_step, loss);
                    }
                }
                if steps_since_log >= params.log_interval {
                    emit_metric(
                        &ctx.sink,
                        ctx.run_id,
                        global_step,
                        interval_reward,
                        last_nav,
                        window.sharpe(),
                    )
                    .await;
                    interval_reward = 0.0;
                    steps_since_log = 0;
                }
                if episode_step % params.yield_every == 0 {
                    tokio::task::yield_now().await;
                }
                if outcome.done {
                    break;
                }
            }

            if steps_since_log > 0 {
                emit_metric(
                    &ctx.sink,
                    ctx.run_id,
                    global_step,
                    interval_reward,
                    last_nav,
                    window.sharpe(),
                )
                .await;
            }
            info!(
                "Run {} episode {}/{} finished: {} steps, reward {:.4}",
                ctx.run_id,
                episode + 1,
                params.episodes,
                episode_step,
                episode_reward
            );

            if (episode + 1) % params.checkpoint_interval == 0 {
                let path = ctx.checkpointer.path_for(ctx.run_id);
                ctx.policy.save_checkpoint(&path)?;
                debug!("Run {} checkpointed to {}", ctx.run_id, path.display());
            }
        }

        let final_nav = ctx.env.current_nav();
        if stopped {
            Ok(LoopOutcome::Stopped(final_nav))
        } else {
            ctx.policy
                .save_checkpoint(&ctx.checkpointer.path_for(ctx.run_id))?;
            Ok(LoopOutcome::Completed(final_nav))
        }
    }

    async fn live_loop(mut ctx: RunContext) -> Result<LoopOutcome> {
        let params = ctx.params;
        let path = ctx.load_path.clone();
        if path.is_file() {
            ctx.policy.load_checkpoint(&path)?;
            info!("Run {} loaded checkpoint {}", ctx.run_id, path.display());
        } else {
            info!(
                "Run {} has no checkpoint, starting from initial weights",
                ctx.run_id
            );
        }

        let mut observation = ctx.env.reset().await;
        let mut window = ReturnWindow::new(ctx.env.current_nav().to_f64().unwrap_or(0.0));
        let mut step: u64 = 0;
        let mut interval_reward = 0.0;

        while ctx.live.load(Ordering::Relaxed) {
            let action = ctx.policy.select_action(&observation, false);
            let outcome = ctx.env.step(&action).await?;
            step += 1;
            let nav = outcome.info.nav.to_f64().unwrap_or(0.0);
            window.push(nav);
            interval_reward += outcome.reward;

            if step % params.live_metric_interval == 0 {
                emit_metric(
                    &ctx.sink,
                    ctx.run_id,
                    step,
                    interval_reward,
                    nav,
                    window.sharpe(),
                )
                .await;
                interval_reward = 0.0;
            }

            if outcome.done {
                info!(
                    "Run {} live episode ended at step {}, resetting",
                    ctx.run_id, step
                );
                observation = ctx.env.reset().await;
                window = ReturnWindow::new(ctx.env.current_nav().to_f64().unwrap_or(0.0));
            } else {
                observation = outcome.observation;
            }

            tokio::time::sleep(params.live_decision_interval).await;
        }

        info!("Run {} live loop exiting on stop", ctx.run_id);
        Ok(LoopOutcome::Stopped(ctx.env.current_nav()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvConfig;
    use crate::orchestrator::metrics::InMemoryMetricSink;
    use crate::policy::AlgorithmKind;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            episodes: 2,
            checkpoint_interval: 1,
            log_interval: 2,
            live_metric_interval: 1,
            live_decision_interval: Duration::from_millis(2),
            yield_every: 50,
            replay_capacity: 500,
            batch_size: 4,
            update_interval: 2,
        }
    }

    fn small_env() -> EnvConfig {
        EnvConfig {
            tickers: vec!["AAPL".to_string()],
            max_steps: 5,
            lookback_window: 5,
            ..EnvConfig::default()
        }
    }

    fn build_orchestrator() -> (AgentRunOrchestrator, Arc<InMemoryMetricSink>, Checkpointer) {
        let sink = Arc::new(InMemoryMetricSink::new());
        let dir = std::env::temp_dir().join(format!("orch-test-{}", Uuid::new_v4()));
        let checkpointer = Checkpointer::new(dir);
        let orchestrator =
            AgentRunOrchestrator::new(sink.clone(), checkpointer.clone(), fast_config());
        (orchestrator, sink, checkpointer)
    }

    async fn wait_terminal(orchestrator: &AgentRunOrchestrator, run_id: Uuid) -> RunStatus {
        for _ in 0..500 {
            let status = orchestrator.status(run_id).await.unwrap();
            if status.record.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn train_run_completes_and_checkpoints() {
        let (orchestrator, sink, checkpointer) = build_orchestrator();
        let config = RunConfig::new(AlgorithmKind::Dqn, RunMode::Train, small_env());
        let run_id = orchestrator.start(config).await.unwrap();

        let status = wait_terminal(&orchestrator, run_id).await;
        assert_eq!(status.record.state, RunState::Completed);
        assert!(status.record.final_nav.is_some());
        assert!(status.record.ended_at.is_some());
        assert!(status.latest_metric.is_some());
        assert!(checkpointer.exists(run_id));

        let history = sink.history(run_id).await;
        assert!(!history.is_empty());
        assert_eq!(history[0].step, 0);
        assert_eq!(history[0].reward_delta, 0.0);

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }

    #[tokio::test]
    async fn stop_preserves_completed_state() {
        let (orchestrator, _sink, checkpointer) = build_orchestrator();
        let config = RunConfig::new(AlgorithmKind::A2c, RunMode::Train, small_env());
        let run_id = orchestrator.start(config).await.unwrap();
        wait_terminal(&orchestrator, run_id).await;

        orchestrator.stop(run_id).await.unwrap();
        orchestrator.stop(run_id).await.unwrap();
        let status = orchestrator.status(run_id).await.unwrap();
        assert_eq!(status.record.state, RunState::Completed);

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }

    #[tokio::test]
    async fn live_run_stops_on_request() {
        let (orchestrator, _sink, checkpointer) = build_orchestrator();
        let config = RunConfig::new(AlgorithmKind::Ppo, RunMode::Live, small_env());
        let run_id = orchestrator.start(config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let status = orchestrator.status(run_id).await.unwrap();
        assert_eq!(status.record.state, RunState::Running);

        orchestrator.stop(run_id).await.unwrap();
        let status = orchestrator.status(run_id).await.unwrap();
        assert_eq!(status.record.state, RunState::Stopped);
        assert!(status.record.final_nav.is_some());

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }

    #[tokio::test]
    async fn mid_run_stop_exits_at_an_episode_boundary() {
        let (orchestrator, _sink, checkpointer) = build_orchestrator();
        let mut config = RunConfig::new(AlgorithmKind::Dqn, RunMode::Train, small_env());
        config.env.max_steps = 50;
        config.hyperparameters.insert("episodes", json!(10_000));
        let run_id = orchestrator.start(config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator.stop(run_id).await.unwrap();
        let status = orchestrator.status(run_id).await.unwrap();
        assert_eq!(status.record.state, RunState::Stopped);

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }

    #[tokio::test]
    async fn live_run_resumes_from_a_trained_checkpoint() {
        let (orchestrator, _sink, checkpointer) = build_orchestrator();
        let train = RunConfig::new(AlgorithmKind::Dqn, RunMode::Train, small_env());
        let trained_id = orchestrator.start(train).await.unwrap();
        wait_terminal(&orchestrator, trained_id).await;
        assert!(checkpointer.exists(trained_id));

        let mut live = RunConfig::new(AlgorithmKind::Dqn, RunMode::Live, small_env());
        live.resume_from = Some(trained_id);
        let live_id = orchestrator.start(live).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        orchestrator.stop(live_id).await.unwrap();

        // A load failure would have marked the run Failed
        let status = orchestrator.status(live_id).await.unwrap();
        assert_eq!(status.record.state, RunState::Stopped);

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }

    #[tokio::test]
    async fn construction_failures_never_register() {
        let (orchestrator, _sink, _checkpointer) = build_orchestrator();
        let mut config = RunConfig::new(AlgorithmKind::Dqn, RunMode::Train, small_env());
        config.hyperparameters.insert("gamma", json!(5.0));
        let err = orchestrator.start(config).await.unwrap_err();
        assert!(matches!(err, TradegymError::InvalidHyperparameter(_)));
        assert!(orchestrator.list().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_run_id_surfaces_run_not_found() {
        let (orchestrator, _sink, _checkpointer) = build_orchestrator();
        let missing = Uuid::new_v4();
        let err = orchestrator.status(missing).await.unwrap_err();
        assert!(matches!(err, TradegymError::RunNotFound(id) if id == missing));
        // stop on an unknown id is treated as cleanup
        tokio_test::assert_ok!(orchestrator.stop(missing).await);
    }

    #[tokio::test]
    async fn list_reports_every_registered_run() {
        let (orchestrator, _sink, checkpointer) = build_orchestrator();
        let first = orchestrator
            .start(RunConfig::new(AlgorithmKind::Dqn, RunMode::Train, small_env()))
            .await
            .unwrap();
        let second = orchestrator
            .start(RunConfig::new(AlgorithmKind::A2c, RunMode::Train, small_env()))
            .await
            .unwrap();

        let listed = orchestrator.list().await;
        assert_eq!(listed.len(), 2);
        let ids: Vec<Uuid> = listed.iter().map(|s| s.record.id).collect();
        assert!(ids.contains(&first) && ids.contains(&second));

        wait_terminal(&orchestrator, first).await;
        wait_terminal(&orchestrator, second).await;
        orchestrator.stop_all().await;

        std::fs::remove_dir_all(checkpointer.root()).ok();
    }
}
