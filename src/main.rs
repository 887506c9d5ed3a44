use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tradegym::checkpoint::Checkpointer;
use tradegym::cli::{self, Cli, Commands};
use tradegym::config::AppConfig;
use tradegym::env::parse_action_space;
use tradegym::error::{Result, TradegymError};
use tradegym::market::{build_market_source, parse_provider_kind};
use tradegym::orchestrator::{
    AgentRunOrchestrator, InMemoryMetricSink, RunConfig, RunMode, RunState, RunStatus,
};
use tradegym::policy::parse_algorithm;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Train {
            tickers,
            algorithm,
            action_space,
            episodes,
            max_steps,
            risk_profile,
            seed,
            resume,
        } => {
            init_logging();
            let app = load_app_config(&cli.config);
            let run_config = build_run_config(
                &app,
                RunMode::Train,
                tickers.as_deref(),
                algorithm,
                action_space,
                *episodes,
                *max_steps,
                risk_profile.as_deref(),
                *seed,
                *resume,
            )?;
            run_agent_mode(&app, run_config).await?;
        }
        Commands::Live {
            tickers,
            algorithm,
            action_space,
            risk_profile,
            seed,
            resume,
        } => {
            init_logging();
            let app = load_app_config(&cli.config);
            let run_config = build_run_config(
                &app,
                RunMode::Live,
                tickers.as_deref(),
                algorithm,
                action_space,
                None,
                None,
                risk_profile.as_deref(),
                *seed,
                *resume,
            )?;
            run_agent_mode(&app, run_config).await?;
        }
        Commands::Quote { tickers, seed } => {
            init_logging_simple();
            run_quote_mode(&cli.config, tickers, *seed).await?;
        }
        Commands::ValidateConfig => {
            init_logging_simple();
            run_validate_mode(&cli.config)?;
        }
    }

    Ok(())
}

fn load_app_config(config_dir: &str) -> AppConfig {
    match AppConfig::load_from(config_dir) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Using default configuration");
            AppConfig::default_config()
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_run_config(
    app: &AppConfig,
    mode: RunMode,
    tickers: Option<&str>,
    algorithm: &str,
    action_space: &str,
    episodes: Option<usize>,
    max_steps: Option<usize>,
    risk_profile: Option<&str>,
    seed: Option<u64>,
    resume: Option<Uuid>,
) -> Result<RunConfig> {
    let tickers = match tickers {
        Some(raw) => cli::parse_tickers(raw),
        None => app.simulation.tickers.clone(),
    };

    let mut env = app.simulation.env_config(tickers);
    env.action_space = parse_action_space(action_space)?;
    if let Some(max_steps) = max_steps {
        env.max_steps = max_steps;
    }
    if let Some(raw) = risk_profile {
        env.risk_profile = raw.parse()?;
    }

    let mut config = RunConfig::new(parse_algorithm(algorithm)?, mode, env);
    config.seed = seed.or(app.market.seed);
    config.resume_from = resume;
    if let Some(episodes) = episodes {
        config
            .hyperparameters
            .insert("episodes", serde_json::json!(episodes));
    }
    Ok(config)
}

/// Start one run, then wait for natural completion or Ctrl+C
async fn run_agent_mode(app: &AppConfig, run_config: RunConfig) -> Result<()> {
    let sink = Arc::new(InMemoryMetricSink::new());
    let checkpointer = Checkpointer::new(app.checkpoint.dir.clone());
    checkpointer.ensure_dir()?;
    let orchestrator =
        AgentRunOrchestrator::new(sink, checkpointer, app.training.orchestrator_config());

    let run_id = orchestrator.start(run_config).await?;
    println!("Run {} started. Press Ctrl+C to stop.", run_id);

    tokio::select! {
        _ = shutdown_signal() => {
            println!("\nStopping run {}...", run_id);
            orchestrator.stop(run_id).await?;
        }
        _ = wait_for_completion(&orchestrator, run_id) => {}
    }

    let status = orchestrator.status(run_id).await?;
    print_final_status(&status);

    if status.record.state == RunState::Failed {
        let message = status
            .record
            .error_message
            .unwrap_or_else(|| "run failed".to_string());
        return Err(TradegymError::Internal(message));
    }
    Ok(())
}

async fn wait_for_completion(orchestrator: &AgentRunOrchestrator, run_id: Uuid) {
    loop {
        match orchestrator.status(run_id).await {
            Ok(status) if status.record.state.is_terminal() => return,
            Ok(_) => tokio::time::sleep(Duration::from_millis(500)).await,
            Err(_) => return,
        }
    }
}

fn print_final_status(status: &RunStatus) {
    let record = &status.record;
    println!();
    println!("Run {} {}", record.id, record.state);
    println!(
        "  Algorithm: {} ({} actions, {} mode)",
        record.algorithm.display_name(),
        record.action_space,
        record.mode
    );
    println!("  Uptime: {}s", record.uptime().num_seconds());
    if let Some(nav) = record.final_nav {
        println!("  Final NAV: {}", nav);
    }
    if let Some(metric) = &status.latest_metric {
        println!("  Steps: {}", metric.step);
        println!("  Cumulative reward: {:.4}", metric.cumulative_reward);
        if let Some(sharpe) = metric.rolling_sharpe {
            println!("  Rolling Sharpe: {:.4}", sharpe);
        }
    }
    if let Some(err) = &record.error_message {
        println!("  \x1b[31mError: {}\x1b[0m", err);
    }
}

async fn run_quote_mode(config_dir: &str, tickers: &str, seed: Option<u64>) -> Result<()> {
    let app = load_app_config(config_dir);
    let tickers = cli::parse_tickers(tickers);
    if tickers.is_empty() {
        return Err(TradegymError::Validation("no tickers given".to_string()));
    }
    let provider = parse_provider_kind(&app.market.provider)?;
    let market = build_market_source(provider, seed.or(app.market.seed));
    cli::show_quotes(market.as_ref(), &tickers).await
}

fn run_validate_mode(config_dir: &str) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    match config.validate() {
        Ok(()) => {
            println!("\x1b[32m✓ Configuration valid\x1b[0m");
            println!("  Tickers: {}", config.simulation.tickers.join(", "));
            println!("  Provider: {}", config.market.provider);
            println!("  Episodes: {}", config.training.episodes);
            println!("  Checkpoint dir: {}", config.checkpoint.dir.display());
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("\x1b[31m✗ {}\x1b[0m", error);
            }
            Err(TradegymError::Validation(errors.join("; ")))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tradegym=debug"));

    // File logging only when a log directory is configured.
    //
    // Important: `tracing_appender::rolling::daily` will panic if it can't
    // create the initial log file, so writability is preflighted.
    let log_dir = std::env::var("TRADEGYM_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .ok();

    let file_layer = log_dir.and_then(|log_dir| {
        if std::fs::create_dir_all(&log_dir).is_err() {
            eprintln!(
                "Warning: Could not create log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }
        let test_path = std::path::Path::new(&log_dir).join(".tradegym_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                // Daily rotating file appender
                let file_appender = tracing_appender::rolling::daily(&log_dir, "tradegym.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive by leaking it (acceptable for long-running process)
                Box::leak(Box::new(guard));

                eprintln!("Logging to: {}/tradegym.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
