use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::error::Result;
use crate::market::MarketDataSource;

#[derive(Parser)]
#[command(name = "tradegym")]
#[command(version = "0.1.0")]
#[command(about = "Simulated stock-trading playground for RL agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train an agent in the simulator
    Train {
        /// Tickers to trade (comma-separated, e.g. AAPL,MSFT)
        #[arg(short, long)]
        tickers: Option<String>,
        /// Algorithm (ppo, dqn, a2c)
        #[arg(short, long, default_value = "ppo")]
        algorithm: String,
        /// Action space (discrete, continuous)
        #[arg(long, default_value = "discrete")]
        action_space: String,
        /// Episodes to train (overrides config)
        #[arg(short, long)]
        episodes: Option<usize>,
        /// Steps per episode (overrides config)
        #[arg(long)]
        max_steps: Option<usize>,
        /// Risk profile (conservative, moderate, aggressive)
        #[arg(short, long)]
        risk_profile: Option<String>,
        /// Seed for reproducible runs
        #[arg(short, long)]
        seed: Option<u64>,
        /// Run id whose checkpoint warm-starts the policy
        #[arg(long)]
        resume: Option<Uuid>,
    },
    /// Run an agent on paced decisions from a trained checkpoint
    Live {
        /// Tickers to trade (comma-separated)
        #[arg(short, long)]
        tickers: Option<String>,
        /// Algorithm (ppo, dqn, a2c); must match the checkpoint
        #[arg(short, long, default_value = "ppo")]
        algorithm: String,
        /// Action space (discrete, continuous)
        #[arg(long, default_value = "discrete")]
        action_space: String,
        /// Risk profile (conservative, moderate, aggressive)
        #[arg(short, long)]
        risk_profile: Option<String>,
        /// Seed for the synthetic market
        #[arg(short, long)]
        seed: Option<u64>,
        /// Run id whose checkpoint seeds the policy
        #[arg(long)]
        resume: Option<Uuid>,
    },
    /// Fetch sample quotes from the data provider
    Quote {
        /// Tickers (comma-separated)
        tickers: String,
        /// Seed for the synthetic generator
        #[arg(short, long)]
        seed: Option<u64>,
    },
    /// Validate the configuration and exit
    ValidateConfig,
}

/// Split a comma-separated ticker list, uppercased, empties dropped
pub fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_ascii_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Print one quote row per ticker; per-ticker failures don't abort the table
pub async fn show_quotes(market: &dyn MarketDataSource, tickers: &[String]) -> Result<()> {
    println!("Provider: {}\n", market.name());
    println!(
        "{:<8} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Ticker", "Price", "Open", "High", "Low", "Volume"
    );
    for ticker in tickers {
        match market.latest_quote(ticker).await {
            Ok(quote) => println!(
                "{:<8} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12}",
                quote.ticker, quote.price, quote.open, quote.high, quote.low, quote.volume
            ),
            Err(err) => println!("{:<8} \x1b[31munavailable: {}\x1b[0m", ticker, err),
        }
    }
    Ok(())
}
