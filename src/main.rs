//! COINFLIP: fair-coin wagering simulator
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the saved game (or starts fresh), and runs one command
//! against it. Ctrl+C stops a continuous batch after its current round.

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coinflip::config::AppConfig;
use coinflip::engine::events::{SessionObserver, TracingObserver};
use coinflip::engine::outcome::SecureRandomSource;
use coinflip::engine::session::{ContinuousRequest, SessionController};
use coinflip::storage::{JsonFileStore, MemoryStore, PersistenceGateway};
use coinflip::types::{
    BatchSummary, BetSpec, CoinSide, GameError, PlayMode, RoundRecord, SessionProgress, BET_FEE,
};

const BANNER: &str = r#"
  ___ ___ ___ _  _ ___ _    ___ ___
 / __/ _ \_ _| \| | __| |  |_ _| _ \
| (_| (_) | || .` | _|| |__ | ||  _/
 \___\___/___|_|\_|_| |____|___|_|

  Fair-coin wagering simulator
"#;

#[derive(Debug, Parser)]
#[command(name = "coinflip", version, about = "Fair-coin wagering simulator")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show balance, counters and batch limits.
    Status,
    /// Free flips with nothing at stake.
    Test {
        #[arg(short, long, default_value_t = 1)]
        rounds: u32,
    },
    /// Place a single wager.
    Real {
        #[arg(short, long)]
        choice: CoinSide,
        #[arg(short, long, default_value_t = 100)]
        amount: u64,
    },
    /// Run a batch of identical wagers back to back.
    Continuous {
        #[arg(short, long)]
        choice: CoinSide,
        #[arg(short, long, default_value_t = 100)]
        amount: u64,
        #[arg(short, long, default_value_t = 5)]
        rounds: u32,
        /// Shorter pause between rounds (batches longer than 10 rounds).
        #[arg(long)]
        speed: bool,
    },
    /// List recent rounds, newest first.
    History {
        #[arg(short, long)]
        mode: Option<PlayMode>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Win rate, profit figures, trend and observed odds.
    Stats,
    /// Restore the starting balance and wipe stats and history.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Empty the round history.
    ClearHistory {
        /// Confirm the clear.
        #[arg(long)]
        yes: bool,
    },
}

/// Terminal front end: prints rounds and batch progress, logs the rest.
struct ConsoleObserver;

#[async_trait]
impl SessionObserver for ConsoleObserver {
    fn on_round_settled(&self, record: &RoundRecord) {
        println!("{record}");
    }

    fn on_session_progress(&self, progress: &SessionProgress) {
        println!("  {progress}");
    }

    fn on_session_complete(&self, summary: &BatchSummary) {
        TracingObserver.on_session_complete(summary);
    }

    fn on_warning(&self, warning: &GameError) {
        TracingObserver.on_warning(warning);
        eprintln!("warning: {warning}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load_or_default(&cli.config)?;

    init_logging();

    let store: Arc<dyn PersistenceGateway> = if cfg.storage.enabled {
        Arc::new(JsonFileStore::new(&cfg.storage.state_file))
    } else {
        warn!("Storage disabled, state will not outlive this process");
        Arc::new(MemoryStore::new())
    };

    let controller = SessionController::open(
        &cfg,
        Arc::new(SecureRandomSource::new()),
        store,
        Arc::new(ConsoleObserver),
    );

    run_command(&controller, cli.command).await
}

async fn run_command(ctl: &SessionController, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            println!("{BANNER}");
            let snapshot = ctl.snapshot();
            println!("Balance     : ${}", snapshot.balance);
            println!("Test flips  : {}", snapshot.test_stats);
            println!("Wagers      : {}", snapshot.real_stats);
            println!("History     : {} records", snapshot.history.len());
            println!(
                "Max rounds  : {} at $100 (fee ${BET_FEE})",
                ctl.max_rounds(100)
            );
        }
        Command::Test { rounds } => {
            let summary = ctl.play_test(rounds).await?;
            println!("{summary}");
        }
        Command::Real { choice, amount } => {
            let record = ctl.play_real(BetSpec::new(amount, choice)).await?;
            match record.is_win() {
                Some(true) => println!("You won ${}", record.profit().unwrap_or_default()),
                _ => println!("You lost ${}", record.profit().unwrap_or_default().unsigned_abs()),
            }
            println!("Balance: ${}", ctl.balance());
        }
        Command::Continuous { choice, amount, rounds, speed } => {
            let request = ContinuousRequest::new(BetSpec::new(amount, choice), rounds)
                .with_speed_mode(speed);
            let token = CancellationToken::new();

            let batch = ctl.start_continuous(request, &token);
            tokio::pin!(batch);
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);

            let summary = tokio::select! {
                result = &mut batch => result?,
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping after the current round");
                    token.cancel();
                    batch.await?
                }
            };
            println!("Batch finished: {summary}");
        }
        Command::History { mode, limit } => {
            let records = ctl.history(mode, Some(limit));
            if records.is_empty() {
                println!("No records");
            }
            for record in records {
                println!("{record}");
            }
        }
        Command::Stats => {
            println!("{}", ctl.analytics());
        }
        Command::Reset { yes } => {
            if !yes {
                println!("This wipes balance, stats and history. Re-run with --yes to confirm.");
                return Ok(());
            }
            let snapshot = ctl.reset()?;
            println!("Game reset. Balance: ${}", snapshot.balance);
        }
        Command::ClearHistory { yes } => {
            if !yes {
                println!("This empties the round history. Re-run with --yes to confirm.");
                return Ok(());
            }
            ctl.clear_history()?;
            println!("History cleared");
        }
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coinflip=info"));

    let json_logging = std::env::var("COINFLIP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
