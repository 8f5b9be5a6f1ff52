use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use eventbot::config::Settings;
use eventbot::engine::{Engine, Runtime};
use eventbot::events::EventBus;
use eventbot::execution::{PaperExecutor, PriceFeed, TradeExecutor};
use eventbot::notify::LogNotifier;
use eventbot::persistence::StateStore;
use eventbot::strategy::StrategyParams;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "eventbot", about = "Event-contract trading engine")]
struct Cli {
    /// Settings file (defaults to config/eventbot.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade the live feed until Ctrl+C
    Run,
    /// Print the persisted daily risk state and session history
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Status => status(settings).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("eventbot=info")),
        )
        .init();
}

async fn run(settings: Settings) -> Result<()> {
    tracing::info!("🚀 EventBot starting");

    let params = settings
        .session_params()
        .context("Cannot start a session with this configuration")?;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {}", params.symbol);
    tracing::info!("  Strategy: {}", describe_strategy(&params.strategy));
    tracing::info!("  Holding period: {}s", params.ledger.holding_secs);
    tracing::info!("  Cooldown: {}s per level", params.risk.cooldown_secs);
    tracing::info!("  Max open positions: {}", params.risk.max_open_positions);
    tracing::info!("  Daily stop-loss: {:.2}", params.risk.daily_stop_loss);

    let store: Arc<dyn StateStore> = settings
        .persistence
        .open()
        .await
        .context("Failed to open state store")?
        .into();
    let persisted = store
        .load()
        .await
        .context("Failed to read persisted state")?;
    if persisted.is_some() {
        tracing::info!("💾 Restoring persisted state");
    }

    let executor: Arc<dyn TradeExecutor> = Arc::new(PaperExecutor::new());
    let (engine, initial) =
        Engine::restore(params, executor, &settings.engine, persisted, Utc::now())
            .context("Failed to start engine")?;

    if let Some(session) = engine.active_session() {
        tracing::info!(
            session = %session.id,
            open = engine.open_count(),
            "✅ Session active ({})",
            engine.strategy_name()
        );
    }

    let feed = PriceFeed::new(&settings.symbol, settings.feed.clone())
        .context("Invalid feed configuration")?;
    let bus = EventBus::new(settings.engine.event_capacity);
    let runtime = Runtime::new(engine, store, bus, settings.engine.clone());

    let (stop_tx, stop_rx) = mpsc::channel(2);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("\n⚠️  Received Ctrl+C");
            if stop_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    runtime
        .run(
            move |tx, shutdown| feed.run(tx, shutdown),
            Box::new(LogNotifier),
            initial,
            stop_rx,
        )
        .await
        .context("Engine runtime failed")?;

    Ok(())
}

async fn status(settings: Settings) -> Result<()> {
    let store = settings
        .persistence
        .open()
        .await
        .context("Failed to open state store")?;

    let Some(state) = store.load().await.context("Failed to read persisted state")? else {
        println!("No persisted state yet");
        return Ok(());
    };

    println!("Trading day: {}", state.risk.trading_day_id);
    println!(
        "Daily P&L:   {:+.2}{}",
        state.risk.cumulative_pnl,
        if state.risk.is_halted { "  (HALTED)" } else { "" }
    );
    println!("Sessions:    {}", state.sessions.len());

    for session in &state.sessions {
        let status = if session.is_active {
            "ACTIVE".to_string()
        } else {
            session
                .stop_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "ended".to_string())
        };
        println!(
            "  {} {} {} | {} | positions {} (open {}) | net {:+.2}",
            session.id,
            session.start_time.format("%Y-%m-%d %H:%M:%S"),
            status,
            describe_strategy(&session.params.strategy),
            session.positions.len(),
            session.open_positions(),
            session.net_pnl()
        );
    }

    Ok(())
}

fn describe_strategy(strategy: &StrategyParams) -> String {
    match strategy {
        StrategyParams::StaticLevels(levels) => format!(
            "static levels {} / {:?} / {:?} / {} (stake {})",
            levels.strong_resistance,
            levels.weak_resistance,
            levels.weak_support,
            levels.strong_support,
            levels.stake
        ),
        StrategyParams::Adaptive(p) => format!(
            "adaptive RSI({}) BB({}, {}) stake {}/{}",
            p.indicators.rsi_period,
            p.indicators.bollinger_period,
            p.indicators.bollinger_k,
            p.standard_stake,
            p.extreme_stake
        ),
    }
}
