use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use kiwoom_trader::api::client::KiwoomClient;
use kiwoom_trader::api::BrokerApi;
use kiwoom_trader::config::{ApiConfig, AppConfig, RiskLimits, TelegramConfig};
use kiwoom_trader::engine::TradingEngine;
use kiwoom_trader::execution::{OrderCoordinator, PositionCache, RiskGate};
use kiwoom_trader::notify::{LogNotifier, Notifier, TelegramNotifier};
use kiwoom_trader::scheduler::{MarketCalendar, TradingScheduler};
use kiwoom_trader::storage::{MemoryRepository, Repository};
use kiwoom_trader::strategy::{RsiStrategy, Strategy};

#[derive(Parser, Debug)]
#[command(author, version, about = "Automated Kiwoom order execution bot")]
struct Args {
    /// Kiwoom REST API base URL (mock investment endpoint by default)
    #[arg(long, env = "KIWOOM_BASE_URL", default_value = "https://mockapi.kiwoom.com")]
    base_url: String,

    /// Application key issued by the broker
    #[arg(long, env = "KIWOOM_APP_KEY", default_value = "")]
    app_key: String,

    /// Application secret issued by the broker
    #[arg(long, env = "KIWOOM_APP_SECRET", default_value = "")]
    app_secret: String,

    /// Brokerage account number
    #[arg(long, env = "KIWOOM_ACCOUNT_NUMBER", default_value = "")]
    account_number: String,

    /// Symbols to trade (comma-separated)
    #[arg(long, env = "SYMBOLS", default_value = "005930,000660,035420")]
    symbols: String,

    /// Submit real orders instead of filling them locally
    #[arg(long, env = "LIVE_TRADING", default_value_t = false)]
    live: bool,

    /// Seconds between execution cycles
    #[arg(long, env = "TICK_INTERVAL_SECS", default_value_t = 60)]
    tick_interval: u64,

    /// Max notional held in a single symbol (KRW)
    #[arg(long, env = "MAX_POSITION_NOTIONAL", default_value_t = 1_000_000.0)]
    max_position_notional: f64,

    /// Max aggregate notional across all symbols (KRW)
    #[arg(long, env = "MAX_TOTAL_EXPOSURE", default_value_t = 5_000_000.0)]
    max_total_exposure: f64,

    /// Telegram bot token (notifications disabled when empty)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", default_value = "")]
    telegram_bot_token: String,

    /// Telegram chat id
    #[arg(long, env = "TELEGRAM_CHAT_ID", default_value = "")]
    telegram_chat_id: String,
}

impl Args {
    fn into_config(self) -> AppConfig {
        AppConfig {
            api: ApiConfig {
                base_url: self.base_url,
                app_key: self.app_key,
                app_secret: self.app_secret,
                account_number: self.account_number,
                ..Default::default()
            },
            risk: RiskLimits {
                max_position_notional: self.max_position_notional,
                max_total_exposure: self.max_total_exposure,
            },
            telegram: TelegramConfig {
                bot_token: self.telegram_bot_token,
                chat_id: self.telegram_chat_id,
            },
            symbols: self
                .symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            dry_run: !self.live,
            scheduler: kiwoom_trader::config::SchedulerConfig {
                tick_interval_secs: self.tick_interval,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kiwoom_trader=info".parse()?),
        )
        .init();

    let config = Args::parse().into_config();
    config.validate()?;

    info!(
        symbols = %config.symbols.join(","),
        dry_run = config.dry_run,
        base_url = %config.api.base_url,
        "starting kiwoom-trader"
    );

    let gateway: Arc<dyn BrokerApi> = Arc::new(KiwoomClient::new(config.api.clone()));
    let positions = Arc::new(PositionCache::new());
    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let notifier: Arc<dyn Notifier> = if config.telegram.enabled() {
        info!("telegram notifications enabled");
        Arc::new(TelegramNotifier::new(
            config.telegram.bot_token.clone(),
            config.telegram.chat_id.clone(),
        ))
    } else {
        Arc::new(LogNotifier)
    };

    let coordinator = Arc::new(OrderCoordinator::new(
        Arc::clone(&gateway),
        Arc::clone(&positions),
        RiskGate::new(config.risk),
        repository,
        Arc::clone(&notifier),
        config.api.account_number.clone(),
        config.dry_run,
    ));

    let strategy: Arc<dyn Strategy> = Arc::new(RsiStrategy::default());
    strategy.initialize().await?;

    let engine = Arc::new(TradingEngine::new(
        Arc::clone(&gateway),
        strategy,
        coordinator,
        Arc::clone(&positions),
        notifier,
        config.symbols.clone(),
        config.scheduler.max_concurrent_symbols,
        chrono::Duration::seconds(config.scheduler.position_staleness_secs),
    ));

    // Seed the cache before the first cycle. A failure here is not fatal;
    // the engine reconciles again on the next tick.
    if let Err(err) = engine.sync_positions().await {
        warn!(%err, "initial position sync failed");
    }

    let scheduler = TradingScheduler::new(
        Arc::clone(&engine),
        MarketCalendar::new(config.market.clone()),
        Duration::from_secs(config.scheduler.tick_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    scheduler_task.await?;

    info!("kiwoom-trader stopped");
    Ok(())
}
