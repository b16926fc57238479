//! Application configuration
//!
//! One explicit config struct built at startup and passed by reference into
//! each component. No ambient global state.

use chrono::{NaiveDate, NaiveTime};

use crate::error::TradingError;

/// Kiwoom REST API connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL (mock investment endpoint by default)
    pub base_url: String,
    /// Application key issued by the broker
    pub app_key: String,
    /// Application secret issued by the broker
    pub app_secret: String,
    /// Brokerage account number
    pub account_number: String,
    /// Max TR requests per trailing second
    pub rate_limit_per_sec: usize,
    /// Renew the access token this many seconds before it expires
    pub token_refresh_margin_secs: i64,
    /// Max attempts for retryable request failures
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_backoff_ms: u64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mockapi.kiwoom.com".to_string(),
            app_key: String::new(),
            app_secret: String::new(),
            account_number: String::new(),
            rate_limit_per_sec: 5,
            token_refresh_margin_secs: 300,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

/// Exposure limits, read-only at runtime.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    /// Max notional held in a single symbol (KRW)
    pub max_position_notional: f64,
    /// Max aggregate notional across all symbols (KRW)
    pub max_total_exposure: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_notional: 1_000_000.0,
            max_total_exposure: 5_000_000.0,
        }
    }
}

/// Exchange session window and holiday calendar (exchange-local time).
#[derive(Debug, Clone)]
pub struct MarketHoursConfig {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Non-trading weekdays (exchange holidays)
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            // KRX regular session
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            holidays: Vec::new(),
        }
    }
}

/// Scheduler cadence and concurrency bounds.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Seconds between execution cycles
    pub tick_interval_secs: u64,
    /// Max symbols processed concurrently within one cycle
    pub max_concurrent_symbols: usize,
    /// Reconcile the position cache when older than this
    pub position_staleness_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_concurrent_symbols: 3,
            position_staleness_secs: 300,
        }
    }
}

/// Telegram notification settings. Disabled when either field is empty.
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn enabled(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// Root configuration assembled in `main` from CLI flags and environment.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub risk: RiskLimits,
    pub market: MarketHoursConfig,
    pub scheduler: SchedulerConfig,
    pub telegram: TelegramConfig,
    /// Symbols tracked each cycle (e.g. "005930")
    pub symbols: Vec<String>,
    /// Paper-trading mode: orders are filled locally, never submitted
    pub dry_run: bool,
}

impl AppConfig {
    /// Fail fast on configuration that cannot work at runtime.
    pub fn validate(&self) -> Result<(), TradingError> {
        if self.api.rate_limit_per_sec == 0 {
            return Err(TradingError::Config(
                "rate_limit_per_sec must be at least 1".into(),
            ));
        }
        if self.api.max_retries == 0 {
            return Err(TradingError::Config("max_retries must be at least 1".into()));
        }
        if self.risk.max_position_notional <= 0.0 || self.risk.max_total_exposure <= 0.0 {
            return Err(TradingError::Config("risk limits must be positive".into()));
        }
        if self.risk.max_position_notional > self.risk.max_total_exposure {
            return Err(TradingError::Config(
                "per-symbol limit cannot exceed the aggregate limit".into(),
            ));
        }
        if self.market.open >= self.market.close {
            return Err(TradingError::Config(
                "market open must precede market close".into(),
            ));
        }
        if self.symbols.is_empty() {
            return Err(TradingError::Config("no symbols configured".into()));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(TradingError::Config("tick interval must be positive".into()));
        }
        if self.scheduler.max_concurrent_symbols == 0 {
            return Err(TradingError::Config(
                "max_concurrent_symbols must be at least 1".into(),
            ));
        }
        if !self.dry_run && (self.api.app_key.is_empty() || self.api.app_secret.is_empty()) {
            return Err(TradingError::Config(
                "live trading requires app_key and app_secret".into(),
            ));
        }
        Ok(())
    }
}
