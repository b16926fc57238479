//! Market-hours scheduler
//!
//! Ticks at a fixed interval, running one engine cycle per tick while the
//! exchange is open. Market hours are evaluated in exchange-local time
//! (Asia/Seoul). Shutdown is honored between ticks; a cycle already in
//! progress always finishes, even if the market closes under it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Asia::Seoul;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::MarketHoursConfig;
use crate::engine::TradingEngine;

/// Exchange session calendar: weekday sessions in [open, close), minus
/// configured holidays. All comparisons happen in KST.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    config: MarketHoursConfig,
}

impl MarketCalendar {
    pub fn new(config: MarketHoursConfig) -> Self {
        Self { config }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&Seoul);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let time = local.time();
        time >= self.config.open && time < self.config.close
    }

    /// True after the close on a day that had a session.
    pub fn is_after_close(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&Seoul);
        self.is_trading_day(local.date_naive()) && local.time() >= self.config.close
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            && !self.config.holidays.contains(&date)
    }
}

pub struct TradingScheduler {
    engine: Arc<TradingEngine>,
    calendar: MarketCalendar,
    tick: Duration,
}

impl TradingScheduler {
    pub fn new(engine: Arc<TradingEngine>, calendar: MarketCalendar, tick: Duration) -> Self {
        Self {
            engine,
            calendar,
            tick,
        }
    }

    /// Tick until the shutdown flag flips. The daily summary goes out once
    /// per trading day, on the first tick after the close.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_summary: Option<NaiveDate> = None;

        info!(tick_secs = self.tick.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.on_tick(Utc::now(), &mut last_summary).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn on_tick(&self, now: DateTime<Utc>, last_summary: &mut Option<NaiveDate>) {
        if self.calendar.is_open(now) {
            self.engine.run_cycle().await;
            return;
        }

        debug!("market closed, skipping cycle");
        if self.calendar.is_after_close(now) {
            let today = now.with_timezone(&Seoul).date_naive();
            if *last_summary != Some(today) {
                self.engine.daily_summary().await;
                *last_summary = Some(today);
            }
        }
    }
}
