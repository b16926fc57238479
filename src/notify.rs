//! Notifications
//!
//! Fire-and-forget event delivery. A notification failure must never abort
//! the execution pipeline, so implementations log and swallow their errors
//! and `notify` has no error outcome.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::api::models::AccountBalance;
use crate::execution::coordinator::ExecutionReport;
use crate::strategy::{Signal, SignalKind};

/// Events the pipeline reports outward.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// A strategy produced a signal (Hold signals are not forwarded)
    Signal(Signal),
    /// An execution attempt reached a terminal state
    Execution(ExecutionReport),
    /// A per-symbol cycle error that was isolated, not fatal
    Error { context: String, message: String },
    /// End-of-day account summary
    DailySummary(AccountBalance),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifyEvent);
}

/// Notifier that only writes to the log. Used when Telegram is not
/// configured and as the default in tests.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotifyEvent) {
        info!(message = %render_event(&event), "notification");
    }
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: NotifyEvent) {
        if let NotifyEvent::Signal(signal) = &event {
            if signal.kind == SignalKind::Hold {
                return;
            }
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": render_event(&event),
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "telegram notification rejected");
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "telegram notification failed"),
        }
    }
}

fn render_event(event: &NotifyEvent) -> String {
    match event {
        NotifyEvent::Signal(signal) => {
            let mut text = format!(
                "signal {} {} x{} - {}",
                signal.kind, signal.symbol, signal.quantity, signal.reason
            );
            if let Some(price) = signal.limit_price {
                text.push_str(&format!(" @ {price:.0}"));
            }
            text
        }
        NotifyEvent::Execution(report) => match &report.order {
            Some(order) => format!(
                "order {} {} {} x{} -> {} ({})",
                order.correlation_id,
                order.side,
                order.symbol,
                order.quantity,
                report.status,
                report.reason
            ),
            None => format!("{} {} ({})", report.symbol, report.status, report.reason),
        },
        NotifyEvent::Error { context, message } => {
            format!("error in {context}: {message}")
        }
        NotifyEvent::DailySummary(balance) => format!(
            "daily summary: assets {:.0}, cash {:.0}, invested {:.0}, P&L {:.0} ({:.2}%)",
            balance.total_assets,
            balance.available_cash,
            balance.total_invested,
            balance.total_profit_loss,
            balance.profit_loss_rate
        ),
    }
}
