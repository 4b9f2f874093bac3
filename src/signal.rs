use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::market::MarketData;
use crate::model::{ChangeEvaluation, Signal, SubscriberId, TimeFrame};
use crate::notifier::Notifier;

/// Fixed parameters of the price-change check.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorSettings {
    /// Klines in the historical window.
    pub lookback: usize,
    pub timeframe: TimeFrame,
    /// Minimum absolute fractional change that fires an alert.
    pub threshold: f64,
}

impl EvaluatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lookback: config.market.lookback_minutes,
            timeframe: config.market.timeframe(),
            threshold: config.monitor.price_change_threshold,
        }
    }

    /// Length of the lookback window in minutes.
    pub fn window_minutes(&self) -> u64 {
        self.lookback as u64 * u64::from(self.timeframe.minutes())
    }
}

/// Compares a symbol's current price with the oldest close of its window
/// and alerts the subscriber when the move crosses the threshold.
///
/// Holds no per-call state; one instance is shared by every subscriber loop.
pub struct SignalEvaluator {
    market: Arc<dyn MarketData>,
    notifier: Arc<dyn Notifier>,
    settings: EvaluatorSettings,
}

impl SignalEvaluator {
    pub fn new(
        market: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            market,
            notifier,
            settings,
        }
    }

    pub fn market(&self) -> &dyn MarketData {
        self.market.as_ref()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Run the check for one symbol. Returns the signal that was sent, if any.
    ///
    /// Missing data, a zero base price, a current price that is not positive
    /// and delivery failures all end the
    /// evaluation quietly; none of them are errors for the caller.
    pub async fn evaluate(&self, symbol: &str, subscriber: SubscriberId) -> Option<Signal> {
        let closes = self
            .market
            .historical_closes(symbol, self.settings.timeframe, self.settings.lookback)
            .await?;

        if closes.len() < 2 {
            debug!(symbol, available = closes.len(), "insufficient history");
            return None;
        }

        let current_price = self.market.current_price(symbol).await?;
        if !current_price.is_finite() || current_price <= 0.0 {
            debug!(symbol, current_price, "unusable current price, skipping");
            return None;
        }

        let Some(evaluation) = measure_change(symbol, subscriber, &closes, current_price) else {
            debug!(symbol, "oldest close is zero, skipping");
            return None;
        };

        let Some(signal) = classify(evaluation.fractional_change, self.settings.threshold) else {
            debug!(
                symbol,
                oldest = evaluation.oldest_close,
                current = evaluation.current_price,
                change_pct = evaluation.percent(),
                "below threshold"
            );
            return None;
        };

        let message = format_alert(signal, &evaluation, self.settings.window_minutes());
        match self.notifier.notify(subscriber, &message).await {
            Ok(()) => info!(
                subscriber = %evaluation.subscriber,
                symbol,
                signal = %signal,
                change_pct = evaluation.percent(),
                "alert sent"
            ),
            Err(e) => warn!(error = ?e, subscriber = %subscriber, symbol, "failed to send alert"),
        }

        Some(signal)
    }
}

/// Relative move from the oldest close to `current_price`.
///
/// `None` when the window is empty or starts at zero.
pub fn measure_change(
    symbol: &str,
    subscriber: SubscriberId,
    closes: &[f64],
    current_price: f64,
) -> Option<ChangeEvaluation> {
    let oldest_close = *closes.first()?;
    if oldest_close == 0.0 {
        return None;
    }

    Some(ChangeEvaluation {
        symbol: symbol.to_owned(),
        subscriber,
        oldest_close,
        current_price,
        fractional_change: (current_price - oldest_close) / oldest_close,
    })
}

pub fn classify(fractional_change: f64, threshold: f64) -> Option<Signal> {
    if fractional_change.is_nan() || fractional_change.abs() < threshold {
        return None;
    }
    if fractional_change > 0.0 {
        Some(Signal::Long)
    } else {
        Some(Signal::Short)
    }
}

pub fn format_alert(signal: Signal, evaluation: &ChangeEvaluation, window_minutes: u64) -> String {
    let arrow = match signal {
        Signal::Long => "📈",
        Signal::Short => "📉",
    };
    format!(
        "{arrow} {signal} signal for {}\nPrice: {} ({:+.2}%) over {window_minutes} min.",
        evaluation.symbol,
        evaluation.current_price,
        evaluation.percent(),
    )
}
