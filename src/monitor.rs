use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::model::SubscriberId;
use crate::signal::SignalEvaluator;

pub const NO_SYMBOLS_MESSAGE: &str =
    "No symbols are available right now. I will keep checking and start the analysis once they are.";

/// Delays between evaluations inside one subscriber loop.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub symbol_delay: Duration,
    pub cycle_delay: Duration,
}

impl Pacing {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            symbol_delay: config.symbol_delay(),
            cycle_delay: config.cycle_delay(),
        }
    }
}

/// Evaluate every symbol for `subscriber`, pass after pass, until `cancel`
/// fires.
///
/// The symbol list is fetched once on entry, and refetched every cycle delay
/// while it comes back empty. Cancellation is checked around every evaluation
/// and pause; an in-flight evaluation is dropped rather than finished, so
/// nothing is sent after the token fires.
pub async fn run_subscriber_loop(
    subscriber: SubscriberId,
    evaluator: Arc<SignalEvaluator>,
    pacing: Pacing,
    cancel: CancellationToken,
) {
    let Some(symbols) = wait_for_symbols(subscriber, &evaluator, pacing, &cancel).await else {
        return;
    };

    info!(subscriber = %subscriber, symbols = symbols.len(), "subscriber loop started");

    let mut pass: u64 = 0;
    loop {
        pass += 1;
        debug!(subscriber = %subscriber, pass, "pass started");

        for symbol in &symbols {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = evaluator.evaluate(symbol, subscriber) => {}
            }
            if !pause(pacing.symbol_delay, &cancel).await {
                return;
            }
        }

        debug!(subscriber = %subscriber, pass, "pass complete");
        if !pause(pacing.cycle_delay, &cancel).await {
            return;
        }
    }
}

/// Fetch the listing until it is non-empty. The subscriber hears about an
/// empty listing once; `None` when cancelled.
async fn wait_for_symbols(
    subscriber: SubscriberId,
    evaluator: &SignalEvaluator,
    pacing: Pacing,
    cancel: &CancellationToken,
) -> Option<Vec<String>> {
    let mut notified = false;
    loop {
        let symbols = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            symbols = evaluator.market().list_symbols() => symbols,
        };
        if !symbols.is_empty() {
            return Some(symbols);
        }

        warn!(subscriber = %subscriber, "no symbols to monitor, retrying after cycle delay");
        if !notified {
            notified = true;
            let notice = evaluator.notifier().notify(subscriber, NO_SYMBOLS_MESSAGE);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = notice => {
                    if let Err(e) = result {
                        warn!(error = ?e, subscriber = %subscriber, "failed to send notice");
                    }
                }
            }
        }

        if !pause(pacing.cycle_delay, cancel).await {
            return None;
        }
    }
}

/// Sleep for `duration`; `false` when cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
