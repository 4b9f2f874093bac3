//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::market::MarketData;
use crate::model::{SubscriberId, TimeFrame};
use crate::notifier::Notifier;

#[derive(Default)]
pub struct FakeMarket {
    symbols: Vec<String>,
    closes: HashMap<String, Vec<f64>>,
    prices: HashMap<String, f64>,
    empty_listings: AtomicUsize,
}

impl FakeMarket {
    pub fn with_symbol(mut self, symbol: &str, closes: &[f64], price: f64) -> Self {
        self = self.with_history_only(symbol, closes);
        self.prices.insert(symbol.to_owned(), price);
        self
    }

    /// Listed symbol whose current price lookup fails.
    pub fn with_history_only(mut self, symbol: &str, closes: &[f64]) -> Self {
        self.symbols.push(symbol.to_owned());
        self.closes.insert(symbol.to_owned(), closes.to_vec());
        self
    }

    /// The first `count` listings come back empty.
    pub fn with_empty_listings(self, count: usize) -> Self {
        self.empty_listings.store(count, Ordering::SeqCst);
        self
    }
}

impl MarketData for FakeMarket {
    fn list_symbols(&self) -> BoxFuture<'_, Vec<String>> {
        let delayed = self
            .empty_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let symbols = if delayed {
            Vec::new()
        } else {
            self.symbols.clone()
        };
        Box::pin(async move { symbols })
    }

    fn historical_closes(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Option<Vec<f64>>> {
        let closes = self.closes.get(symbol).map(|c| {
            let skip = c.len().saturating_sub(limit);
            c[skip..].to_vec()
        });
        Box::pin(async move { closes })
    }

    fn current_price(&self, symbol: &str) -> BoxFuture<'_, Option<f64>> {
        let price = self.prices.get(symbol).copied();
        Box::pin(async move { price })
    }
}

/// Records delivered messages; a failing instance rejects every send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(SubscriberId, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages_for(&self, subscriber: SubscriberId) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(id, _)| *id == subscriber)
            .map(|(_, text)| text)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        let result = if self.fail {
            Err(Report::new(NotifyError::Rejected {
                subscriber: subscriber.0,
                reason: "chat not found".into(),
            }))
        } else {
            self.sent.lock().unwrap().push((subscriber, text.to_owned()));
            Ok(())
        };
        Box::pin(async move { result })
    }
}
