pub mod mexc;

use futures::future::BoxFuture;

use crate::model::TimeFrame;

/// Read-only view of an exchange's public REST surface.
///
/// None of the methods fail: every transport or parse problem is logged by the
/// implementation and reported as "no data" (empty / `None`). Callers skip the
/// affected unit of work for this cycle only.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn MarketData`).
pub trait MarketData: Send + Sync {
    /// Every symbol quoted in the configured stable asset.
    fn list_symbols(&self) -> BoxFuture<'_, Vec<String>>;

    /// Up to `limit` most recent closes for `symbol`, oldest first.
    fn historical_closes(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Option<Vec<f64>>>;

    /// Latest traded price rounded to 4 decimal places.
    fn current_price(&self, symbol: &str) -> BoxFuture<'_, Option<f64>>;
}
