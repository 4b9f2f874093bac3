use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::DateTime;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::market::MarketData;
use crate::model::{PriceSample, TimeFrame};

const EXCHANGE_INFO_PATH: &str = "/api/v3/exchangeInfo";
const KLINES_PATH: &str = "/api/v3/klines";
const TICKER_PRICE_PATH: &str = "/api/v3/ticker/price";
/// Kline array index holding the close price.
const KLINE_CLOSE_INDEX: usize = 4;
const KLINE_OPEN_TIME_INDEX: usize = 0;

/// MEXC spot REST client shared by every subscriber loop.
///
/// All requests go through one rate limiter and carry a per-request timeout, so
/// a stalled call cannot hold a loop past its pacing delays.
pub struct MexcClient {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    stable_asset: String,
}

impl MexcClient {
    pub fn new(config: &MarketConfig) -> Result<Self, Report<MarketError>> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .change_context(MarketError::Request {
                endpoint: config.base_url.clone(),
            })
            .attach("failed to build HTTP client")?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(1u32));

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            stable_asset: config.stable_asset.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Report<MarketError>> {
        // Wait for rate limiter before making the request
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| request_error(path, e))?;

        if !response.status().is_success() {
            return Err(Report::new(MarketError::Request {
                endpoint: path.to_owned(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                request_error(path, e)
            } else {
                Report::new(e).change_context(MarketError::ResponseParse {
                    endpoint: path.to_owned(),
                })
            }
        })
    }

    /// Symbols whose quote asset equals the configured stable asset, in
    /// listing order.
    pub async fn fetch_symbols(&self) -> Result<Vec<String>, Report<MarketError>> {
        let info: ExchangeInfo = self.get_json(EXCHANGE_INFO_PATH, &[]).await?;
        let symbols = info.symbols_quoted_in(&self.stable_asset);

        info!(
            stable_asset = %self.stable_asset,
            count = symbols.len(),
            "mexc symbol listing complete"
        );
        Ok(symbols)
    }

    pub async fn fetch_samples(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<PriceSample>, Report<MarketError>> {
        let limit_str = limit.to_string();
        let params = [
            ("symbol", symbol),
            ("interval", timeframe.mexc_interval()),
            ("limit", limit_str.as_str()),
        ];

        let rows: Vec<Vec<serde_json::Value>> = self.get_json(KLINES_PATH, &params).await?;
        let samples = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>, _>>()
            .attach_with(|| format!("symbol: {symbol}"))?;

        debug!(
            symbol,
            timeframe = %timeframe,
            fetched = samples.len(),
            from = ?samples.first().map(|s| s.open_time),
            "mexc klines fetched"
        );
        Ok(samples)
    }

    pub async fn fetch_price(&self, symbol: &str) -> Result<f64, Report<MarketError>> {
        let ticker: TickerPrice = self
            .get_json(TICKER_PRICE_PATH, &[("symbol", symbol)])
            .await?;

        parse_ticker_price(&ticker.price).attach_with(|| format!("symbol: {symbol}"))
    }
}

impl MarketData for MexcClient {
    fn list_symbols(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            match self.fetch_symbols().await {
                Ok(symbols) => symbols,
                Err(e) => {
                    warn!(error = ?e, "failed to list symbols");
                    Vec::new()
                }
            }
        })
    }

    fn historical_closes(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> BoxFuture<'_, Option<Vec<f64>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            match self.fetch_samples(&symbol, timeframe, limit).await {
                Ok(samples) => Some(samples.into_iter().map(|s| s.close).collect()),
                Err(e) => {
                    warn!(error = ?e, symbol = %symbol, "failed to fetch historical closes");
                    None
                }
            }
        })
    }

    fn current_price(&self, symbol: &str) -> BoxFuture<'_, Option<f64>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            match self.fetch_price(&symbol).await {
                Ok(price) => Some(price),
                Err(e) => {
                    warn!(error = ?e, symbol = %symbol, "failed to fetch current price");
                    None
                }
            }
        })
    }
}

fn request_error(endpoint: &str, err: reqwest::Error) -> Report<MarketError> {
    let context = if err.is_timeout() {
        MarketError::Timeout {
            endpoint: endpoint.to_owned(),
        }
    } else {
        MarketError::Request {
            endpoint: endpoint.to_owned(),
        }
    };
    Report::new(err).change_context(context)
}

fn round_price(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

/// Rounded ticker price. A price that is not a positive finite number after
/// rounding (sub-0.00005 tokens round to zero) counts as a parse failure.
fn parse_ticker_price(raw: &str) -> Result<f64, Report<MarketError>> {
    let parse_error = || MarketError::ResponseParse {
        endpoint: TICKER_PRICE_PATH.into(),
    };

    let price = raw
        .parse::<f64>()
        .change_context_lazy(parse_error)
        .attach_with(|| format!("price: {raw:?}"))?;

    let rounded = round_price(price);
    if !rounded.is_finite() || rounded <= 0.0 {
        return Err(Report::new(parse_error()).attach(format!("unusable price: {raw:?}")));
    }
    Ok(rounded)
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    symbol: String,
    quote_asset: String,
}

impl ExchangeInfo {
    fn symbols_quoted_in(self, stable_asset: &str) -> Vec<String> {
        self.symbols
            .into_iter()
            .filter(|s| s.quote_asset == stable_asset)
            .map(|s| s.symbol)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// MEXC kline row:
/// [open_time, open, high, low, close, volume, close_time, quote_volume]
///
/// Prices arrive as decimal strings; numbers are accepted too.
fn parse_kline(row: &[serde_json::Value]) -> Result<PriceSample, Report<MarketError>> {
    let parse_error = || MarketError::ResponseParse {
        endpoint: KLINES_PATH.into(),
    };

    let close = match row.get(KLINE_CLOSE_INDEX) {
        Some(serde_json::Value::String(s)) => s
            .parse::<f64>()
            .change_context_lazy(parse_error)
            .attach_with(|| format!("close: {s:?}"))?,
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Report::new(parse_error()).attach(format!("close: {n}")))?,
        other => {
            return Err(Report::new(parse_error()).attach(format!("close field: {other:?}")));
        }
    };
    if !close.is_finite() {
        return Err(Report::new(parse_error()).attach(format!("close: {close}")));
    }

    let open_time_field = row.get(KLINE_OPEN_TIME_INDEX);
    let open_time = open_time_field
        .and_then(serde_json::Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| {
            Report::new(parse_error()).attach(format!("open time field: {open_time_field:?}"))
        })?;

    Ok(PriceSample { open_time, close })
}
