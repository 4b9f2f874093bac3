use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::TimeFrame;

pub const TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_market_base_url() -> String {
    "https://api.mexc.com".into()
}

fn default_stable_asset() -> String {
    "USDT".into()
}

fn default_lookback_minutes() -> usize {
    5
}

fn default_interval_minutes() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_requests_per_second() -> u32 {
    15
}

fn default_price_change_threshold() -> f64 {
    0.10
}

fn default_symbol_delay_ms() -> u64 {
    500
}

fn default_cycle_delay_secs() -> u64 {
    60
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_base_url")]
    pub base_url: String,
    /// Quote asset every monitored symbol must be listed against.
    #[serde(default = "default_stable_asset")]
    pub stable_asset: String,
    /// Number of klines in the historical window.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: usize,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_base_url(),
            stable_asset: default_stable_asset(),
            lookback_minutes: default_lookback_minutes(),
            interval_minutes: default_interval_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl MarketConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Kline interval; validated at load time, so the fallback is never hit.
    pub fn timeframe(&self) -> TimeFrame {
        TimeFrame::from_minutes(self.interval_minutes).unwrap_or(TimeFrame::Min1)
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Fractional move (0.10 = 10%) that triggers an alert.
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: f64,
    #[serde(default = "default_symbol_delay_ms")]
    pub symbol_delay_ms: u64,
    #[serde(default = "default_cycle_delay_secs")]
    pub cycle_delay_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            price_change_threshold: default_price_change_threshold(),
            symbol_delay_ms: default_symbol_delay_ms(),
            cycle_delay_secs: default_cycle_delay_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Falls back to `TELEGRAM_BOT_TOKEN` when unset.
    pub token: Option<String>,
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            token: None,
            base_url: default_telegram_base_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
///
/// A missing telegram token is filled from the environment before validation.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    if config.telegram.token.is_none() {
        config.telegram.token = std::env::var(TOKEN_ENV_VAR).ok();
    }

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn invalid(field: impl Into<String>) -> Report<ConfigError> {
    Report::new(ConfigError::Validation {
        field: field.into(),
    })
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(&config.general)?;
    validate_market(&config.market)?;
    validate_monitor(&config.monitor)?;
    validate_telegram(&config.telegram)?;
    Ok(())
}

fn validate_general(general: &GeneralConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&general.log_format.as_str()) {
        return Err(invalid(format!(
            "general.log_format \"{}\" must be \"text\" or \"json\"",
            general.log_format
        )));
    }
    Ok(())
}

fn validate_market(market: &MarketConfig) -> Result<(), Report<ConfigError>> {
    if market.stable_asset.trim().is_empty() {
        return Err(invalid("market.stable_asset must not be empty"));
    }
    // The change is measured against the oldest close, so one sample is useless.
    if market.lookback_minutes < 2 {
        return Err(invalid(format!(
            "market.lookback_minutes must be at least 2, got {}",
            market.lookback_minutes
        )));
    }
    if TimeFrame::from_minutes(market.interval_minutes).is_none() {
        return Err(invalid(format!(
            "market.interval_minutes {} is not a supported kline interval",
            market.interval_minutes
        )));
    }
    if market.request_timeout_secs == 0 {
        return Err(invalid("market.request_timeout_secs must be positive"));
    }
    if market.requests_per_second == 0 {
        return Err(invalid("market.requests_per_second must be positive"));
    }
    Ok(())
}

fn validate_monitor(monitor: &MonitorConfig) -> Result<(), Report<ConfigError>> {
    let threshold = monitor.price_change_threshold;
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(invalid(format!(
            "monitor.price_change_threshold must be a positive fraction, got {threshold}"
        )));
    }
    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), Report<ConfigError>> {
    if !telegram.enabled {
        return Ok(());
    }
    match telegram.token.as_deref() {
        Some(token) if !token.trim().is_empty() => Ok(()),
        _ => Err(invalid(format!(
            "telegram.token is required when telegram is enabled (or set {TOKEN_ENV_VAR})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "json"

[market]
base_url = "https://api.mexc.com"
stable_asset = "USDC"
lookback_minutes = 15
request_timeout_secs = 5
requests_per_second = 10

[monitor]
price_change_threshold = 0.05
symbol_delay_ms = 250
cycle_delay_secs = 30

[telegram]
token = "123:abc"
poll_timeout_secs = 20
"#;
        let config = parse(toml);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.market.stable_asset, "USDC");
        assert_eq!(config.market.lookback_minutes, 15);
        assert_eq!(config.monitor.symbol_delay(), Duration::from_millis(250));
        assert_eq!(config.monitor.cycle_delay(), Duration::from_secs(30));
        assert_eq!(config.telegram.token.as_deref(), Some("123:abc"));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.market.base_url, "https://api.mexc.com");
        assert_eq!(config.market.stable_asset, "USDT");
        assert_eq!(config.market.lookback_minutes, 5);
        assert_eq!(config.market.timeframe(), TimeFrame::Min1);
        assert_eq!(config.market.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.monitor.price_change_threshold, 0.10);
        assert_eq!(config.monitor.symbol_delay(), Duration::from_millis(500));
        assert_eq!(config.monitor.cycle_delay(), Duration::from_secs(60));
        assert!(config.telegram.enabled);
        assert!(config.telegram.token.is_none());
    }

    #[test]
    fn enabled_telegram_without_token_rejected() {
        let config = parse("[telegram]\nenabled = true\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn disabled_telegram_needs_no_token() {
        let config = parse("[telegram]\nenabled = false\n");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn short_lookback_rejected() {
        let config = parse("[market]\nlookback_minutes = 1\n[telegram]\nenabled = false\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn non_positive_threshold_rejected() {
        let config =
            parse("[monitor]\nprice_change_threshold = 0.0\n[telegram]\nenabled = false\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let config = parse("[general]\nlog_format = \"xml\"\n[telegram]\nenabled = false\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unsupported_interval_rejected() {
        let config = parse("[market]\ninterval_minutes = 2\n[telegram]\nenabled = false\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_rate_limit_rejected() {
        let config = parse("[market]\nrequests_per_second = 0\n[telegram]\nenabled = false\n");
        assert!(validate(&config).is_err());
    }
}
