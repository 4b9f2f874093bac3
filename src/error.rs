use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum MarketError {
    #[display("request to {endpoint} failed")]
    Request { endpoint: String },
    #[display("request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[display("failed to parse response from {endpoint}")]
    ResponseParse { endpoint: String },
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to deliver message to {subscriber}")]
    Request { subscriber: i64 },
    #[display("message to {subscriber} rejected: {reason}")]
    Rejected { subscriber: i64, reason: String },
}

#[derive(Debug, Display, Error)]
pub enum TransportError {
    #[display("failed to poll {method}")]
    Request { method: String },
    #[display("failed to parse {method} response")]
    ResponseParse { method: String },
}
