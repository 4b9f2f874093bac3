use std::fmt;

use chrono::{DateTime, Utc};

/// Destination for alerts: a chat id on the messaging side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kline interval used for the historical window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
}

impl TimeFrame {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(Self::Min1),
            5 => Some(Self::Min5),
            15 => Some(Self::Min15),
            30 => Some(Self::Min30),
            60 => Some(Self::Hour1),
            _ => None,
        }
    }

    pub fn minutes(self) -> u32 {
        match self {
            Self::Min1 => 1,
            Self::Min5 => 5,
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Hour1 => 60,
        }
    }

    /// Return the MEXC kline interval string for this timeframe.
    pub fn mexc_interval(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "60m",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mexc_interval())
    }
}

/// A closing price at the open time of its kline.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub open_time: DateTime<Utc>,
    pub close: f64,
}

/// Direction of a threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Long,
    Short,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Price movement of one symbol over the lookback window.
///
/// Built fresh for every (symbol, cycle) pair and dropped after the alert
/// decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvaluation {
    pub symbol: String,
    pub subscriber: SubscriberId,
    pub oldest_close: f64,
    pub current_price: f64,
    pub fractional_change: f64,
}

impl ChangeEvaluation {
    pub fn percent(&self) -> f64 {
        self.fractional_change * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Welcome,
    Start,
    Stop,
}

/// Inbound control event from the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub subscriber: SubscriberId,
    pub kind: CommandKind,
}

impl CommandKind {
    /// Map free-form message text to a command. Unknown text is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let head = text.split_whitespace().next().unwrap_or_default();
        // "/run@my_bot" in group chats
        let head = head.split('@').next().unwrap_or_default();

        match head {
            "/start" => Some(Self::Welcome),
            "/run" => Some(Self::Start),
            "/stop" => Some(Self::Stop),
            _ if text.eq_ignore_ascii_case(START_BUTTON) => Some(Self::Start),
            _ if text.eq_ignore_ascii_case(STOP_BUTTON) => Some(Self::Stop),
            _ => None,
        }
    }
}

pub const START_BUTTON: &str = "Start analysis";
pub const STOP_BUTTON: &str = "Stop analysis";
