use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::error::{NotifyError, TransportError};
use crate::model::{Command, CommandKind, SubscriberId};
use crate::notifier::Notifier;
use crate::transport::CommandSource;

const SEND_TIMEOUT_SECS: u64 = 10;
/// Slack on top of the long-poll timeout before the HTTP call is abandoned.
const POLL_GRACE_SECS: u64 = 10;
const MAX_BACKOFF_SECS: u64 = 60;

/// Telegram Bot API client: delivers alerts and long-polls for commands.
pub struct TelegramBot {
    client: reqwest::Client,
    /// `{base_url}/bot{token}`; never logged.
    api_url: String,
    poll_timeout_secs: u64,
}

impl TelegramBot {
    /// Returns `None` when no token is configured.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        let token = config.token.as_deref()?;
        Some(Self {
            client: reqwest::Client::new(),
            api_url: format!("{}/bot{}", config.base_url.trim_end_matches('/'), token),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    async fn send_message(
        &self,
        subscriber: SubscriberId,
        text: String,
        button: Option<&'static str>,
    ) -> Result<(), Report<NotifyError>> {
        let body = SendMessage {
            chat_id: subscriber.0,
            text,
            reply_markup: button.map(ReplyKeyboard::single),
        };

        let response: ApiResponse<serde_json::Value> = self
            .client
            .post(format!("{}/sendMessage", self.api_url))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .change_context(NotifyError::Request {
                subscriber: subscriber.0,
            })?
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .change_context(NotifyError::Request {
                subscriber: subscriber.0,
            })?;

        if !response.ok {
            return Err(Report::new(NotifyError::Rejected {
                subscriber: subscriber.0,
                reason: response.description.unwrap_or_default(),
            }));
        }

        debug!(subscriber = %subscriber, "telegram message delivered");
        Ok(())
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, Report<TransportError>> {
        let params = [
            ("offset", offset.to_string()),
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_owned()),
        ];

        let response = self
            .client
            .get(format!("{}/getUpdates", self.api_url))
            .timeout(Duration::from_secs(self.poll_timeout_secs + POLL_GRACE_SECS))
            .query(&params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .change_context(TransportError::Request {
                method: "getUpdates".into(),
            })?;

        parse_api_response(
            response
                .bytes()
                .await
                .map_err(reqwest::Error::without_url)
                .change_context(TransportError::Request {
                    method: "getUpdates".into(),
                })?
                .as_ref(),
        )
    }

    async fn poll_commands(
        &self,
        offset: &mut i64,
        tx: &mpsc::Sender<Command>,
        cancel: &CancellationToken,
    ) -> Result<(), Report<TransportError>> {
        info!("telegram polling started");

        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("telegram polling cancelled");
                    return Ok(());
                }
                updates = self.get_updates(*offset) => updates?,
            };

            for update in updates {
                *offset = (*offset).max(update.update_id + 1);
                if let Some(command) = update.into_command() {
                    if tx.send(command).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl Notifier for TelegramBot {
    fn notify(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        let text = text.to_owned();
        Box::pin(self.send_message(subscriber, text, None))
    }

    fn reply(
        &self,
        subscriber: SubscriberId,
        text: &str,
        button: &'static str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        let text = text.to_owned();
        Box::pin(self.send_message(subscriber, text, Some(button)))
    }
}

impl CommandSource for TelegramBot {
    fn subscribe_commands(
        &self,
        tx: mpsc::Sender<Command>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        Box::pin(async move {
            let mut offset = 0;
            let mut backoff = Duration::from_secs(1);

            loop {
                if cancel.is_cancelled() || tx.is_closed() {
                    break;
                }

                match self.poll_commands(&mut offset, &tx, &cancel).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(error = ?e, "telegram polling failed, retrying...");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                    }
                }
            }
            Ok(())
        })
    }
}

fn parse_api_response(body: &[u8]) -> Result<Vec<Update>, Report<TransportError>> {
    let response: ApiResponse<Vec<Update>> =
        serde_json::from_slice(body).change_context(TransportError::ResponseParse {
            method: "getUpdates".into(),
        })?;

    if !response.ok {
        return Err(Report::new(TransportError::Request {
            method: "getUpdates".into(),
        })
        .attach(response.description.unwrap_or_default()));
    }

    Ok(response.result.unwrap_or_default())
}

// ── Bot API types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl Update {
    fn into_command(self) -> Option<Command> {
        let message = self.message?;
        let kind = CommandKind::parse(message.text.as_deref()?)?;
        Some(Command {
            subscriber: SubscriberId(message.chat.id),
            kind,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendMessage {
    chat_id: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyKeyboard>,
}

#[derive(Debug, Serialize)]
struct ReplyKeyboard {
    keyboard: Vec<Vec<KeyboardButton>>,
    resize_keyboard: bool,
}

#[derive(Debug, Serialize)]
struct KeyboardButton {
    text: &'static str,
}

impl ReplyKeyboard {
    fn single(text: &'static str) -> Self {
        Self {
            keyboard: vec![vec![KeyboardButton { text }]],
            resize_keyboard: true,
        }
    }
}
