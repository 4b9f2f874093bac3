use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{Command, CommandKind, START_BUTTON, STOP_BUTTON, SubscriberId};
use crate::notifier::Notifier;
use crate::registry::{StartOutcome, TaskRegistry};
use crate::signal::EvaluatorSettings;

const STARTED_REPLY: &str = "✅ Analysis started! Press 'Stop analysis' to stop it.";
const ALREADY_RUNNING_REPLY: &str = "Analysis is already running 🙂";
const STOPPED_REPLY: &str = "⛔️ Analysis stopped.";

/// Routes chat commands to the registry and answers the sender.
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn Notifier>,
    welcome: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn Notifier>,
        settings: &EvaluatorSettings,
        stable_asset: &str,
    ) -> Self {
        Self {
            registry,
            notifier,
            welcome: welcome_text(settings, stable_asset),
        }
    }

    /// Handle commands until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
    }

    pub async fn handle(&self, command: Command) {
        let Command { subscriber, kind } = command;
        info!(subscriber = %subscriber, command = ?kind, "command received");

        match kind {
            CommandKind::Welcome => {
                let button = if self.registry.is_running(subscriber) {
                    STOP_BUTTON
                } else {
                    START_BUTTON
                };
                self.reply(subscriber, &self.welcome, button).await;
            }
            CommandKind::Start => match self.registry.start(subscriber) {
                StartOutcome::Started => self.reply(subscriber, STARTED_REPLY, STOP_BUTTON).await,
                StartOutcome::AlreadyRunning => {
                    self.reply(subscriber, ALREADY_RUNNING_REPLY, STOP_BUTTON)
                        .await
                }
            },
            CommandKind::Stop => {
                self.registry.stop(subscriber);
                self.reply(subscriber, STOPPED_REPLY, START_BUTTON).await;
            }
        }

        debug!(running = self.registry.running_count(), "active subscriber loops");
    }

    async fn reply(&self, subscriber: SubscriberId, text: &str, button: &'static str) {
        if let Err(e) = self.notifier.reply(subscriber, text, button).await {
            warn!(error = ?e, subscriber = %subscriber, "failed to send reply");
        }
    }
}

fn welcome_text(settings: &EvaluatorSettings, stable_asset: &str) -> String {
    format!(
        "Hi! 👋 I watch every {stable_asset} market on MEXC. \
         If a price moves by {:.0}% or more within {} minutes, I will send you a signal. 🚀",
        settings.threshold * 100.0,
        settings.window_minutes(),
    )
}
