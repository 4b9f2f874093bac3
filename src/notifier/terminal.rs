use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::SubscriberId;
use crate::notifier::Notifier;

/// Writes every message to the log instead of a chat. Alerts log at warn,
/// command replies at info.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(
        &self,
        subscriber: SubscriberId,
        text: &str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        tracing::warn!(subscriber = %subscriber, "MESSAGE: {}", text);
        Box::pin(async { Ok(()) })
    }

    fn reply(
        &self,
        subscriber: SubscriberId,
        text: &str,
        button: &'static str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        tracing::info!(subscriber = %subscriber, button, "REPLY: {}", text);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn alerts_log_at_warn_and_replies_at_info() {
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let notifier = TerminalNotifier;
            drop(notifier.notify(SubscriberId(42), "LONG signal for BTCUSDT"));
            drop(notifier.reply(SubscriberId(42), "Analysis started", "Stop analysis"));
        });

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN") && lines[0].contains("LONG signal for BTCUSDT"));
        assert!(lines[1].contains("INFO") && lines[1].contains("Analysis started"));
    }

    #[tokio::test]
    async fn terminal_notifier_always_delivers() {
        let notifier = TerminalNotifier;
        notifier
            .notify(SubscriberId(42), "LONG signal for BTCUSDT")
            .await
            .unwrap();
        notifier
            .reply(SubscriberId(42), "Analysis started", "Stop analysis")
            .await
            .unwrap();
    }
}
