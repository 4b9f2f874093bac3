use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::model::{Command, CommandKind, SubscriberId};
use crate::transport::CommandSource;

/// Reads `<subscriber-id> <text>` lines from standard input, e.g. `7 /run`.
///
/// Used for local runs without a chat bot. The blocking stdin read cannot be
/// interrupted, so process exit may wait for one more line of input.
pub struct StdinCommands;

impl CommandSource for StdinCommands {
    fn subscribe_commands(
        &self,
        tx: mpsc::Sender<Command>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>> {
        Box::pin(async move {
            let reader = BufReader::new(tokio::io::stdin());
            forward_lines(reader, &tx, &cancel).await
        })
    }
}

async fn forward_lines<R: AsyncBufRead + Unpin>(
    reader: R,
    tx: &mpsc::Sender<Command>,
    cancel: &CancellationToken,
) -> Result<(), Report<TransportError>> {
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.change_context(TransportError::Request {
                method: "stdin".into(),
            })?,
        };

        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        match parse_line(&line) {
            Some(command) => {
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!(line = %line, "unrecognised input, expected `<id> /run|/stop|/start`"),
        }
    }

    Ok(())
}

fn parse_line(line: &str) -> Option<Command> {
    let (id, text) = line.trim().split_once(char::is_whitespace)?;
    let subscriber = SubscriberId(id.parse().ok()?);
    let kind = CommandKind::parse(text)?;
    Some(Command { subscriber, kind })
}
