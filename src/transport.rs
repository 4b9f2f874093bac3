pub mod stdin;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::Command;

/// Inbound feed of start/stop requests from the chat side.
pub trait CommandSource: Send + Sync {
    /// Forward parsed commands into `tx` until `cancel` is triggered or the
    /// feed ends.
    fn subscribe_commands(
        &self,
        tx: mpsc::Sender<Command>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<TransportError>>>;
}
