pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::SubscriberId;

/// Outbound text channel to a subscriber.
pub trait Notifier: Send + Sync {
    fn notify(&self, subscriber: SubscriberId, text: &str)
    -> BoxFuture<'_, Result<(), Report<NotifyError>>>;

    /// Send `text` with a single reply button offered underneath it.
    ///
    /// Channels without buttons just deliver the text.
    fn reply(
        &self,
        subscriber: SubscriberId,
        text: &str,
        _button: &'static str,
    ) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        self.notify(subscriber, text)
    }
}
