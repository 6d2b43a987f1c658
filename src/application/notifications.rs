use crate::domain::notification::Notification;
use crate::domain::ports::Notifier;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

/// Sending half of the post-commit notification queue.
///
/// Units of work hand their notifications over only after a successful
/// commit, so delivery problems can never undo a committed change.
#[derive(Clone, Debug)]
pub struct NotificationOutbox {
    sender: mpsc::UnboundedSender<Notification>,
}

impl NotificationOutbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            if let Err(e) = self.sender.send(notification) {
                warn!(kind = ?e.0.kind, user = e.0.user, "notification worker is gone, dropping");
            }
        }
    }
}

/// Drains the outbox into a [`Notifier`].
pub struct NotificationWorker {
    receiver: mpsc::UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Notification>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { receiver, notifier }
    }

    /// Runs until every outbox sender has been dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(notification) = self.receiver.recv().await {
            self.deliver(&notification).await;
        }
    }

    #[instrument(name = "notifications.deliver", skip(self, notification), fields(user = notification.user, kind = ?notification.kind))]
    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "failed to deliver notification");
        }
    }
}
