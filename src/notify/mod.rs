pub mod email;
pub mod hub;

use async_trait::async_trait;

use crate::models::notification::Notification;

pub use email::{EmailMessage, EmailSender, LogMailer, send_best_effort};
pub use hub::NotificationHub;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("email delivery failed: {0}")]
    Email(String),
}

/// Real-time push addressed to a driver, a passenger or the admin group.
///
/// Delivery is fire-and-forget; callers log failures and carry on.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}
