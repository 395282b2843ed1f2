use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::notify::NotifyError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotifyError>;
}

/// Writes outgoing mail to the log instead of an SMTP relay.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), NotifyError> {
        if message.to.trim().is_empty() {
            return Err(NotifyError::Email("empty recipient".to_string()));
        }

        info!(
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            "email sent"
        );
        Ok(())
    }
}

pub async fn send_best_effort(mailer: &dyn EmailSender, message: EmailMessage) {
    let to = message.to.clone();
    if let Err(err) = mailer.send(message).await {
        warn!(to = %to, error = %err, "email delivery failed");
    }
}
