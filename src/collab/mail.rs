use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// An outgoing notification mail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub subject: String,
    pub html_body: String,
    pub recipient: String,
    pub attachment: Option<Attachment>,
}

/// Delivery of run notifications.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(
        &self,
        mail: &Mail,
    ) -> Result<()>;
}

/// Writes mails to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(
        &self,
        mail: &Mail,
    ) -> Result<()> {
        info!(
            recipient = %mail.recipient,
            attachment = mail.attachment.as_ref().map(|a| a.name.as_str()).unwrap_or("-"),
            "mail: {}",
            mail.subject
        );
        Ok(())
    }
}
