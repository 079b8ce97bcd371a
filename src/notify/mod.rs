/// Notification Module
///
/// Run reports go out as plain-text email over SMTP. Delivery is best effort: a failed
/// notification is logged and never fails the run.
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use crate::config::MailConfig;
use crate::error::{Error, Result};

/// Port that expects TLS from the first byte instead of STARTTLS
const IMPLICIT_TLS_PORT: u16 = 465;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Sends notifications as emails via SMTP
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// The SMTP user doubles as the sender address.
    pub fn from_config(mail: &MailConfig) -> Result<Self> {
        let from = mail
            .user
            .trim()
            .parse::<Mailbox>()
            .map_err(|e| Error::config(format!("invalid SMTP_USER address: {}", e)))?;

        let to = mail
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>().map_err(|e| Error::config(format!("invalid MAIL_TO address {}: {}", addr, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        if to.is_empty() {
            return Err(Error::config("at least one MAIL_TO recipient is required"));
        }

        let builder = if mail.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&mail.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&mail.host)
        }
        .map_err(|e| Error::config(format!("invalid SMTP_HOST {}: {}", mail.host, e)))?;

        let transport =
            builder.port(mail.port).credentials(Credentials::new(mail.user.clone(), mail.pass.clone())).build();

        Ok(Self { transport, from, to })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let mut message = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            message = message.to(recipient.clone());
        }

        let email = message.subject(subject).body(body.to_string()).map_err(|e| Error::Notify(e.to_string()))?;

        self.transport.send(email).await.map_err(|e| Error::Notify(e.to_string()))?;

        tracing::info!(subject, recipients = self.to.len(), "notification sent");
        Ok(())
    }
}

/// Used when email is not configured
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, subject: &str, _body: &str) -> Result<()> {
        tracing::debug!(subject, "email not configured, notification skipped");
        Ok(())
    }
}

/// SMTP notifier when user, password and recipients are all set, a no-op otherwise
pub fn build(mail: &MailConfig) -> Result<Arc<dyn Notifier>> {
    if !mail.is_complete() {
        tracing::info!("email notifications disabled (SMTP_USER, SMTP_PASS and MAIL_TO are required)");
        return Ok(Arc::new(DisabledNotifier));
    }

    let notifier = SmtpNotifier::from_config(mail)?;
    tracing::info!(host = %mail.host, port = mail.port, recipients = mail.to.len(), "email notifications enabled");
    Ok(Arc::new(notifier))
}

/// Send and log a failure instead of returning it
pub async fn notify_best_effort(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(subject, body).await {
        tracing::warn!(subject, error = %e, "notification failed");
    }
}
