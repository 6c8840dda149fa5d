//! SMTP transport on lettre (async, tokio).

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pressdesk_core::config::MailConfig;
use pressdesk_core::error::{PressdeskError, Result, TransportError};
use pressdesk_core::traits::MailTransport;
use pressdesk_core::types::OutgoingEmail;

/// SMTP mailer built once from [`MailConfig`] and reused for every message.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let builder = if !config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        } else if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| PressdeskError::Mail(format!("SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| PressdeskError::Mail(format!("SMTP relay: {e}")))?
        };

        let mut builder = builder.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        tracing::debug!(
            "SMTP transport ready: {}:{} (tls: {})",
            config.smtp_host,
            config.smtp_port,
            config.tls
        );
        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn parse_mailbox(addr: &str, role: &str) -> std::result::Result<Mailbox, TransportError> {
    addr.parse()
        .map_err(|e| TransportError::Permanent(format!("Invalid {role} address '{addr}': {e}")))
}

/// Build the MIME message: plain-text alternative + HTML, all recipients in Bcc.
pub fn build_message(email: &OutgoingEmail) -> std::result::Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&email.from, "from")?)
        .subject(email.subject.clone());

    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to, "reply-to")?);
    }
    for addr in &email.bcc {
        builder = builder.bcc(parse_mailbox(addr, "recipient")?);
    }

    builder
        .multipart(MultiPart::alternative_plain_html(
            email.text_body.clone(),
            email.html_body.clone(),
        ))
        .map_err(|e| TransportError::Permanent(format!("Build email: {e}")))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<(), TransportError> {
        let message = build_message(email)?;
        self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Permanent(format!("SMTP send: {e}"))
            } else {
                TransportError::Transient(format!("SMTP send: {e}"))
            }
        })?;
        tracing::info!("📤 Email sent: '{}' ({} recipients)", email.subject, email.bcc.len());
        Ok(())
    }
}
