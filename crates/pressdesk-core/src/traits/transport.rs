//! Mail transport trait.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::OutgoingEmail;

/// Anything that can hand a built message to a mail server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name, used in logs.
    fn name(&self) -> &str;

    /// Deliver one message. Never retries internally.
    async fn send(&self, email: &OutgoingEmail) -> std::result::Result<(), TransportError>;
}
