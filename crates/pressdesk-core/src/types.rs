//! Domain types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delivery status of an outbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    /// Sending is disabled; waiting for a manual send.
    Pending,
    /// First attempt queued or in progress.
    Sending,
    /// A previous attempt failed; waiting to try again.
    Retrying,
    Failed,
    Sent,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sending => "sending",
            EmailStatus::Retrying => "retrying",
            EmailStatus::Failed => "failed",
            EmailStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EmailStatus::Pending),
            "sending" => Some(EmailStatus::Sending),
            "retrying" => Some(EmailStatus::Retrying),
            "failed" => Some(EmailStatus::Failed),
            "sent" => Some(EmailStatus::Sent),
            _ => None,
        }
    }

    /// No automated transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmailStatus::Sent | EmailStatus::Failed)
    }

    /// Whether the delivery loop is still driving this record.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, EmailStatus::Sending | EmailStatus::Retrying)
    }

    /// Forward-only transitions taken by the automated delivery loop.
    pub fn can_advance_to(&self, next: EmailStatus) -> bool {
        use EmailStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Sending, Sent)
                | (Sending, Retrying)
                | (Sending, Failed)
                | (Retrying, Retrying)
                | (Retrying, Sent)
                | (Retrying, Failed)
        )
    }

    /// Transitions taken by a manual re-send. In-flight sources qualify
    /// only once their worker has gone quiet; the dispatcher decides that.
    pub fn can_resend_to(&self, next: EmailStatus) -> bool {
        !matches!(self, EmailStatus::Sent) && next.is_terminal()
    }
}

impl std::fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built message handed to a [`crate::traits::MailTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub reply_to: Option<String>,
    /// Blind-copy recipients; never exposed to each other.
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Parameters passed to a template renderer.
pub type TemplateParams = BTreeMap<String, String>;

/// Kind of change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Addition,
    Change,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Addition => "addition",
            AuditAction::Change => "change",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "addition" => AuditAction::Addition,
            _ => AuditAction::Change,
        }
    }
}

/// The entity an audit entry is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTarget {
    /// Entity kind, e.g. "article" or "user_token".
    pub kind: String,
    pub id: Option<String>,
    pub repr: String,
}

impl AuditTarget {
    pub fn new(kind: &str, id: impl ToString, repr: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: Some(id.to_string()),
            repr: repr.to_string(),
        }
    }

    /// Target without a row identity (e.g. a whole table or a routine).
    pub fn kind_only(kind: &str, repr: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: None,
            repr: repr.to_string(),
        }
    }
}
