//! # Pressdesk Mail
//!
//! Outbound email for the content backend.
//!
//! ## Architecture
//! ```text
//! Dispatcher::dispatch(request)
//!   ├── render template → body (or "failed to render" + Failed)
//!   ├── OutboxStore::create → id        (record exists before any attempt)
//!   └── bounded queue → worker pool
//!         └── attempt → Sent
//!             attempt ✗ → Retrying → sleep → attempt … → Failed after the cap
//!
//! Dispatcher::resend(id) → exactly one attempt → Sent | Failed
//! ```

pub mod dispatch;
pub mod recipients;
pub mod smtp;
pub mod store;
pub mod template;

pub use dispatch::{Dispatcher, MailSettings, RENDER_FAILURE_BODY, SendRequest};
pub use recipients::{encode_recipients, parse_recipients};
pub use smtp::SmtpMailer;
pub use store::{OutboundEmail, OutboxStore};
pub use template::{FileTemplates, InlineTemplates};
