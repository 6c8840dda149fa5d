//! # Pressdesk CMS
//!
//! SQLite content store for the admin backend.
//!
//! - Articles with an append-only version archive. Each save writes the
//!   article and one archive row per changed rich-text field atomically.
//! - Sections, signup tokens, tracked downloads, URL redirects, themes.
//! - Audit log, exposed through [`pressdesk_core::traits::AuditSink`].

pub mod articles;
pub mod db;
pub mod downloads;
pub mod redirects;
pub mod sections;
pub mod themes;
pub mod tokens;
pub mod versioning;

pub use articles::{Article, ArticleDraft, ArticleVersion, slugify};
pub use db::{AuditEntry, CmsDb, SYSTEM_ACTOR};
pub use downloads::FileDownload;
pub use redirects::{RedirectKind, UrlRedirect};
pub use sections::Section;
pub use themes::Theme;
pub use tokens::UserToken;
