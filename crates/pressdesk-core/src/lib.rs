//! # Pressdesk Core
//!
//! Shared building blocks for the Pressdesk content backend:
//! error type, configuration, domain types and the traits behind which
//! external collaborators (mail transport, template rendering, audit log)
//! are plugged in.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PressdeskConfig;
pub use error::{PressdeskError, Result};
