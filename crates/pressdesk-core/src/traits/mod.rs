//! Collaborator traits: the seams where external systems plug in.

pub mod audit;
pub mod render;
pub mod transport;

pub use audit::AuditSink;
pub use render::TemplateRenderer;
pub use transport::MailTransport;
