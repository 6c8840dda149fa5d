//! Template renderer trait.

use crate::error::RenderError;
use crate::types::TemplateParams;

/// Renders a named template with parameters into an HTML string.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, params: &TemplateParams) -> std::result::Result<String, RenderError>;
}
