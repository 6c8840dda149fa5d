//! Email template rendering.
//!
//! Templates are HTML files with `{{ name }}` placeholders. Values are
//! HTML-escaped unless the placeholder is written `{{ name|safe }}`.
//! Unknown names render as an empty string.

use pressdesk_core::error::RenderError;
use pressdesk_core::traits::TemplateRenderer;
use pressdesk_core::types::TemplateParams;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(\|\s*safe\s*)?\}\}")
        .expect("placeholder pattern is valid")
});

/// Substitute placeholders in `source`.
pub fn render_str(source: &str, params: &TemplateParams) -> String {
    PLACEHOLDER
        .replace_all(source, |caps: &Captures| {
            let value = params.get(&caps[1]).map(String::as_str).unwrap_or("");
            if caps.get(2).is_some() {
                value.to_string()
            } else {
                escape_html(value)
            }
        })
        .into_owned()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Templates loaded from a directory on each render.
pub struct FileTemplates {
    root: PathBuf,
}

impl FileTemplates {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl TemplateRenderer for FileTemplates {
    fn render(&self, template: &str, params: &TemplateParams) -> Result<String, RenderError> {
        let relative = Path::new(template);
        // Only plain relative paths below the root.
        if template.is_empty() || relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(RenderError::NotFound(template.to_string()));
        }
        let source = std::fs::read_to_string(self.root.join(relative)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::NotFound(template.to_string())
            } else {
                RenderError::Failed(format!("{template}: {e}"))
            }
        })?;
        Ok(render_str(&source, params))
    }
}

/// Templates registered in memory.
#[derive(Default)]
pub struct InlineTemplates {
    templates: HashMap<String, String>,
}

impl InlineTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, source: &str) -> Self {
        self.templates.insert(name.to_string(), source.to_string());
        self
    }
}

impl TemplateRenderer for InlineTemplates {
    fn render(&self, template: &str, params: &TemplateParams) -> Result<String, RenderError> {
        self.templates
            .get(template)
            .map(|source| render_str(source, params))
            .ok_or_else(|| RenderError::NotFound(template.to_string()))
    }
}
