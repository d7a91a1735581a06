//! HTML template rendering.
//!
//! # Responsibilities
//! - Define the `Renderer` contract used by `Response::render`
//! - Provide a small placeholder renderer over in-memory templates
//!
//! # Design Decisions
//! - Layered templates see the previous template's output under
//!   [`INHERITED_HTML_KEY`]; that value is inserted unescaped
//! - Every other value is HTML-escaped

use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::content::i18n::Locale;

/// Data key under which a template receives the output of the previous one.
pub const INHERITED_HTML_KEY: &str = "InheritedHTML";

/// Values handed to templates.
pub type TemplateData = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template {template}: {message}")]
    Syntax { template: String, message: String },

    #[error("write failed")]
    Write(#[from] std::fmt::Error),
}

/// Composes HTML from named templates.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        out: &mut dyn Write,
        template: &str,
        data: &TemplateData,
        locale: &Locale,
    ) -> Result<(), RenderError>;
}

/// Renderer with no templates; every render fails with `NotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRenderer;

impl Renderer for NoRenderer {
    fn render(&self, _: &mut dyn Write, template: &str, _: &TemplateData, _: &Locale) -> Result<(), RenderError> {
        Err(RenderError::NotFound(template.to_string()))
    }
}

/// Placeholder renderer: `{{key}}` inserts a data value, `{{t "key"}}` a
/// localized string.
#[derive(Debug, Default, Clone)]
pub struct TemplateRenderer {
    templates: HashMap<String, String>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    /// Load every `.html` file under `root`, named by its path relative to `root`.
    pub fn from_dir(root: &Path) -> io::Result<Self> {
        let mut renderer = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "html") {
                    let name = path
                        .strip_prefix(root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    renderer.templates.insert(name, fs::read_to_string(&path)?);
                }
            }
        }

        tracing::debug!(templates = renderer.templates.len(), "Templates loaded");
        Ok(renderer)
    }
}

impl Renderer for TemplateRenderer {
    fn render(
        &self,
        out: &mut dyn Write,
        template: &str,
        data: &TemplateData,
        locale: &Locale,
    ) -> Result<(), RenderError> {
        let source = self
            .templates
            .get(template)
            .ok_or_else(|| RenderError::NotFound(template.to_string()))?;

        let mut rest = source.as_str();
        while let Some(start) = rest.find("{{") {
            out.write_str(&rest[..start])?;
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| RenderError::Syntax {
                template: template.to_string(),
                message: "unclosed '{{'".to_string(),
            })?;
            let action = after[..end].trim();

            if let Some(key) = action.strip_prefix("t ") {
                let key = key.trim().trim_matches('"');
                write_escaped(out, &locale.localize(key))?;
            } else if action == INHERITED_HTML_KEY {
                if let Some(Value::String(html)) = data.get(action) {
                    out.write_str(html)?;
                }
            } else {
                match data.get(action) {
                    Some(Value::String(s)) => write_escaped(out, s)?,
                    Some(Value::Null) | None => {}
                    Some(other) => write_escaped(out, &other.to_string())?,
                }
            }

            rest = &after[end + 2..];
        }
        out.write_str(rest)?;
        Ok(())
    }
}

fn write_escaped(out: &mut dyn Write, s: &str) -> std::fmt::Result {
    for c in s.chars() {
        match c {
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '&' => out.write_str("&amp;")?,
            '"' => out.write_str("&#34;")?,
            '\'' => out.write_str("&#39;")?,
            _ => out.write_char(c)?,
        }
    }
    Ok(())
}
