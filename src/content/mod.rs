//! Response content collaborators.
//!
//! # Data Flow
//! ```text
//! Response::write_blob  → minifier.rs (by MIME essence)
//! Response::write_file  → coffer.rs (cached asset) → filesystem on miss
//! Response::render      → renderer.rs (+ i18n.rs locale of the request)
//! ```
//!
//! # Design Decisions
//! - Each collaborator is a trait object in the server context; defaults
//!   are cheap and always available

pub mod coffer;
pub mod i18n;
pub mod minifier;
pub mod renderer;

pub use coffer::{Asset, Coffer, MemoryCoffer, NoCoffer};
pub use i18n::{Locale, Localizer, MapLocalizer, NoLocalizer};
pub use minifier::{DefaultMinifier, MinifyError, Minifier};
pub use renderer::{NoRenderer, RenderError, Renderer, TemplateData, TemplateRenderer, INHERITED_HTML_KEY};

/// Lower-cased MIME essence of a Content-Type value ("text/html; charset=utf-8" → "text/html").
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether compressing this MIME essence is worthwhile.
pub fn is_compressible(essence: &str) -> bool {
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json"
                | "application/xml"
                | "application/javascript"
                | "application/toml"
                | "image/svg+xml"
        )
}
