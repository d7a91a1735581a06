//! Content minification.
//!
//! # Responsibilities
//! - Define the `Minifier` contract used by blob writes
//! - Provide whitespace/comment minifiers for markup, stylesheets, and JSON
//!
//! # Design Decisions
//! - Unregistered MIME types pass through untouched; minification is an
//!   optimisation and never fails a write on its own
//! - A registered minifier that cannot process its input returns an error,
//!   which aborts the write
//! - Verbatim regions (`<pre>`, `<textarea>`, `<script>`, `<style>`, CDATA,
//!   string literals) are copied byte for byte

use bytes::Bytes;
use thiserror::Error;

/// Errors from a registered minifier.
#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("{0} content is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unterminated {0}")]
    Unterminated(&'static str),
}

/// Minifies content by MIME type.
pub trait Minifier: Send + Sync {
    /// Whether a minifier is registered for the MIME essence.
    fn supports(&self, mime_type: &str) -> bool;

    /// Minify `content`. Unregistered types return `content` unchanged.
    fn minify(&self, mime_type: &str, content: Bytes) -> Result<Bytes, MinifyError>;
}

/// Built-in minifier covering HTML, CSS, JSON, XML and SVG.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMinifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Html,
    Css,
    Json,
    Xml,
}

fn kind_of(mime_type: &str) -> Option<Kind> {
    match mime_type {
        "text/html" => Some(Kind::Html),
        "text/css" => Some(Kind::Css),
        "application/json" | "text/json" => Some(Kind::Json),
        "text/xml" | "application/xml" | "image/svg+xml" => Some(Kind::Xml),
        _ => None,
    }
}

impl Minifier for DefaultMinifier {
    fn supports(&self, mime_type: &str) -> bool {
        kind_of(mime_type).is_some()
    }

    fn minify(&self, mime_type: &str, content: Bytes) -> Result<Bytes, MinifyError> {
        let Some(kind) = kind_of(mime_type) else {
            return Ok(content);
        };

        let out = match kind {
            Kind::Html => markup(as_text(&content, "HTML")?, true)?,
            Kind::Xml => markup(as_text(&content, "XML")?, false)?,
            Kind::Css => css(as_text(&content, "CSS")?)?,
            Kind::Json => {
                serde_json::from_slice::<serde::de::IgnoredAny>(&content)?;
                json(as_text(&content, "JSON")?)
            }
        };
        Ok(Bytes::from(out))
    }
}

fn as_text<'a>(content: &'a [u8], what: &'static str) -> Result<&'a str, MinifyError> {
    std::str::from_utf8(content).map_err(|_| MinifyError::InvalidUtf8(what))
}

/// Push `text` with whitespace runs collapsed to a single space.
fn push_collapsed(out: &mut String, text: &str) {
    let mut in_space = out.ends_with(' ');
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }
}

/// Elements whose content is copied verbatim.
const RAW_ELEMENTS: [&str; 4] = ["pre", "textarea", "script", "style"];

fn markup(input: &str, html: bool) -> Result<String, MinifyError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input.trim();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after.find("-->").ok_or(MinifyError::Unterminated("comment"))?;
            // Conditional comments carry meaning for old browsers.
            if after.starts_with("[if") {
                out.push_str(&rest[..end + 7]);
            }
            rest = &after[end + 3..];
            continue;
        }

        if rest.starts_with("<![CDATA[") {
            let end = rest.find("]]>").ok_or(MinifyError::Unterminated("CDATA section"))?;
            out.push_str(&rest[..end + 3]);
            rest = &rest[end + 3..];
            continue;
        }

        if rest.starts_with('<') {
            let end = tag_end(rest).ok_or(MinifyError::Unterminated("tag"))?;
            let tag = &rest[..=end];
            push_tag(&mut out, tag);
            rest = &rest[end + 1..];

            if html {
                if let Some(name) = raw_element(tag) {
                    let close = find_closing(rest, name).unwrap_or(rest.len());
                    out.push_str(&rest[..close]);
                    rest = &rest[close..];
                }
            }
            continue;
        }

        let end = rest.find('<').unwrap_or(rest.len());
        let text = &rest[..end];
        if text.trim().is_empty() {
            // Markup languages without inline flow drop blank text nodes.
            if html {
                push_collapsed(&mut out, text);
            }
        } else {
            push_collapsed(&mut out, text);
        }
        rest = &rest[end..];
    }

    Ok(out.trim_end().to_string())
}

/// Index of the `>` closing the tag at the start of `s`, skipping quoted values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Copy a tag, collapsing whitespace outside attribute values.
fn push_tag(out: &mut String, tag: &str) {
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in tag.chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        if c.is_ascii_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space && c != '>' && !(c == '/' && tag.ends_with("/>")) {
            out.push(' ');
        }
        pending_space = false;

        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
}

fn raw_element(tag: &str) -> Option<&'static str> {
    if tag.starts_with("</") || tag.ends_with("/>") {
        return None;
    }
    let name: String = tag[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    RAW_ELEMENTS.iter().copied().find(|raw| *raw == name)
}

fn find_closing(s: &str, name: &str) -> Option<usize> {
    let needle = format!("</{}", name);
    s.to_ascii_lowercase().find(&needle)
}

fn css(input: &str) -> Result<String, MinifyError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut closed = false;
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(MinifyError::Unterminated("comment"));
                }
                pending_space = true;
            }
            '"' | '\'' => {
                flush_css_space(&mut out, &mut pending_space, c);
                out.push(c);
                let mut closed = false;
                while let Some(s) = chars.next() {
                    out.push(s);
                    if s == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if s == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(MinifyError::Unterminated("string"));
                }
            }
            c if c.is_ascii_whitespace() => pending_space = true,
            '}' => {
                pending_space = false;
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
            }
            _ => {
                flush_css_space(&mut out, &mut pending_space, c);
                out.push(c);
            }
        }
    }

    Ok(out)
}

fn flush_css_space(out: &mut String, pending: &mut bool, next: char) {
    const TIGHT: &[char] = &['{', '}', ':', ';', ',', '>', '(', ')'];
    if *pending {
        let after_tight = out.chars().last().map_or(true, |p| TIGHT.contains(&p));
        if !after_tight && !TIGHT.contains(&next) {
            out.push(' ');
        }
    }
    *pending = false;
}

fn json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if !c.is_ascii_whitespace() {
            out.push(c);
        }
    }
    out
}
