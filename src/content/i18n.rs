//! Localized strings.

use std::collections::HashMap;
use std::sync::Arc;

/// A resolved locale table. Missing keys localize to themselves.
#[derive(Debug, Clone, Default)]
pub struct Locale {
    tag: Option<String>,
    table: Option<Arc<HashMap<String, String>>>,
}

impl Locale {
    pub fn new(tag: impl Into<String>, table: Arc<HashMap<String, String>>) -> Self {
        Self {
            tag: Some(tag.into()),
            table: Some(table),
        }
    }

    /// Language tag of the table, if any matched.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn localize(&self, key: &str) -> String {
        self.table
            .as_ref()
            .and_then(|t| t.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// Resolves a locale from an `Accept-Language` header.
pub trait Localizer: Send + Sync {
    fn locale(&self, accept_language: Option<&str>) -> Locale;
}

/// Localizer without tables; every key maps to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalizer;

impl Localizer for NoLocalizer {
    fn locale(&self, _accept_language: Option<&str>) -> Locale {
        Locale::default()
    }
}

/// Localizer over in-memory tables keyed by lower-case language tag.
#[derive(Debug, Default, Clone)]
pub struct MapLocalizer {
    tables: HashMap<String, Arc<HashMap<String, String>>>,
    fallback: Option<String>,
}

impl MapLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, tag: &str, table: HashMap<String, String>) -> Self {
        self.tables.insert(tag.to_ascii_lowercase(), Arc::new(table));
        self
    }

    /// Tag used when nothing in the header matches.
    pub fn with_fallback(mut self, tag: &str) -> Self {
        self.fallback = Some(tag.to_ascii_lowercase());
        self
    }

    fn lookup(&self, tag: &str) -> Option<Locale> {
        self.tables
            .get(tag)
            .map(|table| Locale::new(tag, Arc::clone(table)))
    }
}

impl Localizer for MapLocalizer {
    fn locale(&self, accept_language: Option<&str>) -> Locale {
        for tag in preferred_tags(accept_language.unwrap_or("")) {
            if let Some(locale) = self.lookup(&tag) {
                return locale;
            }
            if let Some((primary, _)) = tag.split_once('-') {
                if let Some(locale) = self.lookup(primary) {
                    return locale;
                }
            }
        }

        self.fallback
            .as_deref()
            .and_then(|tag| self.lookup(tag))
            .unwrap_or_default()
    }
}

/// Language tags from an `Accept-Language` value, best quality first.
fn preferred_tags(header: &str) -> Vec<String> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim().to_ascii_lowercase();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();

    // Stable sort keeps header order among equal weights.
    tags.sort_by(|a, b| b.1.total_cmp(&a.1));
    tags.into_iter().map(|(tag, _)| tag).collect()
}
