//! Rendering and data-binding seams.
//!
//! The engine never writes prose itself. A `TemplateRenderer` turns a
//! `TemplateBinding` plus a `BindingScope` (record values and coherence
//! context entries) into document text.

pub mod placeholder;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coherence::ContextSnapshot;
use crate::dataset::Record;
use crate::generation::GenerationError;

pub use placeholder::PlaceholderRenderer;

/// Output format of generated documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Text,
    Markdown,
    Html,
    Json,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Json => "json",
        }
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_ext(self.extension())
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown document format '{}'", other)),
        }
    }
}

/// A named template body and the format of what it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBinding {
    pub name: String,
    pub body: String,
    pub format: DocumentFormat,
}

impl TemplateBinding {
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            body: body.to_string(),
            format: DocumentFormat::default(),
        }
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }
}

/// Document text as produced by the renderer and then adjusted by
/// coherence rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub body: String,
    pub format: DocumentFormat,
}

/// Named values visible to a template for one document.
///
/// Record columns are bound by name. Context entries use prefixes:
/// `doc.index`, `doc.number` (1-based), `doc.count`, `term.<key>`,
/// `agg.<name>` and `fact.<key>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingScope {
    values: BTreeMap<String, String>,
}

impl BindingScope {
    pub fn bind(record: &Record, index: usize, total: usize, context: &ContextSnapshot) -> Self {
        let mut values = BTreeMap::new();

        for (column, value) in record {
            values.insert(column.clone(), value.to_string());
        }

        values.insert("doc.index".to_string(), index.to_string());
        values.insert("doc.number".to_string(), (index + 1).to_string());
        values.insert("doc.count".to_string(), total.to_string());

        for (key, canonical) in context.terms() {
            values.insert(format!("term.{}", key), canonical.to_string());
        }
        for (name, value) in context.aggregates() {
            values.insert(format!("agg.{}", name), format_number(value));
        }
        for fact in context.facts() {
            values.insert(format!("fact.{}", fact.key), fact.value.clone());
        }

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Renders whole numbers without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Binds a template to a scope and produces document text.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &TemplateBinding,
        scope: &BindingScope,
    ) -> Result<String, GenerationError>;
}
