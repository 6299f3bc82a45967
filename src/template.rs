//! Template Store
//!
//! Holds the badge template source, validated once at construction, and hands
//! out a freshly parsed `Document` for every composition so that requests
//! never share a mutable tree.

use std::path::Path;

use crate::config::ServiceConfig;
use crate::document::{Document, Element};
use crate::{Error, Result};

/// The shield shipped with the crate
pub const EMBEDDED_TEMPLATE: &str = include_str!("../assets/shield.svg");

/// Gradient that is reserved for showing "no status"
pub const NEUTRAL_COLOR: &str = "gray";

/// Group holding the vendor label
pub const VENDOR_GROUP: &str = "vendor";

/// Group holding the status label
pub const STATUS_GROUP: &str = "status";

/// A validated badge template
#[derive(Debug, Clone)]
pub struct TemplateStore {
    source: String,
    colors: Vec<String>,
}

impl TemplateStore {
    /// Store backed by the embedded shield template
    pub fn embedded() -> Result<Self> {
        Self::from_str(EMBEDDED_TEMPLATE)
    }

    /// Parse and validate template markup.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(source: &str) -> Result<Self> {
        let doc = Document::parse(source)?;
        validate(&doc)?;
        let colors = list_colors(&doc);
        log::debug!("badge template loaded with {} colors", colors.len());
        Ok(Self {
            source: source.to_string(),
            colors,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::TemplateUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_str(&source)
    }

    /// Use the configured template file, falling back to the embedded one.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        match &config.template_path {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    /// A new, independent copy of the template tree
    pub fn load(&self) -> Result<Document> {
        Document::parse(&self.source)
    }

    /// The Color Catalog: every gradient identifier, in document order
    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    pub fn has_color(&self, color: &str) -> bool {
        self.colors.iter().any(|c| c == color)
    }

    /// Colors offered to callers building a selector
    pub fn selectable_colors(&self) -> Vec<&str> {
        self.colors
            .iter()
            .map(String::as_str)
            .filter(|c| *c != NEUTRAL_COLOR)
            .collect()
    }
}

/// Every `linearGradient` identifier in the document, in document order.
pub fn list_colors(doc: &Document) -> Vec<String> {
    doc.root
        .descendants()
        .into_iter()
        .filter(|e| e.local_name() == "linearGradient")
        .filter_map(|e| e.attribute("id"))
        .map(str::to_string)
        .collect()
}

fn require_group<'a>(doc: &'a Document, id: &str, parts: &[&str]) -> Result<&'a Element> {
    let group = doc
        .root
        .find_by_id(id)
        .filter(|g| g.local_name() == "g")
        .ok_or_else(|| Error::TemplateUnavailable(format!("no <g id=\"{}\"> group", id)))?;
    for part in parts {
        if group.children_named(part).next().is_none() {
            return Err(Error::TemplateUnavailable(format!(
                "group {:?} has no <{}> element",
                id, part
            )));
        }
    }
    Ok(group)
}

fn validate(doc: &Document) -> Result<()> {
    if doc.root.local_name() != "svg" {
        return Err(Error::TemplateUnavailable(format!(
            "root element is <{}>, expected <svg>",
            doc.root.name
        )));
    }
    if doc.root.attribute("width").is_none() {
        return Err(Error::TemplateUnavailable(
            "root element has no width".into(),
        ));
    }
    require_group(doc, VENDOR_GROUP, &["text", "rect"])?;
    let status = require_group(doc, STATUS_GROUP, &["text", "rect", "path"])?;
    // Only a leading absolute moveto can be moved with the canvas edge; any
    // other connector is kept where the template draws it.
    for path in status.children_named("path") {
        let d = path.attribute("d").unwrap_or("").trim_start();
        if !d.starts_with('M') {
            log::warn!(
                "status connector path {:?} does not start with an absolute moveto and will not follow the status width",
                d
            );
        }
    }
    Ok(())
}
