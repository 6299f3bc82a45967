//! Badge Compositor
//!
//! Turns a template document and a `BadgeRequest` into a new document with
//! the requested labels and color, and with every dependent coordinate moved
//! so the two segments stay attached:
//!
//! ```text
//! status_rect.x      = vendor_width + GAP
//! status_text.x      = vendor_width + GAP + TEXT_INSET
//! connector start x  = vendor_width + status_width + GAP + CONNECTOR_INSET
//! canvas width       = vendor_width + status_width + GAP + CONNECTOR_INSET
//! ```
//!
//! The input document is never modified.

use crate::document::{serialize, Document, Element};
use crate::metrics::TextMetrics;
use crate::template::{list_colors, STATUS_GROUP, VENDOR_GROUP};
use crate::{BadgeRequest, Error, Result};

/// Gradient referenced by the template before recoloring
pub const DEFAULT_COLOR: &str = "lightgray";

/// Space between the vendor and status boxes
pub const GAP: f64 = 3.0;

/// Offset of the status text from the status box's left edge
pub const TEXT_INSET: f64 = 4.0;

/// Width of the rounded cap drawn by the connector path past the gap
pub const CONNECTOR_INSET: f64 = 3.0;

/// Margin added to a measured label width
pub const AUTO_PADDING: f64 = 7.0;

const MAX_COLOR_LEN: usize = 64;

/// Non-fatal findings reported with a composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The color has no gradient in the template; the badge references it
    /// anyway and viewers draw the segment unfilled.
    UnknownColor(String),
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::UnknownColor(c) => write!(f, "There's no gradient for {}", c),
        }
    }
}

/// Result of a composition
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedBadge {
    pub document: Document,
    pub vendor_width: f64,
    pub status_width: f64,
    pub diagnostics: Vec<Diagnostic>,
}

impl ComposedBadge {
    pub fn serialize(&self) -> Vec<u8> {
        serialize(&self.document)
    }
}

/// Reject color identifiers that could break out of `url(#...)`.
pub fn validate_color(color: &str) -> Result<()> {
    let safe = !color.is_empty()
        && color.len() <= MAX_COLOR_LEN
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(())
    } else {
        Err(Error::InvalidColorIdentifier(color.to_string()))
    }
}

/// Coordinate formatting shared by every rewritten attribute.
fn coord(value: f64) -> String {
    format!("{}", value)
}

fn fill_reference(color: &str) -> String {
    format!("url(#{})", color)
}

fn group_mut<'a>(doc: &'a mut Document, id: &str) -> Result<&'a mut Element> {
    doc.root
        .find_by_id_mut(id)
        .ok_or_else(|| Error::TemplateUnavailable(format!("no <g id=\"{}\"> group", id)))
}

fn children_named_mut<'a>(
    group: &'a mut Element,
    local: &'a str,
) -> impl Iterator<Item = &'a mut Element> {
    group
        .child_elements_mut()
        .filter(move |e| e.local_name() == local)
}

/// Set the label of every text element in `group` and resolve the box
/// width: the explicit width when given, otherwise the measured width of the
/// first label plus `AUTO_PADDING`.
fn relabel(
    group: &mut Element,
    label: &str,
    explicit: Option<f64>,
    metrics: &dyn TextMetrics,
) -> Result<f64> {
    let mut width = explicit;
    for text in children_named_mut(group, "text") {
        text.set_text(label);
        if width.is_none() {
            width = Some(metrics.measure_element(text) + AUTO_PADDING);
        }
    }
    width.ok_or_else(|| Error::TemplateUnavailable("label group has no <text> element".into()))
}

/// Replace the leading coordinate of a path that starts with an absolute
/// `M<number>`. Everything after that number is kept byte for byte; a
/// relative `m` start is not rewritten.
pub fn rewrite_path_start(d: &str, start_x: f64) -> Option<String> {
    let rest = d.trim_start().strip_prefix('M')?.trim_start();
    let token_len = rest
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .count();
    if !rest[..token_len].chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("M{}{}", coord(start_x), &rest[token_len..]))
}

/// Compose a badge from `template` without modifying it.
pub fn compose(
    template: &Document,
    request: &BadgeRequest,
    metrics: &dyn TextMetrics,
) -> Result<ComposedBadge> {
    validate_color(&request.color)?;

    let mut diagnostics = Vec::new();
    if !list_colors(template).iter().any(|c| *c == request.color) {
        log::warn!("There's no gradient for {}", request.color);
        diagnostics.push(Diagnostic::UnknownColor(request.color.clone()));
    }

    let mut doc = template.clone();

    let vendor = group_mut(&mut doc, VENDOR_GROUP)?;
    let vendor_width = relabel(vendor, &request.vendor, request.explicit_vendor_width(), metrics)?;

    let status = group_mut(&mut doc, STATUS_GROUP)?;
    let default_fill = fill_reference(DEFAULT_COLOR);
    for child in status.child_elements_mut() {
        if child.attribute("fill") == Some(default_fill.as_str()) {
            child.set_attribute("fill", fill_reference(&request.color));
        }
    }
    let status_width = relabel(status, &request.status, request.explicit_status_width(), metrics)?;

    log::debug!(
        "badge {:?}/{:?}: vendor_width={} status_width={}",
        request.vendor,
        request.status,
        vendor_width,
        status_width
    );

    let total_width = vendor_width + status_width + GAP + CONNECTOR_INSET;

    let vendor = group_mut(&mut doc, VENDOR_GROUP)?;
    for rect in children_named_mut(vendor, "rect") {
        rect.set_attribute("width", coord(vendor_width));
    }

    let status = group_mut(&mut doc, STATUS_GROUP)?;
    for rect in children_named_mut(status, "rect") {
        rect.set_attribute("x", coord(vendor_width + GAP));
        rect.set_attribute("width", coord(status_width));
    }
    for text in children_named_mut(status, "text") {
        text.set_attribute("x", coord(vendor_width + GAP + TEXT_INSET));
    }
    for path in children_named_mut(status, "path") {
        let rewritten = path
            .attribute("d")
            .and_then(|d| rewrite_path_start(d, total_width));
        match rewritten {
            Some(d) => path.set_attribute("d", d),
            None => log::warn!("status connector path has no leading moveto coordinate"),
        }
    }

    doc.root.set_attribute("width", coord(total_width));

    Ok(ComposedBadge {
        document: doc,
        vendor_width,
        status_width,
        diagnostics,
    })
}

/// Layout values read back from a composed document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadgeGeometry {
    pub canvas_width: f64,
    pub vendor_rect_width: f64,
    pub status_rect_x: f64,
    pub status_rect_width: f64,
    pub status_text_x: f64,
    pub connector_start_x: f64,
}

fn number(el: &Element, attr: &str) -> Option<f64> {
    el.attribute(attr)?.trim().parse().ok()
}

impl BadgeGeometry {
    /// Read the geometry of a badge document; `None` if an element or
    /// coordinate is missing.
    pub fn read(doc: &Document) -> Option<Self> {
        let vendor = doc.root.find_by_id(VENDOR_GROUP)?;
        let status = doc.root.find_by_id(STATUS_GROUP)?;
        let status_rect = status.children_named("rect").next()?;
        let d = status.children_named("path").next()?.attribute("d")?;
        let rest = d.strip_prefix('M')?.trim_start();
        let token: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
            .collect();
        Some(Self {
            canvas_width: number(&doc.root, "width")?,
            vendor_rect_width: number(vendor.children_named("rect").next()?, "width")?,
            status_rect_x: number(status_rect, "x")?,
            status_rect_width: number(status_rect, "width")?,
            status_text_x: number(status.children_named("text").next()?, "x")?,
            connector_start_x: token.parse().ok()?,
        })
    }

    /// Whether the segment relations hold (within float rounding).
    pub fn is_consistent(&self) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        let v = self.vendor_rect_width;
        let s = self.status_rect_width;
        close(self.status_rect_x, v + GAP)
            && close(self.status_text_x, v + GAP + TEXT_INSET)
            && close(self.connector_start_x, v + s + GAP + CONNECTOR_INSET)
            && close(self.canvas_width, v + s + GAP + CONNECTOR_INSET)
    }
}
