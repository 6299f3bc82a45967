//! Badgeserver
//!
//! Renders small two-segment "status badges" (a vendor label and a status
//! label on a colored pill) from a vector template, as SVG or PNG.
//!
//! # Features
//!
//! - **Geometry-consistent composition**: label boxes are sized from measured
//!   text (or given explicitly) and every dependent coordinate follows
//! - **Pluggable metrics**: real glyph advances from font files, or a
//!   deterministic fixed-width model
//! - **Pluggable rasterization**: in-process resvg, Inkscape, or ImageMagick
//! - **HTTP front end** (`server` feature, default): a small configurator
//!   page plus `/image.svg` and `/image.png`
//!
//! # Example
//!
//! ```
//! use badgeserver::{BadgeRequest, BadgeService, OutputFormat, RasterBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = BadgeService::with_defaults()?;
//! let request = BadgeRequest {
//!     vendor: "build".to_string(),
//!     status: "passing".to_string(),
//!     color: "green".to_string(),
//!     ..Default::default()
//! };
//! let badge = service.render(&request, OutputFormat::Svg, RasterBackend::Default)?;
//! assert_eq!(badge.content_type, "image/svg+xml");
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod error;
pub use error::{Error, Result};

pub mod compose;
pub mod config;
pub mod document;
pub mod metrics;
pub mod raster;
pub mod template;

// Worker-backed async facade over `BadgeService`
pub mod async_api;

#[cfg(feature = "server")]
pub mod server;

pub use async_api::AsyncRenderer;
pub use compose::{compose, BadgeGeometry, ComposedBadge, Diagnostic};
pub use config::{ExternalTool, FontSource, ServiceConfig};
pub use document::Document;
pub use metrics::{FixedWidthMetrics, GlyphMetrics, TextMetrics};
pub use raster::{RasterBackend, Rasterizer};
pub use template::TemplateStore;

/// Everything needed to compose one badge
///
/// Widths that are absent or negative are computed from the label text.
///
/// # Examples
///
/// ```
/// let req = badgeserver::BadgeRequest::default();
/// assert_eq!(req.vendor, "badgeserver");
/// assert_eq!(req.explicit_vendor_width(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeRequest {
    /// Left-hand label
    pub vendor: String,
    /// Right-hand label
    pub status: String,
    /// Gradient identifier for the status segment
    pub color: String,
    /// Vendor box width; auto when `None` or negative
    pub vendor_width: Option<i64>,
    /// Status box width; auto when `None` or negative
    pub status_width: Option<i64>,
}

impl Default for BadgeRequest {
    fn default() -> Self {
        Self {
            vendor: "badgeserver".to_string(),
            status: "okay".to_string(),
            color: compose::DEFAULT_COLOR.to_string(),
            vendor_width: None,
            status_width: None,
        }
    }
}

fn explicit_width(width: Option<i64>) -> Option<f64> {
    width.filter(|w| *w >= 0).map(|w| w as f64)
}

impl BadgeRequest {
    pub fn explicit_vendor_width(&self) -> Option<f64> {
        explicit_width(self.vendor_width)
    }

    pub fn explicit_status_width(&self) -> Option<f64> {
        explicit_width(self.status_width)
    }
}

/// Output encodings a badge can be rendered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Svg,
    Png,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Encoded badge bytes plus their content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBadge {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl RenderedBadge {
    /// Strong entity tag: quoted hex SHA-256 of the bytes
    pub fn etag(&self) -> String {
        format!("\"{}\"", hex::encode(Sha256::digest(&self.bytes)))
    }
}

/// The composition pipeline: template, metrics, and rasterizer
///
/// A service is immutable after construction and can be shared between
/// threads; every call composes on its own copy of the template.
pub struct BadgeService {
    templates: TemplateStore,
    metrics: Box<dyn TextMetrics>,
    rasterizer: Rasterizer,
}

impl std::fmt::Debug for BadgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BadgeService")
            .field("templates", &self.templates)
            .field("rasterizer", &self.rasterizer)
            .finish_non_exhaustive()
    }
}

impl BadgeService {
    pub fn new(templates: TemplateStore, metrics: Box<dyn TextMetrics>, rasterizer: Rasterizer) -> Self {
        Self {
            templates,
            metrics,
            rasterizer,
        }
    }

    /// Embedded template, fixed-width metrics, default rasterizer
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            TemplateStore::embedded()?,
            Box::new(FixedWidthMetrics::default()),
            Rasterizer::default(),
        ))
    }

    /// Build every collaborator from configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let templates = TemplateStore::from_config(config)?;
        let metrics: Box<dyn TextMetrics> = if config.fonts.is_empty() {
            log::warn!("no fonts configured; label widths use a fixed-width approximation");
            Box::new(FixedWidthMetrics::default())
        } else {
            Box::new(GlyphMetrics::from_sources(&config.fonts)?)
        };
        let rasterizer = Rasterizer::from_config(config)?;
        Ok(Self::new(templates, metrics, rasterizer))
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn metrics(&self) -> &dyn TextMetrics {
        self.metrics.as_ref()
    }

    pub fn compose(&self, request: &BadgeRequest) -> Result<ComposedBadge> {
        compose::validate_color(&request.color)?;
        let template = self.templates.load()?;
        compose(&template, request, self.metrics.as_ref())
    }

    pub fn render_svg(&self, request: &BadgeRequest) -> Result<Vec<u8>> {
        Ok(self.compose(request)?.serialize())
    }

    pub fn render_png(&self, request: &BadgeRequest, backend: RasterBackend) -> Result<Vec<u8>> {
        let svg = self.render_svg(request)?;
        self.rasterizer.rasterize(&svg, backend)
    }

    /// Render in the requested format. `backend` only applies to PNG.
    pub fn render(&self, request: &BadgeRequest, format: OutputFormat, backend: RasterBackend) -> Result<RenderedBadge> {
        let bytes = match format {
            OutputFormat::Svg => self.render_svg(request)?,
            OutputFormat::Png => self.render_png(request, backend)?,
        };
        Ok(RenderedBadge {
            content_type: format.content_type(),
            bytes,
        })
    }

    /// Parse the format name first, so an unsupported format is rejected
    /// before any template work happens.
    pub fn render_named(&self, request: &BadgeRequest, format: &str, backend: &str) -> Result<RenderedBadge> {
        let format: OutputFormat = format.parse()?;
        let backend: RasterBackend = backend.parse()?;
        self.render(request, format, backend)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request() {
        let req = BadgeRequest::default();
        assert_eq!(req.vendor, "badgeserver");
        assert_eq!(req.status, "okay");
        assert_eq!(req.color, "lightgray");
        assert_eq!(req.explicit_status_width(), None);
    }

    #[test]
    fn negative_widths_mean_auto() {
        let req = BadgeRequest {
            vendor_width: Some(-1),
            status_width: Some(12),
            ..Default::default()
        };
        assert_eq!(req.explicit_vendor_width(), None);
        assert_eq!(req.explicit_status_width(), Some(12.0));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: BadgeRequest = serde_json::from_str(r#"{ "status": "failing", "color": "red" }"#).unwrap();
        assert_eq!(req.vendor, "badgeserver");
        assert_eq!(req.status, "failing");
        assert_eq!(req.vendor_width, None);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("svg".parse::<OutputFormat>().unwrap(), OutputFormat::Svg);
        assert_eq!("PNG".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert!(matches!("jpg".parse::<OutputFormat>(), Err(Error::UnsupportedFormat(f)) if f == "jpg"));
        assert_eq!(OutputFormat::Png.content_type(), "image/png");
    }

    #[test]
    fn etag_is_stable_and_quoted() {
        let a = RenderedBadge { content_type: "image/svg+xml", bytes: b"abc".to_vec() };
        assert_eq!(
            a.etag(),
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
    }

    #[test]
    fn default_service_measures_with_fixed_width() {
        let service = BadgeService::with_defaults().unwrap();
        assert_eq!(service.metrics().measure("abcd", "Open Sans", 10.0), 24.0);
    }

    #[test]
    fn service_renders_svg() {
        let service = BadgeService::with_defaults().unwrap();
        let badge = service
            .render(&BadgeRequest::default(), OutputFormat::Svg, RasterBackend::Default)
            .unwrap();
        let text = String::from_utf8(badge.bytes).unwrap();
        assert!(text.starts_with("<svg"));
        assert!(text.contains(">badgeserver</text>"));
        assert!(text.contains(">okay</text>"));
    }
}
