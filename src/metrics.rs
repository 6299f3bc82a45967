//! Text Metrics Provider
//!
//! Label boxes are sized from the advance width of their text. Two
//! providers are available:
//! - `GlyphMetrics` reads real advances (and `kern` pairs) from font files
//! - `FixedWidthMetrics` uses a constant per-character width, which is
//!   deterministic and font-free, for tests and font-less deployments
//!
//! Only the family and size of the target text element are honored. Style and
//! weight attributes (italic, bold) are ignored, so widths for styled
//! templates are an approximation.

use std::collections::HashMap;

use ttf_parser::{Face, GlyphId};

use crate::config::FontSource;
use crate::document::Element;
use crate::{Error, Result};

/// Family used when a text element has no `font-family`
pub const DEFAULT_FONT_FAMILY: &str = "sans-serif";

/// Size used when a text element has no usable `font-size`
pub const DEFAULT_FONT_SIZE: f64 = 12.0;

/// Public domain face shipped with the crate, so labels can be measured and
/// drawn on hosts without any installed fonts
pub const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/Tuffy.ttf");

/// Family name of `BUNDLED_FONT`
pub const BUNDLED_FONT_FAMILY: &str = "Tuffy";

/// Measures rendered text in template coordinate units
pub trait TextMetrics: Send + Sync {
    /// Advance width of `text` in `font_family` at `font_size`.
    ///
    /// Must return the same value for the same inputs.
    fn measure(&self, text: &str, font_family: &str, font_size: f64) -> f64;

    /// Measure the current text of a `<text>` element using its own font
    /// attributes.
    fn measure_element(&self, element: &Element) -> f64 {
        let (family, size) = font_of(element);
        self.measure(&element.text(), &family, size)
    }
}

/// Font family and size declared on a text element
pub fn font_of(element: &Element) -> (String, f64) {
    let family = element
        .attribute("font-family")
        .map(|f| {
            // First entry of a CSS-style family list, unquoted
            f.split(',')
                .next()
                .unwrap_or(f)
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string()
        })
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string());
    let size = element
        .attribute("font-size")
        .and_then(|s| s.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(DEFAULT_FONT_SIZE);
    (family, size)
}

/// Every character advances by `font_size * em_ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWidthMetrics {
    pub em_ratio: f64,
}

impl FixedWidthMetrics {
    pub fn new(em_ratio: f64) -> Self {
        Self { em_ratio }
    }
}

impl Default for FixedWidthMetrics {
    fn default() -> Self {
        Self { em_ratio: 0.6 }
    }
}

impl TextMetrics for FixedWidthMetrics {
    fn measure(&self, text: &str, _font_family: &str, font_size: f64) -> f64 {
        text.chars().count() as f64 * font_size * self.em_ratio
    }
}

/// Glyph-advance metrics read from TrueType/OpenType files
///
/// Faces are registered per family. A family that was never registered is
/// measured with the first registered face.
pub struct GlyphMetrics {
    faces: HashMap<String, Vec<u8>>,
    fallback: String,
}

impl std::fmt::Debug for GlyphMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlyphMetrics")
            .field("families", &self.faces.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl GlyphMetrics {
    /// Build from in-memory font data, `(family, bytes)` pairs.
    pub fn from_fonts(fonts: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let mut faces = HashMap::new();
        let mut fallback = None;
        for (family, data) in fonts {
            Face::parse(&data, 0).map_err(|e| {
                Error::ConfigError(format!("font for {:?} cannot be parsed: {}", family, e))
            })?;
            let key = family_key(&family);
            if fallback.is_none() {
                fallback = Some(key.clone());
            }
            faces.insert(key, data);
        }
        let fallback =
            fallback.ok_or_else(|| Error::ConfigError("no fonts registered for metrics".into()))?;
        Ok(Self { faces, fallback })
    }

    /// Read every configured font file.
    pub fn from_sources(sources: &[FontSource]) -> Result<Self> {
        let mut fonts = Vec::with_capacity(sources.len());
        for source in sources {
            let data = std::fs::read(&source.path).map_err(|e| {
                Error::ConfigError(format!("cannot read font {}: {}", source.path.display(), e))
            })?;
            fonts.push((source.family.clone(), data));
        }
        Self::from_fonts(fonts)
    }

    /// Metrics over `BUNDLED_FONT` only
    pub fn bundled() -> Result<Self> {
        Self::from_fonts(vec![(BUNDLED_FONT_FAMILY.to_string(), BUNDLED_FONT.to_vec())])
    }

    pub fn has_family(&self, family: &str) -> bool {
        self.faces.contains_key(&family_key(family))
    }

    fn face_data(&self, family: &str) -> &[u8] {
        match self.faces.get(&family_key(family)) {
            Some(data) => data,
            None => {
                log::debug!(
                    "no font registered for {:?}, measuring with {:?}",
                    family,
                    self.fallback
                );
                &self.faces[&self.fallback]
            }
        }
    }
}

fn family_key(family: &str) -> String {
    family.trim().to_ascii_lowercase()
}

fn kerning(face: &Face<'_>, left: GlyphId, right: GlyphId) -> i16 {
    let Some(kern) = face.tables().kern else {
        return 0;
    };
    kern.subtables
        .into_iter()
        .filter(|st| st.horizontal && !st.variable)
        .find_map(|st| st.glyphs_kerning(left, right))
        .unwrap_or(0)
}

impl TextMetrics for GlyphMetrics {
    fn measure(&self, text: &str, font_family: &str, font_size: f64) -> f64 {
        // Faces are validated on registration.
        let Ok(face) = Face::parse(self.face_data(font_family), 0) else {
            return FixedWidthMetrics::default().measure(text, font_family, font_size);
        };
        let units_per_em = face.units_per_em().max(1) as f64;
        let mut total: i64 = 0;
        let mut previous: Option<GlyphId> = None;
        for ch in text.chars() {
            let glyph = face.glyph_index(ch).unwrap_or(GlyphId(0));
            total += face.glyph_hor_advance(glyph).unwrap_or(0) as i64;
            if let Some(prev) = previous {
                total += kerning(&face, prev, glyph) as i64;
            }
            previous = Some(glyph);
        }
        total as f64 * font_size / units_per_em
    }
}
