//! Service configuration
//!
//! `ServiceConfig` collects everything the badge pipeline needs from its
//! environment: where the template and fonts live, how external converters
//! are invoked, and where the HTTP front end listens. Defaults are chosen so
//! that a bare `ServiceConfig::default()` renders SVG badges with the
//! embedded template and no external tools.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A font file registered under a family name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSource {
    /// Family name as it appears in the template's `font-family` attribute
    pub family: String,
    /// Path to a TrueType/OpenType file
    pub path: PathBuf,
}

/// Command line of an external SVG-to-PNG converter
///
/// `args` may contain the `{input}` and `{output}` placeholders, which are
/// replaced by the file names inside the scoped working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalTool {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Expand the placeholders in `args`.
    pub fn expand_args(&self, input: &str, output: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{input}", input).replace("{output}", output))
            .collect()
    }
}

/// Configuration for a badge service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Custom template file; the embedded shield is used when absent
    pub template_path: Option<PathBuf>,
    /// Fonts used for text measurement and in-process rasterization
    pub fonts: Vec<FontSource>,
    /// Whether the in-process rasterizer also loads system fonts
    pub load_system_fonts: bool,
    /// Timeout for external converters in milliseconds
    pub external_timeout_ms: u64,
    /// Largest canvas width or height, in pixels, accepted for PNG output
    pub max_png_dimension: u32,
    /// Inkscape command line
    pub inkscape: ExternalTool,
    /// ImageMagick command line
    pub imagemagick: ExternalTool,
    /// Host the HTTP front end binds to
    pub listen: String,
    /// Port the HTTP front end binds to
    pub port: u16,
    /// Number of request workers (0 => one per CPU)
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            fonts: Vec::new(),
            load_system_fonts: true,
            external_timeout_ms: 30000,
            max_png_dimension: 4096,
            inkscape: ExternalTool::new("inkscape", &["-f", "{input}", "-e", "{output}"]),
            imagemagick: ExternalTool::new("convert", &["{input}", "{output}"]),
            listen: "localhost".to_string(),
            port: 8000,
            workers: 0,
        }
    }
}

impl ServiceConfig {
    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: ServiceConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::ConfigError(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.external_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "external_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_png_dimension == 0 {
            return Err(Error::ConfigError(
                "max_png_dimension must be greater than zero".into(),
            ));
        }
        for (name, tool) in [("inkscape", &self.inkscape), ("imagemagick", &self.imagemagick)] {
            if tool.program.trim().is_empty() {
                return Err(Error::ConfigError(format!("{} program is empty", name)));
            }
        }
        if let Some(font) = self.fonts.iter().find(|f| f.family.trim().is_empty()) {
            return Err(Error::ConfigError(format!(
                "font {} has an empty family name",
                font.path.display()
            )));
        }
        Ok(())
    }

    /// Effective number of request workers
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}
