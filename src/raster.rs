//! Rasterizer
//!
//! Converts SVG bytes into PNG bytes. `RasterBackend::Default` renders in
//! process with resvg; the other backends shell out to an external converter
//! inside a fresh temporary directory that is removed however the call ends.
//!
//! The in-process font database always holds `BUNDLED_FONT`. Families the
//! database cannot match resolve through the generic serif family, which is
//! pointed at the first configured font, or at the bundled face when the host
//! has no serif font of its own.

use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use resvg::{tiny_skia, usvg};

use crate::config::{ExternalTool, ServiceConfig};
use crate::document::Document;
use crate::metrics::{BUNDLED_FONT, BUNDLED_FONT_FAMILY};
use crate::{Error, Result};

/// File names used inside the converter's working directory
pub const INPUT_FILE: &str = "badge.svg";
pub const OUTPUT_FILE: &str = "badge.png";
const STDERR_FILE: &str = "stderr.log";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Available rasterization backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterBackend {
    /// In-process resvg rendering
    #[default]
    Default,
    /// Inkscape command line
    Inkscape,
    /// ImageMagick `convert`
    ImageMagick,
}

impl RasterBackend {
    pub const ALL: [RasterBackend; 3] = [
        RasterBackend::Default,
        RasterBackend::Inkscape,
        RasterBackend::ImageMagick,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RasterBackend::Default => "default",
            RasterBackend::Inkscape => "inkscape",
            RasterBackend::ImageMagick => "imagemagick",
        }
    }

    /// Human readable label for selectors
    pub fn label(self) -> &'static str {
        match self {
            RasterBackend::Default => "resvg (built in)",
            RasterBackend::Inkscape => "Inkscape",
            RasterBackend::ImageMagick => "ImageMagick",
        }
    }
}

impl fmt::Display for RasterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RasterBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "resvg" | "cairosvg" => Ok(RasterBackend::Default),
            "inkscape" => Ok(RasterBackend::Inkscape),
            "imagemagick" => Ok(RasterBackend::ImageMagick),
            _ => Err(Error::UnsupportedBackend(s.to_string())),
        }
    }
}

/// SVG to PNG converter shared by all requests
#[derive(Clone)]
pub struct Rasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
    default_family: String,
    inkscape: ExternalTool,
    imagemagick: ExternalTool,
    timeout: Duration,
    max_dimension: u32,
}

impl fmt::Debug for Rasterizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rasterizer")
            .field("fonts", &self.fontdb.len())
            .field("default_family", &self.default_family)
            .field("inkscape", &self.inkscape)
            .field("imagemagick", &self.imagemagick)
            .field("timeout", &self.timeout)
            .field("max_dimension", &self.max_dimension)
            .finish()
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        let config = ServiceConfig::default();
        let mut fontdb = usvg::fontdb::Database::new();
        if config.load_system_fonts {
            fontdb.load_system_fonts();
        }
        Self::with_fonts(fontdb, None, &config)
    }
}

fn has_generic_family(fontdb: &usvg::fontdb::Database, family: usvg::fontdb::Family<'_>) -> bool {
    let families = [family];
    fontdb
        .query(&usvg::fontdb::Query {
            families: &families,
            ..Default::default()
        })
        .is_some()
}

impl Rasterizer {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let mut fontdb = usvg::fontdb::Database::new();
        for font in &config.fonts {
            fontdb.load_font_file(&font.path).map_err(|e| {
                Error::ConfigError(format!("cannot load font {}: {}", font.path.display(), e))
            })?;
        }
        // Name as stored in the font file, which may differ from the
        // configured alias.
        let primary = fontdb
            .faces()
            .next()
            .and_then(|face| face.families.first())
            .map(|(name, _)| name.clone());
        if config.load_system_fonts {
            fontdb.load_system_fonts();
        }
        Ok(Self::with_fonts(fontdb, primary, config))
    }

    fn with_fonts(
        mut fontdb: usvg::fontdb::Database,
        primary: Option<String>,
        config: &ServiceConfig,
    ) -> Self {
        use usvg::fontdb::Family;

        fontdb.load_font_data(BUNDLED_FONT.to_vec());
        let default_family = match primary {
            Some(family) => {
                fontdb.set_serif_family(family.clone());
                fontdb.set_sans_serif_family(family.clone());
                family
            }
            None => {
                if !has_generic_family(&fontdb, Family::Serif) {
                    fontdb.set_serif_family(BUNDLED_FONT_FAMILY);
                }
                if !has_generic_family(&fontdb, Family::SansSerif) {
                    fontdb.set_sans_serif_family(BUNDLED_FONT_FAMILY);
                }
                BUNDLED_FONT_FAMILY.to_string()
            }
        };
        log::debug!(
            "rasterizer font database holds {} faces, default family {:?}",
            fontdb.len(),
            default_family
        );
        Self {
            fontdb: Arc::new(fontdb),
            default_family,
            inkscape: config.inkscape.clone(),
            imagemagick: config.imagemagick.clone(),
            timeout: Duration::from_millis(config.external_timeout_ms),
            max_dimension: config.max_png_dimension,
        }
    }

    /// Number of faces available to the in-process backend
    pub fn font_count(&self) -> usize {
        self.fontdb.len()
    }

    /// Convert `svg` into PNG bytes with the selected backend.
    ///
    /// Canvases wider or taller than the configured limit are rejected with
    /// `InvalidRequest` before any backend runs.
    pub fn rasterize(&self, svg: &[u8], backend: RasterBackend) -> Result<Vec<u8>> {
        log::debug!("rasterizing {} bytes with {}", svg.len(), backend);
        self.check_canvas(svg)?;
        match backend {
            RasterBackend::Default => self.render_in_process(svg),
            RasterBackend::Inkscape => self.run_external(svg, backend, &self.inkscape),
            RasterBackend::ImageMagick => self.run_external(svg, backend, &self.imagemagick),
        }
    }

    /// Markup the size check cannot read is left to the backend to report.
    fn check_canvas(&self, svg: &[u8]) -> Result<()> {
        let Ok(doc) = Document::parse_bytes(svg) else {
            return Ok(());
        };
        for attr in ["width", "height"] {
            let size = doc
                .root
                .attribute(attr)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<f64>().ok());
            if let Some(size) = size {
                if size > self.max_dimension as f64 {
                    return Err(Error::InvalidRequest(format!(
                        "canvas {} {} exceeds the PNG limit of {} pixels",
                        attr, size, self.max_dimension
                    )));
                }
            }
        }
        Ok(())
    }

    fn render_in_process(&self, svg: &[u8]) -> Result<Vec<u8>> {
        let fail = |cause: String| Error::RasterizationFailed {
            backend: RasterBackend::Default,
            cause,
        };
        let mut options = usvg::Options::default();
        options.font_family = self.default_family.clone();
        let tree = usvg::Tree::from_data(svg, &options, &self.fontdb)
            .map_err(|e| fail(format!("cannot parse SVG: {}", e)))?;
        let size = tree.size().to_int_size();
        let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
            .ok_or_else(|| fail(format!("cannot allocate {}x{} pixmap", size.width(), size.height())))?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
        pixmap
            .encode_png()
            .map_err(|e| fail(format!("cannot encode PNG: {}", e)))
    }

    fn run_external(&self, svg: &[u8], backend: RasterBackend, tool: &ExternalTool) -> Result<Vec<u8>> {
        let fail = |cause: String| Error::RasterizationFailed { backend, cause };

        // Removed on drop, whichever way this function returns.
        let workdir = tempfile::Builder::new()
            .prefix("badgeserver-")
            .tempdir()
            .map_err(|e| fail(format!("cannot create working directory: {}", e)))?;
        let path = |name: &str| -> PathBuf { workdir.path().join(name) };

        std::fs::write(path(INPUT_FILE), svg)
            .map_err(|e| fail(format!("cannot write {}: {}", INPUT_FILE, e)))?;
        let stderr = File::create(path(STDERR_FILE))
            .map_err(|e| fail(format!("cannot capture stderr: {}", e)))?;

        let mut child = Command::new(&tool.program)
            .args(tool.expand_args(INPUT_FILE, OUTPUT_FILE))
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| fail(format!("cannot run {}: {}", tool.program, e)))?;

        let status = match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(fail(format!(
                    "{} timed out after {}ms",
                    tool.program,
                    self.timeout.as_millis()
                )));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(fail(format!("cannot wait for {}: {}", tool.program, e)));
            }
        };

        if !status.success() {
            let detail = std::fs::read_to_string(path(STDERR_FILE)).unwrap_or_default();
            return Err(fail(format!(
                "{} exited with {}: {}",
                tool.program,
                status,
                detail.trim()
            )));
        }

        match std::fs::read(path(OUTPUT_FILE)) {
            Ok(png) => Ok(png),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(fail(format!(
                "{} produced no {}",
                tool.program, OUTPUT_FILE
            ))),
            Err(e) => Err(fail(format!("cannot read {}: {}", OUTPUT_FILE, e))),
        }
    }
}

/// Poll `child` until it exits or `timeout` passes; `Ok(None)` on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="4"><rect width="8" height="4" fill="#0a7bb5"/></svg>"##;

    #[test]
    fn backend_names_parse() {
        assert_eq!("".parse::<RasterBackend>().unwrap(), RasterBackend::Default);
        assert_eq!("cairosvg".parse::<RasterBackend>().unwrap(), RasterBackend::Default);
        assert_eq!("Inkscape".parse::<RasterBackend>().unwrap(), RasterBackend::Inkscape);
        assert_eq!("imagemagick".parse::<RasterBackend>().unwrap(), RasterBackend::ImageMagick);
        assert!(matches!(
            "gimp".parse::<RasterBackend>(),
            Err(Error::UnsupportedBackend(_))
        ));
        for backend in RasterBackend::ALL {
            assert_eq!(backend.name().parse::<RasterBackend>().unwrap(), backend);
        }
    }

    #[test]
    fn in_process_rendering_produces_png() {
        let png = Rasterizer::default().rasterize(SQUARE, RasterBackend::Default).unwrap();
        assert_eq!(&png[0..8], b"\x89PNG\r\n\x1a\n");
    }

    fn label_svg(label: &str) -> Vec<u8> {
        format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="60" height="18"><text x="4" y="13" font-family="No Such Family" font-size="10">{}</text></svg>"##,
            label
        )
        .into_bytes()
    }

    #[test]
    fn text_is_drawn_without_system_fonts() {
        let config = ServiceConfig {
            load_system_fonts: false,
            ..Default::default()
        };
        let r = Rasterizer::from_config(&config).unwrap();
        assert_eq!(r.font_count(), 1);
        let blank = r.rasterize(&label_svg(""), RasterBackend::Default).unwrap();
        let build = r.rasterize(&label_svg("build"), RasterBackend::Default).unwrap();
        let zzzzz = r.rasterize(&label_svg("zzzzz"), RasterBackend::Default).unwrap();
        assert_ne!(blank, build);
        assert_ne!(build, zzzzz);
    }

    #[test]
    fn configured_font_becomes_default_family() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("badge.ttf");
        std::fs::write(&path, BUNDLED_FONT).unwrap();
        let config = ServiceConfig {
            fonts: vec![crate::config::FontSource {
                family: "Badge Sans".into(),
                path,
            }],
            load_system_fonts: false,
            ..Default::default()
        };
        let r = Rasterizer::from_config(&config).unwrap();
        assert_eq!(r.default_family, BUNDLED_FONT_FAMILY);
        assert_eq!(r.font_count(), 2);
    }

    #[test]
    fn oversized_canvas_is_rejected_before_rendering() {
        let config = ServiceConfig {
            max_png_dimension: 100,
            load_system_fonts: false,
            ..Default::default()
        };
        let r = Rasterizer::from_config(&config).unwrap();
        let wide = br##"<svg xmlns="http://www.w3.org/2000/svg" width="200000046" height="18"/>"##;
        for backend in RasterBackend::ALL {
            let err = r.rasterize(wide, backend).unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(ref m) if m.contains("width")), "{}", err);
        }
        let tall = br##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="101"/>"##;
        assert!(matches!(
            r.rasterize(tall, RasterBackend::Default),
            Err(Error::InvalidRequest(_))
        ));
        assert!(r.rasterize(SQUARE, RasterBackend::Default).is_ok());
    }

    #[test]
    fn in_process_rendering_rejects_garbage() {
        let err = Rasterizer::default()
            .rasterize(b"definitely not svg", RasterBackend::Default)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RasterizationFailed { backend: RasterBackend::Default, .. }
        ));
    }

    #[cfg(unix)]
    fn shell_rasterizer(script: &str, timeout_ms: u64) -> Rasterizer {
        let config = ServiceConfig {
            imagemagick: ExternalTool::new("sh", &["-c", script]),
            external_timeout_ms: timeout_ms,
            ..Default::default()
        };
        Rasterizer::from_config(&config).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn external_tool_output_is_returned_and_workdir_removed() {
        let r = shell_rasterizer("cp {input} {output} && echo >> {output} && pwd >> {output}", 10_000);
        let out = r.rasterize(SQUARE, RasterBackend::ImageMagick).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<svg"));
        let workdir = text.lines().last().unwrap().trim();
        assert!(workdir.contains("badgeserver-"));
        assert!(!std::path::Path::new(workdir).exists());
    }

    #[cfg(unix)]
    #[test]
    fn external_tool_failure_carries_stderr_and_cleans_up() {
        let r = shell_rasterizer("pwd >&2; exit 3", 10_000);
        let err = r.rasterize(SQUARE, RasterBackend::ImageMagick).unwrap_err();
        let Error::RasterizationFailed { backend, cause } = err else {
            panic!("unexpected error");
        };
        assert_eq!(backend, RasterBackend::ImageMagick);
        let workdir = cause.rsplit(": ").next().unwrap().trim();
        assert!(workdir.contains("badgeserver-"), "{}", cause);
        assert!(!std::path::Path::new(workdir).exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_output_file_is_a_failure() {
        let r = shell_rasterizer("true", 10_000);
        let err = r.rasterize(SQUARE, RasterBackend::ImageMagick).unwrap_err();
        assert!(err.to_string().contains("produced no badge.png"), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_is_killed_after_timeout() {
        let r = shell_rasterizer("sleep 5", 100);
        let started = Instant::now();
        let err = r.rasterize(SQUARE, RasterBackend::ImageMagick).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_failure() {
        let config = ServiceConfig {
            inkscape: ExternalTool::new("badgeserver-no-such-tool", &["{input}"]),
            ..Default::default()
        };
        let err = Rasterizer::from_config(&config)
            .unwrap()
            .rasterize(SQUARE, RasterBackend::Inkscape)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RasterizationFailed { backend: RasterBackend::Inkscape, .. }
        ));
    }
}
