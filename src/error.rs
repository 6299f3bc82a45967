//! Error types for badge composition and rendering

use thiserror::Error;

use crate::raster::RasterBackend;

/// Result type alias for badge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing or rendering a badge
#[derive(Error, Debug)]
pub enum Error {
    /// The badge template is missing, unparsable, or lacks required elements
    #[error("Badge template unavailable: {0}")]
    TemplateUnavailable(String),

    /// A color identifier that cannot be safely written into an attribute
    #[error("Invalid color identifier: {0:?}")]
    InvalidColorIdentifier(String),

    /// A rasterization backend did not produce an image
    #[error("Rasterization with {backend} failed: {cause}")]
    RasterizationFailed {
        backend: RasterBackend,
        cause: String,
    },

    /// Requested output format is neither `svg` nor `png`
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Requested converter name does not map to a backend
    #[error("Unsupported rasterization backend: {0}")]
    UnsupportedBackend(String),

    /// Malformed request parameter
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than by
    /// the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidColorIdentifier(_)
                | Error::UnsupportedFormat(_)
                | Error::UnsupportedBackend(_)
                | Error::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterization_failure_names_backend_and_cause() {
        let err = Error::RasterizationFailed {
            backend: RasterBackend::ImageMagick,
            cause: "convert: no decode delegate".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("imagemagick"));
        assert!(msg.contains("no decode delegate"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn validation_errors_are_client_errors() {
        assert!(Error::InvalidColorIdentifier("<".into()).is_client_error());
        assert!(Error::UnsupportedFormat("jpg".into()).is_client_error());
        assert!(!Error::TemplateUnavailable("missing".into()).is_client_error());
    }
}
