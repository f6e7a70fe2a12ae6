//! Error types for the watermark-scrub crate.

/// Errors that can occur during watermark detection and removal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to decode the template image.
    #[error("failed to decode template image: {0}")]
    TemplateDecode(image::ImageError),

    /// A pixel buffer does not match its declared dimensions.
    #[error("buffer holds {actual} values, expected {expected}")]
    BufferSize {
        /// Number of values implied by the dimensions.
        expected: usize,
        /// Number of values actually supplied.
        actual: usize,
    },

    /// Rasterized resampling was requested but the template has no raster.
    #[error("template has no raster image; use the array resampling path")]
    RasterUnavailable,

    /// The background detection worker has gone away.
    #[error("detection worker disconnected")]
    WorkerDisconnected,

    /// No response arrived for a request before its deadline.
    #[error("request {id} timed out")]
    Timeout {
        /// Identifier of the abandoned request.
        id: String,
    },

    /// A client tried to submit while another request is still pending.
    #[error("request {id} is still in flight")]
    RequestInFlight {
        /// Identifier of the pending request.
        id: String,
    },

    /// A client waited on an identifier it is not tracking.
    #[error("unknown request {id}")]
    UnknownRequest {
        /// Identifier that was not pending.
        id: String,
    },

    /// The worker answered a request with a failure.
    #[error("request {id} failed: {message}")]
    Rejected {
        /// Identifier of the failed request.
        id: String,
        /// Failure reported by the worker.
        message: String,
    },

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let size = Error::BufferSize {
            expected: 400,
            actual: 399,
        };
        let msg = size.to_string();
        assert!(msg.contains("399"));
        assert!(msg.contains("400"));

        let timeout = Error::Timeout {
            id: "abc".to_string(),
        };
        assert!(timeout.to_string().contains("abc"));
    }

    #[test]
    fn config_errors_convert_from_serde() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
