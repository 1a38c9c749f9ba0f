//! Error types for the rsdem crate.

use thiserror::Error;

/// Errors that can occur while fetching or processing elevation data.
#[derive(Debug, Error)]
pub enum ElevError {
    /// Non-success status or unusable body from a search or DEM endpoint.
    #[error("upstream error from {url}: {reason}")]
    Upstream {
        /// Requested URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// Collection metadata could not be fetched. Never aborts a search.
    #[error("failed to fetch collection {id}: {reason}")]
    CollectionFetch {
        /// Collection identifier.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error reading or writing the disk cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The drawn region is not a usable polygon.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Unsupported CRS or failed coordinate transform.
    #[error("projection error: {0}")]
    Projection(String),

    /// Raster shape or georeferencing problem.
    #[error("raster error: {0}")]
    Raster(String),
}

impl ElevError {
    pub(crate) fn upstream(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ElevError::Upstream {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for rsdem operations.
pub type Result<T> = std::result::Result<T, ElevError>;
