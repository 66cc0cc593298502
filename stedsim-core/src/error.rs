//! Error types for stedsim-core.

use thiserror::Error;

/// Result type alias for stedsim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for stedsim operations.
///
/// Every variant is a deterministic function of its inputs; none of them is
/// worth retrying without changing the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Missing or invalid fluorophore, beam or acquisition parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Grid or region of interest cannot host the beam footprint.
    #[error("domain error: {0}")]
    Domain(String),

    /// A scanned pixel (plus the PSF footprint) falls outside the grid.
    #[error("pixel ({row}, {col}) is out of bounds: {reason}")]
    OutOfBounds {
        row: usize,
        col: usize,
        reason: String,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }
}
