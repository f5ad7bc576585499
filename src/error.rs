//! Error types for BhumiSLAM.

use thiserror::Error;

/// BhumiSLAM error type.
#[derive(Error, Debug)]
pub enum SlamError {
    /// A configuration combination the filter does not support.
    ///
    /// Currently raised when shared-map initialization is requested
    /// against an environment that already contains an MLS grid.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(&'static str),

    /// An operation was invoked before `init`.
    #[error("filter not initialized")]
    NotInitialized,

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The scan-projection collaborator failed.
    #[error("scan projection failed: {0}")]
    Projection(String),
}

pub type Result<T> = std::result::Result<T, SlamError>;
