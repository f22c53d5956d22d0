//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Ingestion errors. Every stage fails with the most specific kind it can.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Input is not a feature collection.
    #[error("Format error: {0}")]
    Format(String),

    /// Collection has no features to derive a schema from.
    #[error("Empty data: feature collection requires at least one feature")]
    EmptyData,

    /// Empty, mixed or inconsistent geometry.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Missing or invalid option.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Spatial reference cannot be resolved or transformed.
    #[error("Projection error: {0}")]
    Projection(String),

    /// Raw input could not be translated into a feature collection.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        IngestError::Geometry(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }

    pub(crate) fn projection(msg: impl Into<String>) -> Self {
        IngestError::Projection(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        IngestError::Decode(msg.into())
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
