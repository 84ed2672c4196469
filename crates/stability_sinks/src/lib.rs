//! Artifact writers for rollup output.
//!
//! Rollups publish one object per (metric, day). Writers handle:
//! - Object addressing within a bucket
//! - Transparent gzip compression
//! - Staging to a temp object and promoting it on finalize
//! - CSV framing with a fixed header

use thiserror::Error;

mod csv_sink;
mod object_store;

pub use csv_sink::CsvArtifactSink;
pub use object_store::{
    validate_object_key, LocalObjectStore, ObjectStore, ObjectWriter, PublishedObject,
};

/// Errors returned by object stores and sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    /// Plain failure, also used by stores outside this crate.
    pub fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }

    pub(crate) fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        SinkError::Io {
            message: message.into(),
            source,
        }
    }
}
