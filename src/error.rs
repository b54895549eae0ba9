//! Custom error types for the transport pipeline.
//!
//! This module defines the primary error type, `PipelineError`, shared by the
//! segmenter, the extractor and the streaming orchestrator. It is built with
//! `thiserror` so that lower-level failures (I/O, configuration parsing) can be
//! lifted with `?`.
//!
//! ## Error Classes
//!
//! Every variant maps onto one [`ErrorClass`], which is what callers branch on:
//!
//! - **`Invalid`**: the segment itself is malformed (an undefined case code).
//!   The segment is dropped, logged at error level and never retried.
//! - **`Transient`**: the backing samples are not committed yet. Retried with a
//!   bounded backoff by the extractor.
//! - **`Unrecoverable`**: the samples will never match the segment (shape
//!   mismatch, retrieve timeout). The segment is skipped with a warning.
//! - **`Fatal`**: the store is unreachable or the configuration is unusable.
//!   Only this class is allowed to stop an orchestrator loop.
//!
//! Missing calibration, amplification or reference values are not errors at
//! all; they resolve to documented fallbacks inside the extractor.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors raised anywhere in the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Segment case code below -1.
    #[error("Segment {index} carries undefined case code {case}")]
    UndefinedCase {
        /// Segment index.
        index: i64,
        /// Offending case code.
        case: i32,
    },

    /// Retrieved sample count differs from the segment length.
    #[error("Segment {index} expected {expected} samples but retrieved {actual}")]
    ShapeMismatch {
        /// Segment index.
        index: i64,
        /// Segment length.
        expected: usize,
        /// Samples returned by the store.
        actual: usize,
    },

    /// Records a segment needs are not committed yet.
    #[error("Stream '{path}' holds {available} records, {required} required")]
    DataNotYetAvailable {
        /// Stream being read.
        path: String,
        /// Length the read needs.
        required: usize,
        /// Current stream length.
        available: usize,
    },

    /// Retrieval retries exhausted.
    #[error("Gave up waiting for '{path}' after {waited:?}")]
    RetrieveTimeout {
        /// Stream being read.
        path: String,
        /// Time spent retrying.
        waited: Duration,
    },

    /// Backend failure or corrupt stream.
    #[error("Store error: {0}")]
    Store(String),

    /// Config file could not be read or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Config values failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Handling class of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input; drop the segment.
    Invalid,
    /// Data not committed yet; retry.
    Transient,
    /// Permanently unusable segment; skip it.
    Unrecoverable,
    /// Abort the stream.
    Fatal,
}

impl PipelineError {
    /// Classify this error according to how the pipeline must react to it.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::UndefinedCase { .. } => ErrorClass::Invalid,
            PipelineError::DataNotYetAvailable { .. } => ErrorClass::Transient,
            PipelineError::ShapeMismatch { .. } | PipelineError::RetrieveTimeout { .. } => {
                ErrorClass::Unrecoverable
            }
            PipelineError::Store(_)
            | PipelineError::Config(_)
            | PipelineError::Configuration(_)
            | PipelineError::Io(_)
            | PipelineError::TaskFailed(_) => ErrorClass::Fatal,
        }
    }

    /// True when processing of the current stream has to stop.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl From<figment::Error> for PipelineError {
    fn from(value: figment::Error) -> Self {
        PipelineError::Config(Box::new(value))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(value: tokio::task::JoinError) -> Self {
        PipelineError::TaskFailed(value.to_string())
    }
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for PipelineError {
    fn from(value: csv::Error) -> Self {
        PipelineError::Store(value.to_string())
    }
}
