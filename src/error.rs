//! Custom error types for the application.
//!
//! This module defines the primary error type, `SeqError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of errors that can occur, from I/O and
//! configuration issues to instrument-specific problems.
//!
//! ## Error Hierarchy
//!
//! `SeqError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `figment` crate, typically related to
//!   file parsing or format issues in the configuration files.
//! - **`Io`**: Wraps standard `std::io::Error`, covering all sequence-file I/O.
//! - **`Serde`**: Wraps `serde_json` errors raised while encoding or decoding
//!   persisted sequence records.
//! - **`Instrument`**: A general category for errors originating from
//!   instrument drivers. This could be anything from a communication failure
//!   to an invalid command sent to the hardware.
//! - **`InvalidTask`**: Semantic errors in a task's configuration that pass
//!   deserialization but cannot be executed (e.g. an instrument task with no
//!   target or function). These are caught by the executor at dispatch time.
//! - **`UnknownSequence`**: A store operation referenced a sequence name that
//!   is not registered.
//!
//! By using `#[from]`, `SeqError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator. Per-task failures never escape the executor's run loop as errors;
//! they are converted into status + event pairs at that boundary.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SeqError>;

/// The primary error type for the sequence engine.
#[derive(Error, Debug)]
pub enum SeqError {
    /// Configuration load or parse failure.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// File or directory I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure for a persisted sequence record.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Failure reported by an instrument driver during `invoke`.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// A task whose configuration cannot be executed.
    #[error("Invalid task configuration: {0}")]
    InvalidTask(String),

    /// A store operation named a sequence that does not exist.
    #[error("Unknown sequence: {0}")]
    UnknownSequence(String),
}
