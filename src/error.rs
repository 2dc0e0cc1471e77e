//! Error type shared by every component of the crate.

use std::path::PathBuf;

/// Errors produced by discovery, configuration fetching and synchronization.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Kubernetes API rejected a request or the client could not be built.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// An HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An HTTP request completed with a non-success status.
    #[error("{url} responded with status {status}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The status code received.
        status: u16,
    },

    /// A response body or configuration document was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a local file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration schema could not be compiled.
    #[error("invalid schema for config {config_name}: {message}")]
    InvalidSchema {
        /// The config item owning the schema.
        config_name: String,
        /// The compiler error.
        message: String,
    },

    /// A fetched configuration document did not satisfy its schema.
    #[error("config {config_name} failed validation: {message}")]
    Validation {
        /// The config item being validated.
        config_name: String,
        /// The collected validation errors.
        message: String,
    },

    /// A fetched configuration document was empty and empty documents are not allowed.
    #[error("config {config_name} is empty")]
    EmptyConfig {
        /// The config item that came back empty.
        config_name: String,
    },

    /// A metric update was attempted with a value that is not a finite number.
    #[error("metric {name} rejected non-numeric value {value}")]
    InvalidMetricValue {
        /// The metric name.
        name: String,
        /// The rejected value.
        value: f64,
    },

    /// Host name resolution failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        /// The host that could not be resolved.
        host: String,
        /// The underlying resolver error.
        source: std::io::Error,
    },

    /// A required field was missing from a resource or request.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
