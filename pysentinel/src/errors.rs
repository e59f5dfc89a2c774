//! Error taxonomy for the scan engine.
//!
//! Mirrors the kinds enumerated in the specification's error handling design:
//! configuration errors abort startup, datasource/channel/callback errors are
//! logged and the loop continues, and threshold errors are only ever raised by
//! the dynamic update path.

use thiserror::Error as ThisError;

/// Top-level error type for the scan engine.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Bad or missing configuration file, or a schema violation. Fatal to startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A datasource fetch failed (network, auth, or query error).
    #[error("datasource '{name}' fetch failed: {source}")]
    DataSource {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// An alert channel failed to deliver a violation.
    #[error("channel '{name}' send failed: {source}")]
    Channel {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A threshold definition is malformed. Only raised by the dynamic update path.
    #[error("invalid threshold for alert '{alert}': {reason}")]
    Threshold { alert: String, reason: String },

    /// A user-registered violation callback panicked or returned an error.
    #[error("violation callback failed: {0}")]
    Callback(String),

    /// An unexpected error surfaced inside the scan loop itself.
    #[error("scan loop error: {0}")]
    Loop(String),

    /// The run ledger (persisted last-run store) failed.
    #[error("run ledger error: {0}")]
    Ledger(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
