//! Error kinds surfaced to HTTP callers.
//!
//! One `thiserror`-derived enum per concern rather than a single catch-all,
//! matching `ConfigError` elsewhere in this crate. `CoreError` covers
//! consensus errors and client input errors; apply-decode and restore
//! failures are deliberately NOT represented here — those are fatal and
//! abort the process instead of returning a `Result`.

use thiserror::Error;

use crate::consensus::ConsensusError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("write method not allowed")]
    WriteNotAllowed,

    #[error("param error")]
    ParamError,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConsensusError> for CoreError {
    fn from(e: ConsensusError) -> Self {
        // Any propose/encoding failure collapses to "internal error" at the
        // HTTP boundary — the distinction is preserved in logs.
        CoreError::Internal(e.to_string())
    }
}

impl CoreError {
    /// The exact response body text the HTTP surface sends for this error.
    pub fn body_text(&self) -> &'static str {
        match self {
            CoreError::WriteNotAllowed => "write method not allowed",
            CoreError::ParamError => "param error",
            CoreError::Internal(_) => "internal error",
        }
    }
}
