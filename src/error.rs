// src/error.rs
//! Failure taxonomy for a single source attempt.
//!
//! None of these ever escape the snapshot path: the chain runner records them
//! per attempt and moves on to the next source.

use thiserror::Error;

use crate::fetch::types::Format;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("local read failed: {0}")]
    Io(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("body did not decode as {0:?}")]
    Undecodable(Format),

    #[error("no plausible value in decoded body")]
    NoPlausibleValue,
}

impl AttemptError {
    /// Short stable label for logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            AttemptError::Transport(_) => "transport",
            AttemptError::Status(_) => "status",
            AttemptError::Timeout(_) => "timeout",
            AttemptError::Io(_) => "io",
            AttemptError::MissingEnv(_) => "missing_env",
            AttemptError::Undecodable(_) => "decode",
            AttemptError::NoPlausibleValue => "extract",
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout_ms: u64) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout(timeout_ms)
        } else if let Some(status) = e.status() {
            AttemptError::Status(status.as_u16())
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable_labels() {
        assert_eq!(AttemptError::Status(503).reason(), "status");
        assert_eq!(AttemptError::Timeout(10).reason(), "timeout");
        assert_eq!(AttemptError::Undecodable(Format::Csv).reason(), "decode");
        assert_eq!(AttemptError::NoPlausibleValue.reason(), "extract");
    }

    #[test]
    fn display_mentions_status_code() {
        assert_eq!(
            AttemptError::Status(503).to_string(),
            "upstream returned HTTP 503"
        );
    }
}
