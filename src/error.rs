// src/error.rs
// Error types shared by the repository, the TUF engine and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the secure-update engine.
#[derive(Error, Debug)]
pub enum TufError {
    #[error("no trusted root.json in {0}")]
    MissingRoot(PathBuf),

    #[error("invalid TUF url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("TUF repository load failed: {0}")]
    Load(String),

    #[error("target not found in TUF metadata: {0}")]
    TargetNotFound(String),

    #[error("invalid target name '{name}': {reason}")]
    InvalidTargetName { name: String, reason: String },

    #[error("TUF storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TUF runtime error: {0}")]
    Runtime(String),
}

impl TufError {
    /// Stable numeric code carried into `RepositorySecurityError`.
    pub fn code(&self) -> i32 {
        match self {
            TufError::MissingRoot(_) => 1,
            TufError::InvalidUrl { .. } => 2,
            TufError::Load(_) => 3,
            TufError::TargetNotFound(_) => 4,
            TufError::InvalidTargetName { .. } => 5,
            TufError::Storage { .. } => 6,
            TufError::Runtime(_) => 7,
        }
    }
}

/// A trust-framework failure. Always fatal for the operation that raised it.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RepositorySecurityError {
    message: String,
    code: i32,
    #[source]
    source: Option<TufError>,
}

impl RepositorySecurityError {
    pub fn new(message: impl Into<String>) -> Self {
        RepositorySecurityError { message: message.into(), code: 0, source: None }
    }

    /// Wraps an engine failure, prefixing its message and copying its code.
    pub fn from_tuf(prefix: &str, err: TufError) -> Self {
        let err = RepositorySecurityError {
            message: format!("{}: {}", prefix, err),
            code: err.code(),
            source: Some(err),
        };
        err.log();
        err
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn tuf_error(&self) -> Option<&TufError> {
        self.source.as_ref()
    }

    pub(crate) fn log(&self) {
        tracing::error!(target: "security", code = self.code, "TRUST VIOLATION: {}", self.message);
    }
}

/// Errors surfaced by repositories, metadata sources and downloads.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Security(#[from] RepositorySecurityError),

    #[error("failed to prepare directory {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("network error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    #[error("the contents of {url} do not match the expected sha256 (expected {expected}, got {actual})")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("invalid JSON from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),
}

impl RepoError {
    /// True when the failure came from the trust layer rather than ordinary I/O.
    pub fn is_security(&self) -> bool {
        matches!(self, RepoError::Security(_))
    }
}

pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_error_keeps_message_and_code() {
        let err = RepositorySecurityError::from_tuf(
            "TUF security error",
            TufError::Load("timestamp metadata expired".into()),
        );
        assert_eq!(err.message(), "TUF security error: TUF repository load failed: timestamp metadata expired");
        assert_eq!(err.code(), 3);
        assert!(matches!(err.tuf_error(), Some(TufError::Load(_))));
    }

    #[test]
    fn only_security_variant_reports_is_security() {
        let sec: RepoError = RepositorySecurityError::new("TUF secure error: nope").into();
        assert!(sec.is_security());
        let plain = RepoError::Http { url: "https://x/".into(), status: 404 };
        assert!(!plain.is_security());
    }
}
