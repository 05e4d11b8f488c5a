//! src/tuf/mod.rs
//! The secure-update engine seam. Everything above this module only sees
//! `SecureUpdater` and `TargetInfo`; the concrete engine is `ToughUpdater`.

use crate::error::TufError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod storage;
pub mod tough_updater;

pub use storage::FileStorage;
pub use tough_updater::ToughUpdater;

/// Hashes, length and custom data the trust chain records for one target path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Algorithm name -> lowercase hex digest.
    pub hashes: BTreeMap<String, String>,
    pub length: u64,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl TargetInfo {
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get("sha256").map(String::as_str)
    }
}

/// Refreshes the TUF metadata chain and answers target lookups against it.
pub trait SecureUpdater {
    /// Full root -> timestamp -> snapshot -> targets update.
    fn refresh(&self) -> Result<(), TufError>;

    /// Target info for `target`, refreshing first if that never happened.
    fn get_one_valid_target_info(&self, target: &str) -> Result<TargetInfo, TufError>;
}

/// Whether a repository is verified, and by which engine.
#[derive(Clone)]
pub enum Verification {
    Unverified,
    Verified(Arc<dyn SecureUpdater>),
}

impl Verification {
    pub fn verified(engine: impl SecureUpdater + 'static) -> Self {
        Verification::Verified(Arc::new(engine))
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified(_))
    }

    pub fn engine(&self) -> Option<&Arc<dyn SecureUpdater>> {
        match self {
            Verification::Unverified => None,
            Verification::Verified(engine) => Some(engine),
        }
    }
}

impl fmt::Debug for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Unverified => write!(f, "Unverified"),
            Verification::Verified(_) => write!(f, "Verified(..)"),
        }
    }
}

/// Turns a file locator into the path TUF indexes targets by:
/// the URL path without scheme, host, query or leading '/'.
pub fn target_path(locator: &str) -> String {
    match url::Url::parse(locator) {
        Ok(parsed) => parsed.path().trim_start_matches('/').to_string(),
        Err(_) => {
            let end = locator.find(['?', '#']).unwrap_or(locator.len());
            locator[..end].trim_start_matches('/').to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_strips_scheme_host_and_query() {
        assert_eq!(target_path("https://repo.example/packages.json"), "packages.json");
        assert_eq!(target_path("https://repo.example/p2/acme/foo.json?v=3#x"), "p2/acme/foo.json");
        assert_eq!(target_path("https://repo.example"), "");
    }

    #[test]
    fn target_path_handles_relative_locators() {
        assert_eq!(target_path("/p2/acme/foo.json"), "p2/acme/foo.json");
        assert_eq!(target_path("include/all.json?x=1"), "include/all.json");
    }

    #[test]
    fn target_info_exposes_sha256() {
        let mut info = TargetInfo { length: 4, ..Default::default() };
        assert!(info.sha256().is_none());
        info.hashes.insert("sha256".into(), "abc123".into());
        assert_eq!(info.sha256(), Some("abc123"));
    }
}
