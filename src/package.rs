// src/package.rs
// Package records served by a repository, plus version/stability matching.

use crate::tuf::SecureUpdater;
use serde::Deserialize;
use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

/// Where a package's distributable archive lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Dist {
    pub url: String,
    #[serde(rename = "type", default = "default_dist_kind")]
    pub kind: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_dist_kind() -> String {
    "tar".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dist: Option<Dist>,
    // Set once by a verifying repository; never owns the engine.
    #[serde(skip)]
    trust: OnceCell<Weak<dyn SecureUpdater>>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Package {
            name: name.into(),
            version: version.into(),
            description: None,
            dist: None,
            trust: OnceCell::new(),
        }
    }

    pub fn with_dist(mut self, dist: Dist) -> Self {
        self.dist = Some(dist);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stability(&self) -> Stability {
        Stability::of_version(&self.version)
    }

    /// Attach the engine that vouches for this package. Later calls are ignored.
    pub fn attach_trust(&self, engine: &Arc<dyn SecureUpdater>) {
        let _ = self.trust.set(Arc::downgrade(engine));
    }

    /// True once a verifying repository has decorated this package,
    /// even if the engine has since been dropped.
    pub fn is_trust_bound(&self) -> bool {
        self.trust.get().is_some()
    }

    /// The engine, if one was attached and is still alive.
    pub fn trust_handle(&self) -> Option<Arc<dyn SecureUpdater>> {
        self.trust.get().and_then(Weak::upgrade)
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.description == other.description
            && self.dist == other.dist
    }
}

/// Ordered from most to least stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Stable,
    Rc,
    Beta,
    Alpha,
    Dev,
}

impl Stability {
    pub fn of_version(version: &str) -> Stability {
        let v = version.trim().to_lowercase();
        if v.starts_with("dev-") || v.ends_with("-dev") {
            return Stability::Dev;
        }
        let pre = match semver::Version::parse(v.trim_start_matches('v')) {
            Ok(parsed) => parsed.pre.as_str().to_string(),
            Err(_) => {
                let core = v.split_once('+').map_or(v.as_str(), |(head, _)| head);
                core.rsplit_once('-').map(|(_, p)| p.to_string()).unwrap_or_default()
            }
        };
        // The modifier is the leading word of the pre-release label; any
        // number that follows ("rc1", "beta.2") does not change it.
        let modifier = pre
            .trim_start_matches(['.', '_', '-'])
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        match modifier {
            "rc" => Stability::Rc,
            "beta" | "b" => Stability::Beta,
            "alpha" | "a" => Stability::Alpha,
            "dev" => Stability::Dev,
            // "stable", "patch", "pl", "p", and labels that carry no modifier.
            _ => Stability::Stable,
        }
    }
}

impl FromStr for Stability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(Stability::Stable),
            "rc" => Ok(Stability::Rc),
            "beta" => Ok(Stability::Beta),
            "alpha" => Ok(Stability::Alpha),
            "dev" => Ok(Stability::Dev),
            other => Err(format!("unknown stability '{}'", other)),
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Stable => "stable",
            Stability::Rc => "RC",
            Stability::Beta => "beta",
            Stability::Alpha => "alpha",
            Stability::Dev => "dev",
        };
        write!(f, "{}", s)
    }
}

/// A semver requirement. Versions that are not semver (`dev-main`) only
/// satisfy the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    req: semver::VersionReq,
}

impl VersionConstraint {
    pub fn any() -> Self {
        VersionConstraint { raw: "*".to_string(), req: semver::VersionReq::STAR }
    }

    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        Ok(VersionConstraint { raw: raw.trim().to_string(), req: semver::VersionReq::parse(raw)? })
    }

    pub fn matches(&self, version: &str) -> bool {
        if self.raw == "*" {
            return true;
        }
        match semver::Version::parse(version.trim().trim_start_matches('v')) {
            Ok(v) => self.req.matches(&v),
            Err(_) => false,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
