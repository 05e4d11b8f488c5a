//! src/tuf_repository.rs
//! TUF-verified repositories.
//!
//! Two decorators share one `Verification`:
//!
//! * `TufValidatedSource` sits under the repository on the I/O seam. It
//!   refreshes trust metadata before the root index is loaded and pins every
//!   fetched file to the sha256 recorded in TUF targets metadata.
//! * `TufValidatedRepository` sits over the repository and attaches a trust
//!   handle to every package it hands out, so artifact downloads can re-verify
//!   later against the same engine.
//!
//! With `Verification::Unverified` both are transparent.

use crate::config::{AppConfig, RepoConfig};
use crate::downloader::Downloader;
use crate::error::{RepoError, RepositorySecurityError, Result, TufError};
use crate::io::Io;
use crate::package::{Package, Stability, VersionConstraint};
use crate::repository::{IndexRepository, LoadResult, Repository};
use crate::source::{resolve_url, FetchRequest, HttpSource, MetadataSource};
use crate::tuf::{target_path, FileStorage, ToughUpdater, Verification};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const REFRESH_PREFIX: &str = "TUF security error";
const FETCH_PREFIX: &str = "TUF secure error";

/// The full stack built from configuration.
pub type SecureRepository = TufValidatedRepository<IndexRepository<TufValidatedSource<HttpSource>>>;

/// Filesystem-safe directory name for a repository url: every character
/// outside `[A-Za-z0-9.]` becomes `-`.
pub fn repo_dir_name(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect()
}

/// Decides how `config` is verified. Creates the trust-state directory when
/// TUF is configured; warns through `io` when it is not.
pub fn verification_for(config: &RepoConfig, io: &dyn Io, app: &AppConfig) -> Result<Verification> {
    let Some(tuf) = &config.tuf else {
        io.warning(&format!("Authenticity of packages from {} are not verified by TUF.", config.url));
        return Ok(Verification::Unverified);
    };

    let dir = app.tuf_state_dir().join(repo_dir_name(&config.url));
    let storage = FileStorage::new(&dir).map_err(|e| match e {
        TufError::Storage { path, source } => RepoError::Storage { path, source },
        other => RepoError::Config(other.to_string()),
    })?;
    tracing::debug!(repository = %config.url, state = %dir.display(), "TUF verification enabled");
    let engine = ToughUpdater::new(config.url.clone(), tuf.url.clone(), storage)
        .map_err(|e| RepoError::Config(e.to_string()))?;
    Ok(Verification::verified(engine))
}

pub struct TufValidatedSource<S> {
    inner: S,
    verification: Verification,
}

impl<S: MetadataSource> TufValidatedSource<S> {
    pub fn new(inner: S, verification: Verification) -> Self {
        TufValidatedSource { inner, verification }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn verification(&self) -> &Verification {
        &self.verification
    }
}

impl<S: MetadataSource> MetadataSource for TufValidatedSource<S> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn root_request(&self) -> Result<FetchRequest> {
        self.inner.root_request()
    }

    fn load_root_server_file(&self) -> Result<Value> {
        let Verification::Verified(engine) = &self.verification else {
            return self.inner.load_root_server_file();
        };
        engine
            .refresh()
            .map_err(|e| RepositorySecurityError::from_tuf(REFRESH_PREFIX, e))?;
        // The root file itself goes through hash pinning too.
        self.fetch_file(self.inner.root_request()?)
    }

    fn fetch_file(&self, mut request: FetchRequest) -> Result<Value> {
        let Verification::Verified(engine) = &self.verification else {
            return self.inner.fetch_file(request);
        };

        // Look up the same absolute url the inner source will download.
        request.url = resolve_url(self.inner.url(), &request.url)?;
        let target = target_path(&request.url);
        let info = engine
            .get_one_valid_target_info(&target)
            .map_err(|e| RepositorySecurityError::from_tuf(FETCH_PREFIX, e))?;
        let Some(trusted) = info.sha256() else {
            let err = RepositorySecurityError::new(format!("{}: no sha256 hash recorded for {}", FETCH_PREFIX, target));
            err.log();
            return Err(err.into());
        };

        // TODO: decide whether hashes from an authenticated root index could skip the TUF lookup.
        if let Some(given) = request.sha256.as_deref() {
            if !given.eq_ignore_ascii_case(trusted) {
                let err = RepositorySecurityError::new(format!(
                    "{}: disagreement between TUF and repository on expected hash of {}",
                    FETCH_PREFIX, target
                ));
                err.log();
                return Err(err.into());
            }
        }
        tracing::debug!(target_path = %target, "pinned fetch to TUF sha256");
        request.sha256 = Some(trusted.to_string());
        self.inner.fetch_file(request).map_err(|e| match e {
            RepoError::ChecksumMismatch { url, expected, actual } => {
                let err = RepositorySecurityError::new(format!(
                    "{}: content of {} does not match the sha256 recorded by TUF (expected {}, got {})",
                    FETCH_PREFIX, url, expected, actual
                ));
                err.log();
                err.into()
            }
            other => other,
        })
    }
}

pub struct TufValidatedRepository<R> {
    inner: R,
    verification: Verification,
}

impl<R: Repository> TufValidatedRepository<R> {
    pub fn new(inner: R, verification: Verification) -> Self {
        TufValidatedRepository { inner, verification }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn verification(&self) -> &Verification {
        &self.verification
    }

    fn decorate(&self, package: Option<Package>) -> Option<Package> {
        if let (Some(pkg), Verification::Verified(engine)) = (package.as_ref(), &self.verification) {
            pkg.attach_trust(engine);
        }
        package
    }

    fn decorate_all(&self, packages: Vec<Package>) -> Vec<Package> {
        if let Verification::Verified(engine) = &self.verification {
            packages.iter().for_each(|p| p.attach_trust(engine));
        }
        packages
    }
}

impl SecureRepository {
    /// Builds the whole stack for one configured repository. No network I/O.
    pub fn from_config(
        config: &RepoConfig,
        io: &dyn Io,
        app: &AppConfig,
        downloader: Arc<dyn Downloader>,
    ) -> Result<Self> {
        let verification = verification_for(config, io, app)?;
        let http = HttpSource::new(config.url.clone(), downloader)
            .with_cache_dir(app.cache_dir.join("repo").join(repo_dir_name(&config.url)));
        let source = TufValidatedSource::new(http, verification.clone());
        Ok(TufValidatedRepository::new(IndexRepository::new(source), verification))
    }
}

impl<R: Repository> Repository for TufValidatedRepository<R> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn find_package(&self, name: &str, constraint: &VersionConstraint) -> Result<Option<Package>> {
        Ok(self.decorate(self.inner.find_package(name, constraint)?))
    }

    fn find_packages(&self, name: &str, constraint: Option<&VersionConstraint>) -> Result<Vec<Package>> {
        Ok(self.decorate_all(self.inner.find_packages(name, constraint)?))
    }

    fn get_packages(&self) -> Result<Vec<Package>> {
        Ok(self.decorate_all(self.inner.get_packages()?))
    }

    fn load_packages(
        &self,
        name_map: &BTreeMap<String, Option<VersionConstraint>>,
        acceptable_stabilities: &BTreeSet<Stability>,
        stability_flags: &BTreeMap<String, Stability>,
        already_loaded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<LoadResult> {
        let mut result = self
            .inner
            .load_packages(name_map, acceptable_stabilities, stability_flags, already_loaded)?;
        result.packages = self.decorate_all(std::mem::take(&mut result.packages));
        Ok(result)
    }
}
