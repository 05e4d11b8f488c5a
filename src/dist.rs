//! src/dist.rs
//! Downloads package archives and re-verifies them against the TUF engine the
//! package was decorated with. Unverified bytes are written to a temp file and
//! only moved into place after verification passes.

use crate::downloader::Downloader;
use crate::error::{RepoError, RepositorySecurityError, Result};
use crate::package::Package;
use crate::tuf::target_path;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What was actually downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub sha256: String,
    pub length: u64,
}

impl ArtifactDigest {
    pub fn of(bytes: &[u8]) -> Self {
        ArtifactDigest { sha256: hex::encode(Sha256::digest(bytes)), length: bytes.len() as u64 }
    }
}

fn security(message: String) -> RepoError {
    let err = RepositorySecurityError::new(message);
    err.log();
    err.into()
}

/// Checks a downloaded artifact. A trust-bound package must match its TUF
/// target exactly (sha256 and length); otherwise a sha256 declared in the
/// package's dist entry is checked if present.
pub fn verify_artifact(package: &Package, url: &str, digest: &ArtifactDigest) -> Result<()> {
    if package.is_trust_bound() {
        let Some(engine) = package.trust_handle() else {
            return Err(security(format!(
                "TUF secure error: trust engine for {} {} is no longer available",
                package.name, package.version
            )));
        };
        let target = target_path(url);
        let info = engine
            .get_one_valid_target_info(&target)
            .map_err(|e| RepositorySecurityError::from_tuf("TUF secure error", e))?;
        let hash_ok = info.sha256().is_some_and(|h| h.eq_ignore_ascii_case(&digest.sha256));
        if !hash_ok || info.length != digest.length {
            return Err(security(format!(
                "TUF secure error: downloaded {} does not match its TUF target (expected {} bytes, sha256 {}; got {} bytes, sha256 {})",
                target,
                info.length,
                info.sha256().unwrap_or("<none>"),
                digest.length,
                digest.sha256
            )));
        }
        tracing::debug!(target_path = %target, "artifact matches TUF target");
        return Ok(());
    }

    if let Some(expected) = package.dist.as_ref().and_then(|d| d.sha256.as_deref()) {
        if !expected.eq_ignore_ascii_case(&digest.sha256) {
            return Err(RepoError::ChecksumMismatch {
                url: url.to_string(),
                expected: expected.to_string(),
                actual: digest.sha256.clone(),
            });
        }
    }
    Ok(())
}

pub struct ArtifactDownloader {
    downloader: Arc<dyn Downloader>,
    show_progress: bool,
}

impl ArtifactDownloader {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        ArtifactDownloader { downloader, show_progress: false }
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Downloads `package`'s dist archive into `dest_dir` and returns its path.
    pub fn download(&self, package: &Package, dest_dir: &Path) -> Result<PathBuf> {
        let dist = package
            .dist
            .as_ref()
            .ok_or_else(|| RepoError::NotFound(format!("{} {} has no dist archive", package.name, package.version)))?;
        std::fs::create_dir_all(dest_dir)?;

        let mut download = self.downloader.open(&dist.url)?;
        let pb = if self.show_progress {
            let pb = ProgressBar::new(download.content_length.unwrap_or(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dest_dir)?;
        let mut hasher = Sha256::new();
        let mut length = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = download.reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            length += n as u64;
            pb.inc(n as u64);
        }
        tmp.flush()?;
        pb.finish_and_clear();

        let digest = ArtifactDigest { sha256: hex::encode(hasher.finalize()), length };
        verify_artifact(package, &dist.url, &digest)?;

        let dest = dest_dir.join(file_name(package, &dist.url));
        tmp.persist(&dest).map_err(|e| RepoError::Io(e.error))?;
        Ok(dest)
    }
}

fn file_name(package: &Package, url: &str) -> String {
    let from_url = target_path(url).rsplit('/').next().map(str::to_string).unwrap_or_default();
    if from_url.is_empty() {
        format!("{}-{}.tar", package.name.replace('/', "-"), package.version)
    } else {
        from_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Dist;

    #[test]
    fn unbound_package_checks_dist_sha256() {
        let digest = ArtifactDigest::of(b"archive");
        let pkg = Package::new("acme/foo", "1.0.0").with_dist(Dist {
            url: "https://repo.example/dist/foo.tar.gz".into(),
            kind: "tar".into(),
            sha256: Some(digest.sha256.to_uppercase()),
        });
        verify_artifact(&pkg, "https://repo.example/dist/foo.tar.gz", &digest).unwrap();

        let other = ArtifactDigest::of(b"tampered");
        let err = verify_artifact(&pkg, "https://repo.example/dist/foo.tar.gz", &other).unwrap_err();
        assert!(matches!(err, RepoError::ChecksumMismatch { .. }));
    }

    #[test]
    fn unbound_package_without_hash_is_accepted() {
        let pkg = Package::new("acme/foo", "1.0.0");
        verify_artifact(&pkg, "https://repo.example/x.tar", &ArtifactDigest::of(b"x")).unwrap();
    }

    #[test]
    fn file_name_from_url_or_package() {
        let pkg = Package::new("acme/foo", "1.0.0");
        assert_eq!(file_name(&pkg, "https://repo.example/dist/foo-1.0.0.tar.gz?token=1"), "foo-1.0.0.tar.gz");
        assert_eq!(file_name(&pkg, "https://repo.example/"), "acme-foo-1.0.0.tar");
    }
}
