// src/source.rs
// Where repository metadata comes from. `MetadataSource` is the I/O seam a
// repository calls for its root index and every metadata file; `HttpSource`
// is the plain network implementation with an on-disk cache.

use crate::downloader::Downloader;
use crate::error::{RepoError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

pub const ROOT_FILE: &str = "packages.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub cache_key: Option<String>,
    /// Expected sha256 hex digest of the body.
    pub sha256: Option<String>,
    pub store_last_modified: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        FetchRequest { url: url.into(), cache_key: None, sha256: None, store_last_modified: false }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn sha256(mut self, hash: impl Into<String>) -> Self {
        self.sha256 = Some(hash.into());
        self
    }

    pub fn track_last_modified(mut self) -> Self {
        self.store_last_modified = true;
        self
    }
}

pub trait MetadataSource {
    /// Repository endpoint this source reads from.
    fn url(&self) -> &str;

    /// The request that loads the root index.
    fn root_request(&self) -> Result<FetchRequest> {
        let (root, _) = root_urls(self.url())?;
        Ok(FetchRequest::new(root.as_str()).cache_key(ROOT_FILE))
    }

    /// Loads and parses the repository's root index.
    fn load_root_server_file(&self) -> Result<Value> {
        self.fetch_file(self.root_request()?)
    }

    /// Fetches and parses one metadata file.
    fn fetch_file(&self, request: FetchRequest) -> Result<Value>;
}

/// The root index URL and the base other URLs resolve against.
/// An endpoint ending in `.json` is the root file itself.
pub fn root_urls(endpoint: &str) -> Result<(Url, Url)> {
    let trimmed = endpoint.trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| RepoError::Config(format!("invalid repository url '{}': {}", endpoint, e)))?;
    if parsed.path().ends_with(".json") {
        let base = parsed.join("./").map_err(|e| RepoError::Config(e.to_string()))?;
        Ok((parsed, base))
    } else {
        let base = Url::parse(&format!("{}/", trimmed)).map_err(|e| RepoError::Config(e.to_string()))?;
        let root = base.join(ROOT_FILE).map_err(|e| RepoError::Config(e.to_string()))?;
        Ok((root, base))
    }
}

/// Resolves `locator` against the repository endpoint unless already absolute.
pub fn resolve_url(endpoint: &str, locator: &str) -> Result<String> {
    if Url::parse(locator).is_ok() {
        return Ok(locator.to_string());
    }
    let (_, base) = root_urls(endpoint)?;
    base.join(locator)
        .map(String::from)
        .map_err(|e| RepoError::Config(format!("cannot resolve '{}': {}", locator, e)))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct HttpSource {
    url: String,
    cache_dir: Option<PathBuf>,
    downloader: Arc<dyn Downloader>,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, downloader: Arc<dyn Downloader>) -> Self {
        HttpSource { url: url.into(), cache_dir: None, downloader }
    }

    /// Cache fetched files under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        let safe: String = key.chars().map(|c| if c == '/' || c == '\\' { '~' } else { c }).collect();
        self.cache_dir.as_ref().map(|d| d.join(safe))
    }

    fn read_cache(&self, key: &str) -> Option<(Vec<u8>, Option<String>)> {
        let path = self.cache_path(key)?;
        let body = fs::read(&path).ok()?;
        let last_modified = fs::read_to_string(path.with_extension("last-modified"))
            .ok()
            .map(|s| s.trim().to_string());
        Some((body, last_modified))
    }

    fn write_cache(&self, key: &str, body: &[u8], last_modified: Option<&str>) {
        let Some(path) = self.cache_path(key) else { return };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        // Cache failures never fail the fetch.
        if let Err(e) = fs::write(&path, body) {
            tracing::warn!("failed to write cache {}: {}", path.display(), e);
            return;
        }
        let stamp = path.with_extension("last-modified");
        match last_modified {
            Some(lm) => { let _ = fs::write(stamp, lm); }
            None => { let _ = fs::remove_file(stamp); }
        }
    }
}

fn parse_json(url: &str, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|source| RepoError::Parse { url: url.to_string(), source })
}

fn check_sha256(url: &str, body: &[u8], expected: Option<&str>) -> Result<()> {
    if let Some(expected) = expected {
        let actual = sha256_hex(body);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(RepoError::ChecksumMismatch { url: url.to_string(), expected: expected.to_string(), actual });
        }
    }
    Ok(())
}

impl MetadataSource for HttpSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn fetch_file(&self, request: FetchRequest) -> Result<Value> {
        let url = resolve_url(&self.url, &request.url)?;
        let expected = request.sha256.as_deref();
        let cached = request.cache_key.as_deref().and_then(|k| self.read_cache(k));

        // A hash-pinned cache hit needs no network round trip.
        if let (Some(expected), Some((body, _))) = (expected, cached.as_ref()) {
            if sha256_hex(body).eq_ignore_ascii_case(expected) {
                tracing::debug!(url = %url, "using hash-verified cache entry");
                return parse_json(&url, body);
            }
        }

        let since = if request.store_last_modified {
            cached.as_ref().and_then(|(_, lm)| lm.as_deref())
        } else {
            None
        };
        let response = self.downloader.get(&url, since)?;
        if response.is_not_modified() {
            if let Some((body, _)) = cached.as_ref() {
                tracing::debug!(url = %url, "not modified, using cache");
                check_sha256(&url, body, expected)?;
                return parse_json(&url, body);
            }
            return Err(RepoError::Http { url, status: response.status });
        }

        check_sha256(&url, &response.body, expected)?;
        let value = parse_json(&url, &response.body)?;
        if let Some(key) = request.cache_key.as_deref() {
            let last_modified = if request.store_last_modified { response.last_modified.as_deref() } else { None };
            self.write_cache(key, &response.body, last_modified);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{Download, Response};
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeDownloader {
        responses: RefCell<Vec<Response>>,
        calls: RefCell<Vec<(String, Option<String>)>>,
    }

    impl FakeDownloader {
        fn with(responses: Vec<Response>) -> Self {
            FakeDownloader { responses: RefCell::new(responses), calls: RefCell::default() }
        }
    }

    impl Downloader for FakeDownloader {
        fn get(&self, url: &str, since: Option<&str>) -> Result<Response> {
            self.calls.borrow_mut().push((url.to_string(), since.map(str::to_string)));
            Ok(self.responses.borrow_mut().remove(0))
        }

        fn open(&self, url: &str) -> Result<Download> {
            Err(RepoError::NotFound(url.to_string()))
        }
    }

    fn ok(body: &str, last_modified: Option<&str>) -> Response {
        Response { status: 200, body: body.as_bytes().to_vec(), last_modified: last_modified.map(str::to_string) }
    }

    #[test]
    fn root_urls_for_directory_and_json_endpoints() {
        let (root, base) = root_urls("https://repo.example/sub").unwrap();
        assert_eq!(root.as_str(), "https://repo.example/sub/packages.json");
        assert_eq!(base.as_str(), "https://repo.example/sub/");

        let (root, base) = root_urls("https://repo.example/packages.json").unwrap();
        assert_eq!(root.as_str(), "https://repo.example/packages.json");
        assert_eq!(base.as_str(), "https://repo.example/");

        assert_eq!(
            resolve_url("https://repo.example/sub", "/p2/acme/foo.json").unwrap(),
            "https://repo.example/p2/acme/foo.json"
        );
    }

    #[test]
    fn checksum_mismatch_is_an_ordinary_error() {
        let dl = Arc::new(FakeDownloader::with(vec![ok("{}", None)]));
        let source = HttpSource::new("https://repo.example", dl);
        let err = source
            .fetch_file(FetchRequest::new("https://repo.example/a.json").sha256("00"))
            .unwrap_err();
        assert!(matches!(err, RepoError::ChecksumMismatch { .. }));
        assert!(!err.is_security());
    }

    #[test]
    fn hash_pinned_cache_hit_skips_network() {
        let dir = tempdir().unwrap();
        let dl = Arc::new(FakeDownloader::with(vec![ok(r#"{"a":1}"#, None)]));
        let source = HttpSource::new("https://repo.example", dl.clone()).with_cache_dir(dir.path());
        let hash = sha256_hex(br#"{"a":1}"#);

        let req = FetchRequest::new("https://repo.example/a.json").cache_key("a.json").sha256(hash.clone());
        assert_eq!(source.fetch_file(req.clone()).unwrap()["a"], 1);
        assert_eq!(source.fetch_file(req).unwrap()["a"], 1);
        assert_eq!(dl.calls.borrow().len(), 1);
    }

    #[test]
    fn last_modified_is_sent_and_304_reuses_cache() {
        let dir = tempdir().unwrap();
        let not_modified = Response { status: 304, body: Vec::new(), last_modified: None };
        let dl = Arc::new(FakeDownloader::with(vec![ok(r#"{"v":2}"#, Some("Tue, 01 Sep 2026 10:00:00 GMT")), not_modified]));
        let source = HttpSource::new("https://repo.example", dl.clone()).with_cache_dir(dir.path());

        let req = FetchRequest::new("p2/acme/foo.json").cache_key("provider-acme/foo.json").track_last_modified();
        source.fetch_file(req.clone()).unwrap();
        let value = source.fetch_file(req).unwrap();
        assert_eq!(value["v"], 2);

        let calls = dl.calls.borrow();
        assert_eq!(calls[0], ("https://repo.example/p2/acme/foo.json".to_string(), None));
        assert_eq!(calls[1].1.as_deref(), Some("Tue, 01 Sep 2026 10:00:00 GMT"));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dl = Arc::new(FakeDownloader::with(vec![ok("not json", None)]));
        let source = HttpSource::new("https://repo.example", dl);
        assert!(matches!(source.load_root_server_file(), Err(RepoError::Parse { .. })));
    }
}
