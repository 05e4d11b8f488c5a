// src/tuf/tough_updater.rs
// Secure-update engine backed by the `tough` TUF client.
//
// The storage directory must be seeded with a trusted root.json. tough uses
// the same directory as its datastore for timestamp/snapshot rollback checks,
// and after each refresh the newest verified root is written back so that key
// rotations survive across runs.

use super::{FileStorage, SecureUpdater, TargetInfo};
use crate::error::TufError;
use std::cell::RefCell;
use tokio::runtime::Runtime;
use tough::{HttpTransport, Repository, RepositoryLoader, TargetName, Transport};
use url::Url;

pub const ROOT_KEY: &str = "root.json";

pub struct ToughUpdater<T = HttpTransport> {
    repository: String,
    metadata_url: String,
    storage: FileStorage,
    transport: T,
    runtime: Runtime,
    loaded: RefCell<Option<Repository>>,
}

impl ToughUpdater<HttpTransport> {
    /// No network I/O happens here; the first refresh does it.
    pub fn new(
        repository: impl Into<String>,
        metadata_url: impl Into<String>,
        storage: FileStorage,
    ) -> Result<Self, TufError> {
        Self::with_transport(repository, metadata_url, storage, HttpTransport::default())
    }
}

impl<T: Transport + Clone + 'static> ToughUpdater<T> {
    pub fn with_transport(
        repository: impl Into<String>,
        metadata_url: impl Into<String>,
        storage: FileStorage,
        transport: T,
    ) -> Result<Self, TufError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TufError::Runtime(e.to_string()))?;
        Ok(ToughUpdater {
            repository: repository.into(),
            metadata_url: metadata_url.into(),
            storage,
            transport,
            runtime,
            loaded: RefCell::new(None),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    fn urls(&self) -> Result<(Url, Url), TufError> {
        let metadata = parse_dir_url(&self.metadata_url)?;
        // Targets are fetched by the repository itself, never through tough.
        let targets = parse_dir_url(&self.repository)?;
        Ok((metadata, targets))
    }
}

fn parse_dir_url(raw: &str) -> Result<Url, TufError> {
    let with_slash = if raw.ends_with('/') { raw.to_string() } else { format!("{}/", raw) };
    Url::parse(&with_slash).map_err(|e| TufError::InvalidUrl { url: raw.to_string(), reason: e.to_string() })
}

impl<T: Transport + Clone + 'static> SecureUpdater for ToughUpdater<T> {
    fn refresh(&self) -> Result<(), TufError> {
        let root = self
            .storage
            .read(ROOT_KEY)?
            .ok_or_else(|| TufError::MissingRoot(self.storage.path().to_path_buf()))?;
        let (metadata_url, targets_url) = self.urls()?;
        tracing::debug!(repository = %self.repository, metadata = %metadata_url, "refreshing TUF metadata");

        let loader = RepositoryLoader::new(&root, metadata_url, targets_url)
            .transport(self.transport.clone())
            .datastore(self.storage.path().to_path_buf());
        let repo = self
            .runtime
            .block_on(loader.load())
            .map_err(|e| TufError::Load(e.to_string()))?;

        let latest_root = serde_json::to_vec_pretty(repo.root()).map_err(|e| TufError::Load(e.to_string()))?;
        self.storage.write(ROOT_KEY, &latest_root)?;

        *self.loaded.borrow_mut() = Some(repo);
        Ok(())
    }

    fn get_one_valid_target_info(&self, target: &str) -> Result<TargetInfo, TufError> {
        if self.loaded.borrow().is_none() {
            self.refresh()?;
        }
        let loaded = self.loaded.borrow();
        let repo = loaded.as_ref().ok_or_else(|| TufError::Load("repository not loaded".into()))?;

        let name = TargetName::new(target)
            .map_err(|e| TufError::InvalidTargetName { name: target.to_string(), reason: e.to_string() })?;
        let found = repo
            .targets()
            .signed
            // Non-permissive: a terminating delegation ends the search.
            .find_target(&name, false)
            .map_err(|_| TufError::TargetNotFound(target.to_string()))?;

        let mut info = TargetInfo { length: found.length, ..Default::default() };
        info.hashes.insert("sha256".to_string(), hex::encode(&found.hashes.sha256));
        for (algorithm, value) in &found.hashes._extra {
            if let Some(digest) = value.as_str() {
                info.hashes.insert(algorithm.clone(), digest.to_lowercase());
            }
        }
        info.custom = found.custom.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        tracing::debug!(target_path = target, length = info.length, "resolved TUF target");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::sha256_hex;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::num::NonZeroU64;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;
    use tough::editor::RepositoryEditor;
    use tough::key_source::{KeySource, LocalKeySource};
    use tough::schema::decoded::Decoded;
    use tough::schema::{Hashes, Target};
    use tough::FilesystemTransport;

    const INDEX: &[u8] = br#"{"packages": {}}"#;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/tuf").join(name)
    }

    /// Signs a one-target repository with the fixture key and writes its metadata to `out`.
    fn write_signed_repository(out: &Path) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let expires = Utc::now() + Duration::days(7);
            let one = NonZeroU64::new(1).unwrap();
            let mut target = Target {
                length: INDEX.len() as u64,
                hashes: Hashes { sha256: Decoded::from(Sha256::digest(INDEX).to_vec()), _extra: HashMap::new() },
                custom: HashMap::new(),
                _extra: HashMap::new(),
            };
            target.hashes._extra.insert("sha512".to_string(), json!("ABCDEF0123"));
            target.custom.insert("kind".to_string(), json!("index"));

            let mut editor = RepositoryEditor::new(fixture("root.json")).await.unwrap();
            editor
                .targets_version(one)
                .unwrap()
                .targets_expires(expires)
                .unwrap()
                .snapshot_version(one)
                .snapshot_expires(expires)
                .timestamp_version(one)
                .timestamp_expires(expires)
                .add_target("packages.json", target)
                .unwrap();
            let keys: Vec<Box<dyn KeySource>> = vec![Box::new(LocalKeySource { path: fixture("snakeoil.pem") })];
            editor.sign(&keys).await.unwrap().write(out).await.unwrap();
        });
    }

    fn local_updater(repo_dir: &Path, state_dir: &Path) -> ToughUpdater<FilesystemTransport> {
        let storage = FileStorage::new(state_dir).unwrap();
        storage.write(ROOT_KEY, &std::fs::read(fixture("root.json")).unwrap()).unwrap();
        let metadata = Url::from_directory_path(repo_dir.join("metadata")).unwrap();
        let targets = Url::from_directory_path(repo_dir).unwrap();
        ToughUpdater::with_transport(targets.as_str(), metadata.as_str(), storage, FilesystemTransport).unwrap()
    }

    #[test]
    fn refresh_persists_root_and_resolves_targets() {
        let repo = tempdir().unwrap();
        write_signed_repository(&repo.path().join("metadata"));
        let state = tempdir().unwrap();
        let updater = local_updater(repo.path(), state.path());

        updater.refresh().unwrap();
        let persisted: serde_json::Value =
            serde_json::from_slice(&updater.storage().read(ROOT_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted["signed"]["_type"], "root");
        assert!(state.path().join("timestamp.json").is_file());

        // The persisted root bootstraps the next refresh.
        updater.refresh().unwrap();

        let info = updater.get_one_valid_target_info("packages.json").unwrap();
        assert_eq!(info.sha256(), Some(sha256_hex(INDEX).as_str()));
        assert_eq!(info.length, INDEX.len() as u64);
        assert_eq!(info.hashes.get("sha512").map(String::as_str), Some("abcdef0123"));
        assert_eq!(info.custom.get("kind"), Some(&json!("index")));
    }

    #[test]
    fn lookup_refreshes_lazily_and_rejects_unknown_targets() {
        let repo = tempdir().unwrap();
        write_signed_repository(&repo.path().join("metadata"));
        let state = tempdir().unwrap();
        let updater = local_updater(repo.path(), state.path());

        assert!(matches!(
            updater.get_one_valid_target_info("p2/acme/evil.json"),
            Err(TufError::TargetNotFound(name)) if name == "p2/acme/evil.json"
        ));
        assert!(updater.get_one_valid_target_info("packages.json").is_ok());
    }

    #[test]
    fn refresh_rejects_a_tampered_bootstrap_root() {
        let repo = tempdir().unwrap();
        write_signed_repository(&repo.path().join("metadata"));
        let state = tempdir().unwrap();
        let updater = local_updater(repo.path(), state.path());
        let mut tampered: serde_json::Value =
            serde_json::from_slice(&std::fs::read(fixture("root.json")).unwrap()).unwrap();
        tampered["signed"]["version"] = json!(7);
        updater.storage().write(ROOT_KEY, &serde_json::to_vec(&tampered).unwrap()).unwrap();

        assert!(matches!(updater.refresh(), Err(TufError::Load(_))));
    }

    #[test]
    fn refresh_without_seeded_root_fails_before_network() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let updater = ToughUpdater::new("https://repo.example", "https://repo.example/metadata", storage).unwrap();
        assert!(matches!(updater.refresh(), Err(TufError::MissingRoot(_))));
        assert!(matches!(
            updater.get_one_valid_target_info("packages.json"),
            Err(TufError::MissingRoot(_))
        ));
    }

    #[test]
    fn bad_metadata_url_is_reported_on_refresh() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.write(ROOT_KEY, b"{}").unwrap();
        let updater = ToughUpdater::new("https://repo.example", "not a url", storage).unwrap();
        assert!(matches!(updater.refresh(), Err(TufError::InvalidUrl { .. })));
    }

    #[test]
    fn dir_urls_get_trailing_slash() {
        assert_eq!(parse_dir_url("https://repo.example/metadata").unwrap().as_str(), "https://repo.example/metadata/");
        assert_eq!(parse_dir_url("https://repo.example/").unwrap().as_str(), "https://repo.example/");
    }
}
