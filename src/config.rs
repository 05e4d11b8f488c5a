// src/config.rs
// Loads nxpkg-tuf configuration from /etc and user config; provides defaults.
// Repository definitions live in a separate repos.toml.

use crate::error::{RepoError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// `{url, tuf?: {url}}` for one remote package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuf: Option<TufRepoConfig>,
}

/// Trust settings for a repository. `url` is the TUF metadata prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TufRepoConfig {
    pub url: String,
}

impl RepoConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RepoConfig { url: url.into(), tuf: None }
    }

    pub fn with_tuf(mut self, metadata_url: impl Into<String>) -> Self {
        self.tuf = Some(TufRepoConfig { url: metadata_url.into() });
        self
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| RepoError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base directory for persistent trust state.
    pub vendor_dir: PathBuf,
    /// HTTP metadata cache and downloaded artifacts.
    pub cache_dir: PathBuf,
    pub repos_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            vendor_dir: PathBuf::from("/var/lib/nxpkg"),
            cache_dir: PathBuf::from("/var/cache/nxpkg"),
            repos_file: PathBuf::from("/etc/nxpkg/repos.toml"),
        }
    }
}

// Every key optional so later layers override only what they set.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    vendor_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    repos_file: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReposFile {
    #[serde(default)]
    repository: Vec<RepoConfig>,
}

impl AppConfig {
    pub fn load() -> Self {
        let user_base = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("~/.config").expand_home());
        let mut cfg = Self::load_layers(
            &[PathBuf::from("/etc/nxpkg/config.toml"), user_base.join("nxpkg/config.toml")],
            |key| env::var(key).ok(),
        );
        // A user repos.toml wins over the system one when no explicit path was configured.
        let user_repos = user_base.join("nxpkg/repos.toml");
        if cfg.repos_file == AppConfig::default().repos_file && user_repos.exists() {
            cfg.repos_file = user_repos;
        }
        cfg
    }

    /// Applies config files in order, then environment overrides (highest priority).
    pub fn load_layers<F>(files: &[PathBuf], env_lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AppConfig::default();
        for path in files {
            if path.exists() {
                if let Err(e) = cfg.apply_file(path) {
                    tracing::warn!("failed to load {}: {}", path.display(), e);
                }
            }
        }

        if let Some(v) = env_lookup("NXPKG_VENDOR_DIR") { cfg.vendor_dir = PathBuf::from(v).expand_home(); }
        if let Some(v) = env_lookup("NXPKG_CACHE_DIR") { cfg.cache_dir = PathBuf::from(v).expand_home(); }
        if let Some(v) = env_lookup("NXPKG_REPOS_FILE") { cfg.repos_file = PathBuf::from(v).expand_home(); }
        cfg
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| RepoError::Config(e.to_string()))?;
        let storage = file.storage;
        if let Some(v) = storage.vendor_dir { self.vendor_dir = v.expand_home(); }
        if let Some(v) = storage.cache_dir { self.cache_dir = v.expand_home(); }
        if let Some(v) = storage.repos_file { self.repos_file = v.expand_home(); }
        Ok(())
    }

    /// Directory holding trust state for all TUF-enabled repositories.
    pub fn tuf_state_dir(&self) -> PathBuf {
        self.vendor_dir.join("tuf").join("repo")
    }

    pub fn repositories(&self) -> Result<Vec<RepoConfig>> {
        load_repositories(&self.repos_file)
    }
}

pub fn load_repositories(path: &Path) -> Result<Vec<RepoConfig>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let file: ReposFile = toml::from_str(&content)
        .map_err(|e| RepoError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(file.repository)
}

pub fn save_repositories(path: &Path, repos: &[RepoConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = ReposFile { repository: repos.to_vec() };
    let out = toml::to_string_pretty(&file).map_err(|e| RepoError::Config(e.to_string()))?;
    fs::write(path, out)?;
    Ok(())
}

/// Adds a repository, replacing any existing entry with the same url.
pub fn add_repository(path: &Path, repo: RepoConfig) -> Result<()> {
    let mut repos = load_repositories(path)?;
    match repos.iter_mut().find(|r| r.url == repo.url) {
        Some(existing) => *existing = repo,
        None => repos.push(repo),
    }
    save_repositories(path, &repos)
}

/// Returns false when no repository with that url was configured.
pub fn remove_repository(path: &Path, url: &str) -> Result<bool> {
    let mut repos = load_repositories(path)?;
    let before = repos.len();
    repos.retain(|r| r.url != url);
    if repos.len() == before {
        return Ok(false);
    }
    save_repositories(path, &repos)?;
    Ok(true)
}

// Small helper to expand leading ~ in paths
trait ExpandHome {
    fn expand_home(self) -> PathBuf;
}

impl ExpandHome for PathBuf {
    fn expand_home(self) -> PathBuf {
        let s = self.to_string_lossy().to_string();
        if let Some(rest) = s.strip_prefix("~/") {
            if let Some(home) = dirs_next::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(s)
    }
}
