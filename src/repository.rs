// src/repository.rs
// The package side of a repository: lookups, listing and batched loads.
// `IndexRepository` reads a composer-style packages.json through any
// `MetadataSource`.

use crate::error::{RepoError, Result};
use crate::package::{Package, Stability, VersionConstraint};
use crate::source::{resolve_url, FetchRequest, MetadataSource};
use serde::Deserialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Result of `Repository::load_packages`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    /// Every requested name the repository knows about, filtered or not.
    pub names_found: Vec<String>,
    pub packages: Vec<Package>,
}

pub trait Repository {
    fn url(&self) -> &str;

    fn find_package(&self, name: &str, constraint: &VersionConstraint) -> Result<Option<Package>>;

    fn find_packages(&self, name: &str, constraint: Option<&VersionConstraint>) -> Result<Vec<Package>>;

    fn get_packages(&self) -> Result<Vec<Package>>;

    fn load_packages(
        &self,
        name_map: &BTreeMap<String, Option<VersionConstraint>>,
        acceptable_stabilities: &BTreeSet<Stability>,
        stability_flags: &BTreeMap<String, Stability>,
        already_loaded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<LoadResult>;

    /// Case-insensitive match on name or description.
    fn search(&self, term: &str) -> Result<Vec<Package>> {
        let term = term.to_lowercase();
        Ok(self
            .get_packages()?
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&term)
                    || p.description.as_deref().is_some_and(|d| d.to_lowercase().contains(&term))
            })
            .collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PackageMap {
    #[serde(default)]
    packages: BTreeMap<String, Vec<Package>>,
}

#[derive(Debug, Default, Deserialize)]
struct IncludeEntry {
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RootIndex {
    #[serde(default)]
    packages: BTreeMap<String, Vec<Package>>,
    #[serde(default)]
    includes: BTreeMap<String, IncludeEntry>,
    #[serde(rename = "metadata-url", default)]
    metadata_url: Option<String>,
    #[serde(rename = "available-packages", default)]
    available_packages: Vec<String>,
}

fn named(name: &str, versions: Vec<Package>) -> Vec<Package> {
    versions
        .into_iter()
        .map(|mut p| {
            if p.name.is_empty() {
                p.name = name.to_string();
            }
            p
        })
        .collect()
}

fn parse_map(url: &str, value: Value) -> Result<BTreeMap<String, Vec<Package>>> {
    let map: PackageMap = serde_json::from_value(value).map_err(|source| RepoError::Parse { url: url.to_string(), source })?;
    Ok(map.packages.into_iter().map(|(name, versions)| {
        let versions = named(&name, versions);
        (name, versions)
    }).collect())
}

pub struct IndexRepository<S: MetadataSource> {
    source: S,
    root: RefCell<Option<RootIndex>>,
    // Inline packages plus everything from `includes`.
    listed: RefCell<Option<BTreeMap<String, Vec<Package>>>>,
    shards: RefCell<BTreeMap<String, Vec<Package>>>,
}

impl<S: MetadataSource> IndexRepository<S> {
    pub fn new(source: S) -> Self {
        IndexRepository {
            source,
            root: RefCell::new(None),
            listed: RefCell::new(None),
            shards: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.borrow().is_some() {
            return Ok(());
        }
        let value = self.source.load_root_server_file()?;
        let root: RootIndex = serde_json::from_value(value)
            .map_err(|source| RepoError::Parse { url: self.source.url().to_string(), source })?;
        *self.root.borrow_mut() = Some(root);
        Ok(())
    }

    fn with_root<T>(&self, f: impl FnOnce(&RootIndex) -> T) -> Result<T> {
        self.ensure_root()?;
        let root = self.root.borrow();
        match root.as_ref() {
            Some(r) => Ok(f(r)),
            None => Err(RepoError::NotFound("repository root index not loaded".into())),
        }
    }

    fn listed(&self) -> Result<BTreeMap<String, Vec<Package>>> {
        if let Some(listed) = self.listed.borrow().as_ref() {
            return Ok(listed.clone());
        }
        let (inline, includes) = self.with_root(|r| {
            let includes: Vec<(String, Option<String>)> =
                r.includes.iter().map(|(path, entry)| (path.clone(), entry.sha256.clone())).collect();
            (r.packages.clone(), includes)
        })?;

        let mut listed: BTreeMap<String, Vec<Package>> = inline
            .into_iter()
            .map(|(name, versions)| {
                let versions = named(&name, versions);
                (name, versions)
            })
            .collect();
        for (path, sha256) in includes {
            let url = resolve_url(self.source.url(), &path)?;
            let mut request = FetchRequest::new(url.clone()).cache_key(path);
            request.sha256 = sha256;
            let value = self.source.fetch_file(request)?;
            for (name, versions) in parse_map(&url, value)? {
                listed.entry(name).or_default().extend(versions);
            }
        }
        *self.listed.borrow_mut() = Some(listed.clone());
        Ok(listed)
    }

    fn shard(&self, name: &str) -> Result<Vec<Package>> {
        if let Some(cached) = self.shards.borrow().get(name) {
            return Ok(cached.clone());
        }
        let template = self.with_root(|r| {
            let available = r.available_packages.is_empty() || r.available_packages.iter().any(|n| n == name);
            r.metadata_url.clone().filter(|_| available)
        })?;
        let Some(template) = template else { return Ok(Vec::new()) };

        let url = resolve_url(self.source.url(), &template.replace("%package%", name))?;
        let request = FetchRequest::new(url.clone())
            .cache_key(format!("provider-{}.json", name))
            .track_last_modified();
        let versions = match self.source.fetch_file(request) {
            Ok(value) => parse_map(&url, value)?.remove(name).unwrap_or_default(),
            Err(RepoError::Http { status: 404, .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.shards.borrow_mut().insert(name.to_string(), versions.clone());
        Ok(versions)
    }

    fn versions_of(&self, name: &str) -> Result<Vec<Package>> {
        if let Some(versions) = self.listed()?.remove(name) {
            return Ok(versions);
        }
        self.shard(name)
    }
}

impl<S: MetadataSource> Repository for IndexRepository<S> {
    fn url(&self) -> &str {
        self.source.url()
    }

    fn find_package(&self, name: &str, constraint: &VersionConstraint) -> Result<Option<Package>> {
        Ok(self.versions_of(name)?.into_iter().find(|p| constraint.matches(&p.version)))
    }

    fn find_packages(&self, name: &str, constraint: Option<&VersionConstraint>) -> Result<Vec<Package>> {
        Ok(self
            .versions_of(name)?
            .into_iter()
            .filter(|p| constraint.map_or(true, |c| c.matches(&p.version)))
            .collect())
    }

    fn get_packages(&self) -> Result<Vec<Package>> {
        let listed = self.listed()?;
        let available = self.with_root(|r| r.available_packages.clone())?;
        let mut out: Vec<Package> = listed.values().flatten().cloned().collect();
        for name in available.iter().filter(|n| !listed.contains_key(n.as_str())) {
            out.extend(self.shard(name)?);
        }
        Ok(out)
    }

    fn load_packages(
        &self,
        name_map: &BTreeMap<String, Option<VersionConstraint>>,
        acceptable_stabilities: &BTreeSet<Stability>,
        stability_flags: &BTreeMap<String, Stability>,
        already_loaded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<LoadResult> {
        let mut result = LoadResult::default();
        for (name, constraint) in name_map {
            let versions = self.versions_of(name)?;
            if versions.is_empty() {
                continue;
            }
            result.names_found.push(name.clone());
            let skip = already_loaded.get(name);
            for pkg in versions {
                if skip.is_some_and(|loaded| loaded.contains(&pkg.version)) {
                    continue;
                }
                if !constraint.as_ref().map_or(true, |c| c.matches(&pkg.version)) {
                    continue;
                }
                let stability = pkg.stability();
                let acceptable = acceptable_stabilities.contains(&stability)
                    || stability_flags.get(name).is_some_and(|flag| stability <= *flag);
                if acceptable {
                    result.packages.push(pkg);
                }
            }
        }
        Ok(result)
    }
}
