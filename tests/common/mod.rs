#![allow(dead_code)]

use nxpkg_tuf::error::{RepoError, TufError};
use nxpkg_tuf::repository::{LoadResult, Repository};
use nxpkg_tuf::source::{FetchRequest, MetadataSource};
use nxpkg_tuf::{Package, SecureUpdater, Stability, TargetInfo, VersionConstraint};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const TRUSTED: &str = "abc1230000000000000000000000000000000000000000000000000000000000";

/// Engine with a fixed target table and a switchable refresh outcome.
#[derive(Default)]
pub struct MockUpdater {
    pub targets: HashMap<String, TargetInfo>,
    pub fail_refresh: bool,
    pub refreshes: RefCell<usize>,
    pub lookups: RefCell<Vec<String>>,
}

impl MockUpdater {
    pub fn with_target(mut self, path: &str, sha256: &str, length: u64) -> Self {
        let mut info = TargetInfo { length, ..Default::default() };
        info.hashes.insert("sha256".to_string(), sha256.to_string());
        self.targets.insert(path.to_string(), info);
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }
}

impl SecureUpdater for MockUpdater {
    fn refresh(&self) -> Result<(), TufError> {
        *self.refreshes.borrow_mut() += 1;
        if self.fail_refresh {
            return Err(TufError::Load("rollback detected: snapshot version 3 < 4".into()));
        }
        Ok(())
    }

    fn get_one_valid_target_info(&self, target: &str) -> Result<TargetInfo, TufError> {
        self.lookups.borrow_mut().push(target.to_string());
        self.targets
            .get(target)
            .cloned()
            .ok_or_else(|| TufError::TargetNotFound(target.to_string()))
    }
}

/// Source that records every request and answers with a fixed body.
pub struct RecordingSource {
    pub url: String,
    pub fetches: RefCell<Vec<FetchRequest>>,
    pub root_loads: RefCell<usize>,
    pub body: Value,
}

impl RecordingSource {
    pub fn new(url: &str) -> Self {
        RecordingSource {
            url: url.to_string(),
            fetches: RefCell::new(Vec::new()),
            root_loads: RefCell::new(0),
            body: json!({"packages": {}}),
        }
    }
}

impl MetadataSource for RecordingSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn load_root_server_file(&self) -> nxpkg_tuf::error::Result<Value> {
        *self.root_loads.borrow_mut() += 1;
        self.fetch_file(self.root_request()?)
    }

    fn fetch_file(&self, request: FetchRequest) -> nxpkg_tuf::error::Result<Value> {
        self.fetches.borrow_mut().push(request);
        Ok(self.body.clone())
    }
}

/// Repository returning canned packages, in the given order.
pub struct StaticRepository {
    pub packages: Vec<Package>,
}

impl StaticRepository {
    pub fn new(packages: Vec<Package>) -> Self {
        StaticRepository { packages }
    }
}

impl Repository for StaticRepository {
    fn url(&self) -> &str {
        "https://repo.example"
    }

    fn find_package(&self, name: &str, constraint: &VersionConstraint) -> Result<Option<Package>, RepoError> {
        Ok(self.packages.iter().find(|p| p.name == name && constraint.matches(&p.version)).cloned())
    }

    fn find_packages(&self, name: &str, constraint: Option<&VersionConstraint>) -> Result<Vec<Package>, RepoError> {
        Ok(self
            .packages
            .iter()
            .filter(|p| p.name == name && constraint.map_or(true, |c| c.matches(&p.version)))
            .cloned()
            .collect())
    }

    fn get_packages(&self) -> Result<Vec<Package>, RepoError> {
        Ok(self.packages.clone())
    }

    fn load_packages(
        &self,
        name_map: &BTreeMap<String, Option<VersionConstraint>>,
        _acceptable_stabilities: &BTreeSet<Stability>,
        _stability_flags: &BTreeMap<String, Stability>,
        _already_loaded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<LoadResult, RepoError> {
        let packages: Vec<Package> =
            self.packages.iter().filter(|p| name_map.contains_key(&p.name)).cloned().collect();
        let mut names_found: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
        names_found.dedup();
        Ok(LoadResult { names_found, packages })
    }
}

pub fn packages() -> Vec<Package> {
    vec![
        Package::new("acme/zeta", "2.0.0"),
        Package::new("acme/alpha", "1.0.0"),
        Package::new("acme/alpha", "1.1.0"),
        Package::new("acme/mid", "0.1.0"),
    ]
}
