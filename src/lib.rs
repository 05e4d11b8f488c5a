//! nxpkg-tuf: package repositories whose metadata and artifacts are verified
//! against a TUF (The Update Framework) trust chain.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nxpkg_tuf::{AppConfig, ConsoleIo, HttpDownloader, RepoConfig, Repository, SecureRepository};
//!
//! # fn main() -> Result<(), nxpkg_tuf::RepoError> {
//! let app = AppConfig::load();
//! let config = RepoConfig::new("https://repo.example").with_tuf("https://repo.example/metadata");
//! let repo = SecureRepository::from_config(&config, &ConsoleIo, &app, Arc::new(HttpDownloader::new()?))?;
//! for pkg in repo.get_packages()? {
//!     println!("{} {}", pkg.name, pkg.version);
//! }
//! # Ok(())
//! # }
//! ```

pub mod compress;
pub mod config;
pub mod dist;
pub mod downloader;
pub mod error;
pub mod io;
pub mod package;
pub mod repository;
pub mod source;
pub mod tuf;
pub mod tuf_repository;

pub use config::{AppConfig, RepoConfig, TufRepoConfig};
pub use dist::{verify_artifact, ArtifactDigest, ArtifactDownloader};
pub use downloader::{Downloader, HttpDownloader};
pub use error::{RepoError, RepositorySecurityError, TufError};
pub use io::{BufferIo, ConsoleIo, Io};
pub use package::{Dist, Package, Stability, VersionConstraint};
pub use repository::{IndexRepository, LoadResult, Repository};
pub use source::{FetchRequest, HttpSource, MetadataSource};
pub use tuf::{SecureUpdater, TargetInfo, Verification};
pub use tuf_repository::{SecureRepository, TufValidatedRepository, TufValidatedSource};

// Indicates version of the nxpkg-tuf source code
pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));
