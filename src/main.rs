use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use nxpkg_tuf::config::{self, AppConfig, RepoConfig};
use nxpkg_tuf::{
    compress, ArtifactDownloader, ConsoleIo, Downloader, HttpDownloader, MetadataSource, Package, RepoError,
    Repository, SecureRepository, VersionConstraint, VERSION,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nxpkg-tuf")]
#[command(about = "TUF-verified package repository client for nxpkg")]
struct Cli {
    /// Only use the configured repository with this url
    #[arg(long = "repo", global = true)]
    repo: Option<String>,

    /// Log filter (e.g. "debug", "nxpkg_tuf=trace")
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refreshes TUF metadata and loads each repository's root index
    Refresh,
    /// Searches packages by name or description
    Search {
        /// The search term
        term: String,
    },
    /// Lists the versions of a package
    Show {
        /// Package name
        name: String,
        /// Version constraint, e.g. "^1.2"
        constraint: Option<String>,
    },
    /// Downloads (and verifies) a package archive
    Fetch {
        /// Package name
        name: String,
        /// Version constraint, e.g. "^1.2"
        constraint: Option<String>,
        /// Output directory (defaults to <cache_dir>/dist)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Unpack the archive after verification
        #[arg(long = "extract")]
        extract: bool,
    },
    /// Manages configured repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    // Show about of the nxpkg-tuf
    About,
    // Show version of the nxpkg-tuf
    Version,
}

#[derive(Subcommand)]
enum RepoAction {
    /// Lists configured repositories
    List,
    /// Adds (or replaces) a repository
    Add {
        url: String,
        /// TUF metadata url; omit for an unauthenticated repository
        #[arg(long = "tuf")]
        tuf: Option<String>,
    },
    /// Removes a repository
    Remove { url: String },
}

fn initialize_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {elapsed_precise} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.into());
    pb
}

fn selected_repos(cfg: &AppConfig, only: Option<&str>) -> Result<Vec<RepoConfig>, RepoError> {
    let repos = cfg.repositories()?;
    let Some(url) = only else {
        if repos.is_empty() {
            return Err(RepoError::Config(format!(
                "no repositories configured in {} (use `nxpkg-tuf repo add`)",
                cfg.repos_file.display()
            )));
        }
        return Ok(repos);
    };
    // An unknown --repo is used as-is, unauthenticated.
    Ok(vec![repos.into_iter().find(|r| r.url == url).unwrap_or_else(|| RepoConfig::new(url))])
}

fn open_repos(cfg: &AppConfig, only: Option<&str>) -> Result<Vec<SecureRepository>, RepoError> {
    let downloader: Arc<dyn Downloader> = Arc::new(HttpDownloader::new()?);
    selected_repos(cfg, only)?
        .iter()
        .map(|r| SecureRepository::from_config(r, &ConsoleIo, cfg, downloader.clone()))
        .collect()
}

fn pick_latest(mut candidates: Vec<Package>) -> Option<Package> {
    candidates.sort_by(|a, b| {
        let va = semver::Version::parse(a.version.trim_start_matches('v')).ok();
        let vb = semver::Version::parse(b.version.trim_start_matches('v')).ok();
        va.cmp(&vb)
    });
    candidates.pop()
}

fn parse_constraint(raw: Option<&str>) -> Result<Option<VersionConstraint>, RepoError> {
    raw.map(|c| VersionConstraint::parse(c).map_err(|e| RepoError::Config(format!("invalid constraint '{}': {}", c, e))))
        .transpose()
}

fn run(cli: Cli, cfg: &AppConfig) -> Result<(), RepoError> {
    let only = cli.repo.as_deref();
    match cli.command {
        Commands::Refresh => {
            for repo in open_repos(cfg, only)? {
                let pb = spinner(format!("Refreshing {}...", repo.url()));
                let verified = repo.verification().is_verified();
                match repo.inner().source().load_root_server_file() {
                    Ok(_) if verified => pb.finish_with_message(format!("{} verified by TUF.", repo.url()).green().to_string()),
                    Ok(_) => pb.finish_with_message(format!("{} loaded (unauthenticated).", repo.url()).yellow().to_string()),
                    Err(e) => {
                        pb.finish_and_clear();
                        return Err(e);
                    }
                }
            }
        }
        Commands::Search { term } => {
            let mut results = Vec::new();
            for repo in open_repos(cfg, only)? {
                let pb = spinner(format!("Fetching index of {}...", repo.url()));
                let found = repo.search(&term);
                pb.finish_and_clear();
                results.extend(found?);
            }
            if results.is_empty() {
                println!("{}", "No packages found matching your search term.".yellow());
            } else {
                println!("Found {} package(s):", results.len());
                for pkg in results {
                    println!(
                        "  {} {} - {}",
                        pkg.name.bold().cyan(),
                        pkg.version.dimmed(),
                        pkg.description.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Show { name, constraint } => {
            let constraint = parse_constraint(constraint.as_deref())?;
            let mut any = false;
            for repo in open_repos(cfg, only)? {
                for pkg in repo.find_packages(&name, constraint.as_ref())? {
                    any = true;
                    let mark = if pkg.is_trust_bound() { "TUF".green() } else { "unverified".yellow() };
                    println!("  {} {} [{}] ({}) {}", pkg.name.bold().cyan(), pkg.version, pkg.stability(), mark, repo.url().dimmed());
                }
            }
            if !any {
                return Err(RepoError::NotFound(format!("Package '{}' not found in the configured repositories.", name)));
            }
        }
        Commands::Fetch { name, constraint, output, extract } => {
            let constraint = parse_constraint(constraint.as_deref())?;
            let downloader: Arc<dyn Downloader> = Arc::new(HttpDownloader::new()?);
            let mut found = None;
            for repo in open_repos(cfg, only)? {
                let pb = spinner(format!("Resolving {} in {}...", name, repo.url()));
                let candidates = repo.find_packages(&name, constraint.as_ref());
                pb.finish_and_clear();
                if let Some(pkg) = pick_latest(candidates?) {
                    // Keep the repository alive: the package only holds a weak trust handle.
                    found = Some((repo, pkg));
                    break;
                }
            }
            let Some((_repo, pkg)) = found else {
                return Err(RepoError::NotFound(format!("Package '{}' not found in the configured repositories.", name)));
            };

            let out_dir = output.unwrap_or_else(|| cfg.cache_dir.join("dist"));
            let path = ArtifactDownloader::new(downloader).with_progress().download(&pkg, &out_dir)?;
            println!("{}", format!("Downloaded {} {} to {}", pkg.name, pkg.version, path.display()).green());

            if extract {
                let dest = out_dir.join(format!("{}-{}", pkg.name.replace('/', "-"), pkg.version));
                compress::extract_archive(&path, &dest)?;
                println!("{}", format!("Extracted to {}", dest.display()).green());
            }
        }
        Commands::Repo { action } => match action {
            RepoAction::List => {
                let repos = cfg.repositories()?;
                if repos.is_empty() {
                    println!("{}", "No repositories configured.".yellow());
                }
                for r in repos {
                    match r.tuf {
                        Some(tuf) => println!("  {} {} {}", r.url.cyan(), "TUF".green(), tuf.url.dimmed()),
                        None => println!("  {} {}", r.url.cyan(), "unauthenticated".yellow()),
                    }
                }
            }
            RepoAction::Add { url, tuf } => {
                let mut repo = RepoConfig::new(url.clone());
                if let Some(tuf) = tuf {
                    repo = repo.with_tuf(tuf);
                }
                config::add_repository(&cfg.repos_file, repo)?;
                println!("{}", format!("Added {} to {}", url, cfg.repos_file.display()).green());
            }
            RepoAction::Remove { url } => {
                if config::remove_repository(&cfg.repos_file, &url)? {
                    println!("{}", format!("Removed {}", url).green());
                } else {
                    println!("{}", format!("{} is not configured.", url).yellow());
                }
            }
        },
        Commands::About => {
            println!("{}", "nxpkg-tuf: TUF-verified repositories for the NeoniX PacKaGe Manager".blue());
            println!("{}", "Every index file and archive is checked against signed TUF targets metadata.".yellow());
        }
        Commands::Version => {
            println!("nxpkg-tuf {} ({})", VERSION, std::env::consts::ARCH);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);
    let cfg = AppConfig::load();

    match run(cli, &cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_security() => {
            eprintln!("{} {}", "SECURITY:".red().bold(), e.to_string().red());
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{}", format!("Error: {}", e).red());
            ExitCode::FAILURE
        }
    }
}
