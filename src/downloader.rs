//! src/downloader.rs
//! Raw HTTP access. Repositories and the artifact downloader go through the
//! `Downloader` trait so the network can be swapped out.

use crate::error::{RepoError, Result};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use std::io::Read;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("nxpkg-tuf/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub last_modified: Option<String>,
}

impl Response {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }
}

/// An open streaming download.
pub struct Download {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read>,
}

pub trait Downloader {
    /// GET `url`; a 304 is returned as a response, other non-2xx statuses as errors.
    fn get(&self, url: &str, if_modified_since: Option<&str>) -> Result<Response>;

    /// GET `url` for streaming to disk.
    fn open(&self, url: &str) -> Result<Download>;
}

pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| RepoError::Transport { url: String::new(), source })?;
        Ok(HttpDownloader { client })
    }
}

impl Downloader for HttpDownloader {
    fn get(&self, url: &str, if_modified_since: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(since) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, since);
        }
        let response = request
            .send()
            .map_err(|source| RepoError::Transport { url: url.to_string(), source })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Response { status: status.as_u16(), body: Vec::new(), last_modified: None });
        }
        if !status.is_success() {
            return Err(RepoError::Http { url: url.to_string(), status: status.as_u16() });
        }
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|source| RepoError::Transport { url: url.to_string(), source })?;
        Ok(Response { status: status.as_u16(), body: body.to_vec(), last_modified })
    }

    fn open(&self, url: &str) -> Result<Download> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| RepoError::Transport { url: url.to_string(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::Http { url: url.to_string(), status: status.as_u16() });
        }
        Ok(Download { content_length: response.content_length(), reader: Box::new(response) })
    }
}
