use std::fs;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::RepoId;
use crate::error::ProvisionError;

/// Transient directory created inside a destination while files arrive.
pub const CACHE_DIR: &str = ".cache";

pub trait HubClient {
    /// Downloads `file` of `repo` to `dest_dir/file`, keeping any nested path.
    fn download_file(
        &self,
        repo: &RepoId,
        file: &str,
        dest_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, ProvisionError>;

    fn list_repo_files(&self, repo: &RepoId) -> Result<Vec<String>, ProvisionError>;

    fn download_url(&self, url: &str, destination: &Utf8Path) -> Result<(), ProvisionError>;

    fn download_repo(&self, repo: &RepoId, dest_dir: &Utf8Path) -> Result<usize, ProvisionError> {
        let files = self.list_repo_files(repo)?;
        for file in &files {
            self.download_file(repo, file, dest_dir)?;
        }
        Ok(files.len())
    }
}

#[derive(Clone)]
pub struct HubHttpClient {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<RepoSibling>,
}

#[derive(Debug, Deserialize)]
struct RepoSibling {
    rfilename: String,
}

impl HubHttpClient {
    pub fn new(endpoint: &str) -> Result<Self, ProvisionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("comfy-provision/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ProvisionError::HubHttp(err.to_string()))?,
        );
        if let Some(token) = resolve_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| ProvisionError::HubHttp(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        // Model files run to tens of gigabytes; only connecting is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| ProvisionError::HubHttp(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn file_url(&self, repo: &RepoId, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, repo, file)
    }

    pub fn repo_api_url(&self, repo: &RepoId) -> String {
        format!("{}/api/models/{}", self.endpoint, repo)
    }

    fn get(&self, url: &str) -> Result<Response, ProvisionError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ProvisionError::HubHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ProvisionError::HubStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl HubClient for HubHttpClient {
    fn download_file(
        &self,
        repo: &RepoId,
        file: &str,
        dest_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, ProvisionError> {
        let url = self.file_url(repo, file);
        let destination = dest_dir.join(file);
        let response = self.get(&url)?;
        persist_response(response, &destination, &dest_dir.join(CACHE_DIR))?;
        Ok(destination)
    }

    fn list_repo_files(&self, repo: &RepoId) -> Result<Vec<String>, ProvisionError> {
        let url = self.repo_api_url(repo);
        let info: RepoInfo = self
            .get(&url)?
            .json()
            .map_err(|err| ProvisionError::HubHttp(err.to_string()))?;
        Ok(info
            .siblings
            .into_iter()
            .map(|sibling| sibling.rfilename)
            .filter(|name| !name.starts_with(".git"))
            .collect())
    }

    fn download_url(&self, url: &str, destination: &Utf8Path) -> Result<(), ProvisionError> {
        let cache_dir = destination
            .parent()
            .map(|parent| parent.join(CACHE_DIR))
            .ok_or_else(|| ProvisionError::Filesystem("invalid destination path".to_string()))?;
        let response = self.get(url)?;
        persist_response(response, destination, &cache_dir)
    }
}

/// Streams a response into a temp file under `cache_dir`, then moves it to
/// `destination` so a partial body never lands at the final path.
fn persist_response(
    mut response: Response,
    destination: &Utf8Path,
    cache_dir: &Utf8Path,
) -> Result<(), ProvisionError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
    }
    fs::create_dir_all(cache_dir.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;

    let mut temp = tempfile::Builder::new()
        .prefix("download")
        .suffix(".incomplete")
        .tempfile_in(cache_dir.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
    io::copy(&mut response, temp.as_file_mut())
        .map_err(|err| ProvisionError::HubHttp(err.to_string()))?;
    temp.persist(destination.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
    // Only succeeds once the cache is empty.
    let _ = fs::remove_dir(cache_dir.as_std_path());
    Ok(())
}

fn resolve_token() -> Option<String> {
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.trim().is_empty() {
            return Some(token.trim().to_string());
        }
    }
    let path = BaseDirs::new()?
        .home_dir()
        .join(".cache")
        .join("huggingface")
        .join("token");
    fs::read_to_string(path)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
