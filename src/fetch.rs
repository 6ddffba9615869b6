use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Paths;
use crate::domain::RepoId;
use crate::error::ProvisionError;
use crate::hub::{CACHE_DIR, HubClient};
use crate::manifest::{ManifestEntry, Source};

/// Florence-style repositories ship both weight formats; the pickle copy goes.
pub const REDUNDANT_WEIGHTS: &str = "pytorch_model.bin";
pub const PREFERRED_WEIGHTS: &str = "model.safetensors";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The final file was already on disk; nothing was requested.
    Exists { path: Utf8PathBuf },
    Downloaded {
        path: Utf8PathBuf,
        /// File whose digest should be checked, when one is available.
        verify_target: Option<Utf8PathBuf>,
    },
}

impl FetchOutcome {
    pub fn path(&self) -> &Utf8Path {
        match self {
            FetchOutcome::Exists { path } | FetchOutcome::Downloaded { path, .. } => path,
        }
    }
}

pub struct Fetcher<'a, C: HubClient> {
    client: &'a C,
    paths: &'a Paths,
}

impl<'a, C: HubClient> Fetcher<'a, C> {
    pub fn new(client: &'a C, paths: &'a Paths) -> Self {
        Self { client, paths }
    }

    pub fn fetch(&self, entry: &ManifestEntry) -> Result<FetchOutcome, ProvisionError> {
        let dest_dir = entry.dest_dir(self.paths);
        let result = match &entry.source {
            Source::HubFile { repo, file } => self.fetch_file(entry, repo, file, &dest_dir),
            Source::HubRepo { repo, .. } => self.fetch_repo(entry, repo, &dest_dir),
            Source::Url { url, .. } => self.fetch_url(entry, url, &dest_dir),
        };
        remove_cache_dir(&dest_dir);
        result
    }

    fn fetch_file(
        &self,
        entry: &ManifestEntry,
        repo: &RepoId,
        file: &str,
        dest_dir: &Utf8Path,
    ) -> Result<FetchOutcome, ProvisionError> {
        let final_name = entry.final_name();
        let final_path = dest_dir.join(final_name);
        if final_path.as_std_path().exists() {
            tracing::info!("Exists: {final_name}");
            return Ok(FetchOutcome::Exists { path: final_path });
        }

        tracing::info!("Downloading: {file} from {repo}");
        ensure_dir(dest_dir)?;
        let arrived = self.client.download_file(repo, file, dest_dir)?;

        if let Some(nested) = entry.flatten_from.as_deref() {
            let nested_dir = dest_dir.join(nested);
            let nested_path = arrived
                .file_name()
                .map(|name| nested_dir.join(name))
                .unwrap_or_else(|| arrived.clone());
            if nested_path.as_std_path().exists() {
                fs::rename(nested_path.as_std_path(), final_path.as_std_path()).map_err(|err| {
                    ProvisionError::Filesystem(format!("move {nested_path}: {err}"))
                })?;
                let _ = fs::remove_dir_all(nested_dir.as_std_path());
                tracing::info!("Flattened {nested}/ subdirectory");
            }
        } else if arrived != final_path {
            fs::rename(arrived.as_std_path(), final_path.as_std_path())
                .map_err(|err| ProvisionError::Filesystem(format!("rename {arrived}: {err}")))?;
            tracing::info!("Renamed to: {final_name}");
        }

        Ok(FetchOutcome::Downloaded {
            verify_target: Some(final_path.clone()),
            path: final_path,
        })
    }

    fn fetch_repo(
        &self,
        entry: &ManifestEntry,
        repo: &RepoId,
        dest_dir: &Utf8Path,
    ) -> Result<FetchOutcome, ProvisionError> {
        let probe = dest_dir.join(entry.final_name());
        if probe.as_std_path().exists() {
            tracing::info!("Exists: {}/", dest_dir.file_name().unwrap_or(dest_dir.as_str()));
            return Ok(FetchOutcome::Exists {
                path: dest_dir.to_path_buf(),
            });
        }

        tracing::info!("Downloading: {repo} (full repository)");
        ensure_dir(dest_dir)?;
        let count = self.client.download_repo(repo, dest_dir)?;
        tracing::debug!("Fetched {count} files from {repo}");

        let redundant = dest_dir.join(REDUNDANT_WEIGHTS);
        let preferred = dest_dir.join(PREFERRED_WEIGHTS);
        if redundant.as_std_path().exists() && preferred.as_std_path().exists() {
            fs::remove_file(redundant.as_std_path())
                .map_err(|err| ProvisionError::Filesystem(format!("remove {redundant}: {err}")))?;
            tracing::info!("Removed redundant {REDUNDANT_WEIGHTS}");
        }

        // A declared hash needs its file; without it the entry is not done.
        let verify_target = if probe.as_std_path().exists() {
            Some(probe)
        } else if entry.hash.is_some() {
            return Err(ProvisionError::MissingHashFile {
                path: probe.into_std_path_buf(),
            });
        } else {
            None
        };
        Ok(FetchOutcome::Downloaded {
            path: dest_dir.to_path_buf(),
            verify_target,
        })
    }

    fn fetch_url(
        &self,
        entry: &ManifestEntry,
        url: &str,
        dest_dir: &Utf8Path,
    ) -> Result<FetchOutcome, ProvisionError> {
        let final_name = entry.final_name();
        let dest_path = dest_dir.join(final_name);
        if dest_path.as_std_path().exists() {
            tracing::info!("Exists: {final_name}");
            return Ok(FetchOutcome::Exists { path: dest_path });
        }

        tracing::info!("Downloading: {final_name}");
        ensure_dir(dest_dir)?;
        self.client.download_url(url, &dest_path)?;
        Ok(FetchOutcome::Downloaded {
            verify_target: Some(dest_path.clone()),
            path: dest_path,
        })
    }
}

fn ensure_dir(dir: &Utf8Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(format!("create {dir}: {err}")))
}

fn remove_cache_dir(dest_dir: &Utf8Path) {
    let cache = dest_dir.join(CACHE_DIR);
    if cache.as_std_path().exists() {
        let _ = fs::remove_dir_all(cache.as_std_path());
    }
}
