use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::domain::{DestRoot, RepoId, Sha256Hex};
use crate::error::ProvisionError;

const EMBEDDED_MANIFEST: &str = include_str!("manifest.json");

/// Probe file for whole-repository entries that declare no `hash_file`.
pub const DEFAULT_REPO_PROBE: &str = "model.safetensors";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub key: String,
    pub description: String,
    pub models: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub source: Source,
    pub dest: String,
    #[serde(default)]
    pub dest_root: DestRoot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flatten_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Sha256Hex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// One file from a repository; `file` may be a nested path.
    HubFile { repo: RepoId, file: String },
    /// Every file of a repository.
    HubRepo {
        repo: RepoId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash_file: Option<String>,
    },
    Url { url: String, file: String },
}

impl ManifestEntry {
    pub fn dest_dir(&self, paths: &Paths) -> Utf8PathBuf {
        paths.resolve_dest(self.dest_root, &self.dest)
    }

    /// File name the entry ends up with inside its destination directory.
    /// For whole-repository entries this is the probe file.
    pub fn final_name(&self) -> &str {
        match &self.source {
            Source::HubFile { file, .. } => self
                .rename_to
                .as_deref()
                .unwrap_or_else(|| basename(file)),
            Source::HubRepo { hash_file, .. } => {
                hash_file.as_deref().unwrap_or(DEFAULT_REPO_PROBE)
            }
            Source::Url { file, .. } => self.rename_to.as_deref().unwrap_or(file.as_str()),
        }
    }

    pub fn final_path(&self, paths: &Paths) -> Utf8PathBuf {
        self.dest_dir(paths).join(self.final_name())
    }

    /// Nested directory this entry must not leave behind once flattened.
    pub fn nested_dir(&self, paths: &Paths) -> Option<Utf8PathBuf> {
        self.flatten_from
            .as_deref()
            .map(|nested| self.dest_dir(paths).join(nested))
    }

    fn validate(&self) -> Result<(), ProvisionError> {
        let invalid = |reason: &str| ProvisionError::InvalidEntry {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if !is_relative_clean(&self.dest) {
            return Err(invalid("destination must be a relative path without `..`"));
        }
        if let Some(rename) = &self.rename_to {
            if !is_plain_name(rename) {
                return Err(invalid("rename_to must be a plain file name"));
            }
        }

        match &self.source {
            Source::HubFile { file, .. } => {
                if !is_relative_clean(file) {
                    return Err(invalid("file must be a relative path without `..`"));
                }
                if let Some(nested) = &self.flatten_from {
                    let parent = Utf8Path::new(file).parent().map(Utf8Path::as_str);
                    if !is_plain_name(nested) || parent != Some(nested.as_str()) {
                        return Err(invalid("flatten_from must be the file's parent directory"));
                    }
                }
            }
            Source::HubRepo { hash_file, .. } => {
                if self.flatten_from.is_some() || self.rename_to.is_some() {
                    return Err(invalid("repository entries cannot be flattened or renamed"));
                }
                if let Some(hash_file) = hash_file {
                    if !is_relative_clean(hash_file) {
                        return Err(invalid("hash_file must be a relative path"));
                    }
                }
            }
            Source::Url { url, file } => {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(invalid("url must be http(s)"));
                }
                if !is_plain_name(file) {
                    return Err(invalid("file must be a plain file name"));
                }
                if self.flatten_from.is_some() {
                    return Err(invalid("url entries cannot be flattened"));
                }
            }
        }
        Ok(())
    }
}

impl Manifest {
    pub fn embedded() -> Result<Self, ProvisionError> {
        Self::parse(EMBEDDED_MANIFEST)
    }

    pub fn parse(content: &str) -> Result<Self, ProvisionError> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|err| ProvisionError::ManifestParse(err.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ProvisionError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| ProvisionError::ManifestRead(path.as_std_path().to_path_buf()))?;
        Self::parse(&content)
    }

    /// Loads `path` when given, otherwise the manifest compiled into the binary.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<Self, ProvisionError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::embedded(),
        }
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        for entry in self.entries().map(|(_, entry)| entry) {
            entry.validate()?;
        }
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Tier, &ManifestEntry)> {
        self.tiers
            .iter()
            .flat_map(|tier| tier.models.iter().map(move |entry| (tier, entry)))
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|tier| tier.models.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_plain_name(value: &str) -> bool {
    !value.is_empty() && !value.contains('/') && !value.contains('\\') && value != "." && value != ".."
}

fn is_relative_clean(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('/')
        && value.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}
