use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::DestRoot;

pub const DEFAULT_VOLUME_ROOT: &str = "/workspace";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

pub const ENV_VOLUME: &str = "COMFY_PROVISION_VOLUME";
pub const ENV_MANIFEST: &str = "COMFY_PROVISION_MANIFEST";
pub const ENV_QUARANTINE: &str = "COMFY_PROVISION_QUARANTINE";
pub const ENV_HUB_ENDPOINT: &str = "HF_ENDPOINT";

/// Filesystem layout of a provisioned host, derived from one volume root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    volume_root: Utf8PathBuf,
}

impl Paths {
    pub fn new(volume_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            volume_root: volume_root.into(),
        }
    }

    pub fn volume_root(&self) -> &Utf8Path {
        &self.volume_root
    }

    pub fn models_root(&self) -> Utf8PathBuf {
        self.volume_root.join("models")
    }

    pub fn llm_root(&self) -> Utf8PathBuf {
        self.volume_root.join("LLM")
    }

    pub fn input_root(&self) -> Utf8PathBuf {
        self.volume_root.join("input")
    }

    pub fn log_file(&self) -> Utf8PathBuf {
        self.volume_root.join("download_log.txt")
    }

    pub fn marker_file(&self) -> Utf8PathBuf {
        self.volume_root.join(".models_downloaded")
    }

    pub fn comfyui_root(&self) -> Utf8PathBuf {
        self.volume_root.join("runpod-slim").join("ComfyUI")
    }

    pub fn resolve_dest(&self, root: DestRoot, dest: &str) -> Utf8PathBuf {
        match root {
            DestRoot::Models => self.models_root().join(dest),
            DestRoot::Volume => self.volume_root.join(dest),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: Paths,
    pub hub_endpoint: String,
    pub manifest_path: Option<Utf8PathBuf>,
    /// Rename files that fail verification to `<name>.corrupt`.
    pub quarantine_mismatches: bool,
}

impl Settings {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            manifest_path: None,
            quarantine_mismatches: false,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let volume_root = non_empty(ENV_VOLUME).unwrap_or_else(|| DEFAULT_VOLUME_ROOT.to_string());
        let hub_endpoint = non_empty(ENV_HUB_ENDPOINT)
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_HUB_ENDPOINT.to_string());
        let manifest_path = non_empty(ENV_MANIFEST).map(Utf8PathBuf::from);
        let quarantine_mismatches = non_empty(ENV_QUARANTINE)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            paths: Paths::new(volume_root),
            hub_endpoint,
            manifest_path,
            quarantine_mismatches,
        }
    }
}
