use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;

use crate::config::Paths;
use crate::domain::ModelFormat;
use crate::error::ProvisionError;
use crate::hub::CACHE_DIR;
use crate::manifest::Manifest;

/// Category directories ComfyUI reads under the models root.
pub const MODEL_DIRS: [&str; 10] = [
    "checkpoints",
    "clip",
    "clip_vision",
    "controlnet",
    "ipadapter",
    "unet",
    "vae",
    "upscale_models",
    "depth",
    "sam2",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutViolation {
    pub name: String,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutCheck {
    pub violations: Vec<LayoutViolation>,
}

impl LayoutCheck {
    pub fn error_count(&self) -> usize {
        self.violations.len()
    }

    pub fn is_flat(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatCounts {
    pub safetensors: usize,
    pub gguf: usize,
    pub pth: usize,
}

pub fn create_directories(paths: &Paths) -> Result<(), ProvisionError> {
    let models_root = paths.models_root();
    let dirs = MODEL_DIRS
        .iter()
        .map(|name| models_root.join(name))
        .chain([paths.llm_root(), paths.input_root()]);

    for dir in dirs {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ProvisionError::Filesystem(format!("create {dir}: {err}")))?;
    }

    tracing::info!("Models directory: {models_root}");
    tracing::info!("LLM directory: {}", paths.llm_root());
    tracing::info!("Input directory: {}", paths.input_root());
    Ok(())
}

/// Removes every leftover download cache below the models root.
pub fn purge_cache_dirs(paths: &Paths) -> Result<usize, ProvisionError> {
    let root = paths.models_root();
    if !root.as_std_path().exists() {
        return Ok(0);
    }
    let caches = walk_dirs(root.as_std_path())?
        .into_iter()
        .filter(|path| path.file_name().map(|name| name == CACHE_DIR).unwrap_or(false))
        .collect::<Vec<_>>();

    let mut removed = 0;
    for cache in caches {
        // Nested caches disappear with their parent.
        if cache.exists() && fs::remove_dir_all(&cache).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Post-condition check: no flattened entry may have left its nested
/// directory behind. Nothing is repaired here.
pub fn verify_flat_structure(manifest: &Manifest, paths: &Paths) -> LayoutCheck {
    let mut check = LayoutCheck::default();
    for (_, entry) in manifest.entries() {
        let Some(nested) = entry.nested_dir(paths) else {
            continue;
        };
        if nested.as_std_path().exists() {
            tracing::error!("{} nested directory not flattened!", entry.name);
            check.violations.push(LayoutViolation {
                name: entry.name.clone(),
                path: nested,
            });
        }
    }

    if check.is_flat() {
        tracing::info!("All directories properly flattened");
    }
    check
}

pub fn count_files(paths: &Paths) -> Result<FormatCounts, ProvisionError> {
    let models_root = paths.models_root();
    let llm_root = paths.llm_root();

    let counts = FormatCounts {
        safetensors: count_with_extension(models_root.as_std_path(), ModelFormat::Safetensors)?
            + count_with_extension(llm_root.as_std_path(), ModelFormat::Safetensors)?,
        gguf: count_with_extension(models_root.as_std_path(), ModelFormat::Gguf)?,
        pth: count_with_extension(models_root.as_std_path(), ModelFormat::Pth)?,
    };

    tracing::info!("Downloaded files by format:");
    tracing::info!("  .safetensors (SAFE):    {} files", counts.safetensors);
    tracing::warn!("  .gguf (from city96):    {} files", counts.gguf);
    tracing::warn!("  .pth (from authors):    {} files", counts.pth);
    Ok(counts)
}

fn count_with_extension(root: &Path, format: ModelFormat) -> Result<usize, ProvisionError> {
    if !root.exists() {
        return Ok(0);
    }
    Ok(walk_files(root)?
        .iter()
        .filter(|path| {
            path.extension()
                .map(|ext| ext == format.extension())
                .unwrap_or(false)
        })
        .count())
}

fn walk_dirs(root: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    Ok(walk(root)?
        .into_iter()
        .filter_map(|(path, is_dir)| is_dir.then_some(path))
        .collect())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    Ok(walk(root)?
        .into_iter()
        .filter_map(|(path, is_dir)| (!is_dir).then_some(path))
        .collect())
}

/// Depth-first listing that does not follow symlinks.
fn walk(root: &Path) -> Result<Vec<(PathBuf, bool)>, ProvisionError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
            let file_type = entry
                .file_type()
                .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path.clone());
            }
            items.push((path, file_type.is_dir()));
        }
    }
    Ok(items)
}
