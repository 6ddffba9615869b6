use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{DEFAULT_VOLUME_ROOT, Paths};
use crate::error::ProvisionError;
use crate::hub::HubClient;

pub const EXTRA_MODEL_PATHS_FILE: &str = "extra_model_paths.yaml";

/// Read by ComfyUI at startup; must stay byte-for-byte in this shape.
pub const EXTRA_MODEL_PATHS_YAML: &str = "luma:
    base_path: /workspace/models/
    is_default: true
    checkpoints: checkpoints/
    clip: clip/
    clip_vision: clip_vision/
    controlnet: controlnet/
    ipadapter: ipadapter/
    vae: vae/
    diffusion_models: unet/
    upscale_models: upscale_models/
    loras: loras/

luma_extra:
    base_path: /workspace/
    sams: models/sam2/
    depthanything: models/depth/
    LLM: LLM/
";

pub const WORKFLOW_FILE: &str = "archviz_v037_cuda.json";
pub const WORKFLOW_URL: &str =
    "https://raw.githubusercontent.com/wiremarrow/luma/main/runpod/workflows/archviz_v037_cuda.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// An older symlink at the target was swapped out.
    Replaced,
    /// A regular file or directory occupies the target; it was left alone.
    BlockedByExisting,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub source: Utf8PathBuf,
    pub target: Utf8PathBuf,
    pub outcome: LinkOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComfyReport {
    pub config_path: Utf8PathBuf,
    /// False when the volume root differs from the base paths in the YAML.
    pub yaml_matches_volume: bool,
    pub links: Vec<LinkReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInstall {
    pub workspace_path: Utf8PathBuf,
    pub downloaded: bool,
    pub comfyui_copy: Option<Utf8PathBuf>,
}

/// Links for custom nodes that ignore `extra_model_paths.yaml`.
pub fn symlink_plan(paths: &Paths) -> Vec<(Utf8PathBuf, Utf8PathBuf)> {
    let models_dir = paths.comfyui_root().join("models");
    vec![
        (paths.models_root().join("sam2"), models_dir.join("sam2")),
        (paths.llm_root(), models_dir.join("LLM")),
        (paths.models_root().join("depth"), models_dir.join("depthanything")),
    ]
}

/// Returns `Ok(None)` when ComfyUI is not installed yet.
pub fn configure_comfyui(paths: &Paths) -> Result<Option<ComfyReport>, ProvisionError> {
    let comfyui_root = paths.comfyui_root();
    if !comfyui_root.as_std_path().exists() {
        tracing::warn!("ComfyUI not found at {comfyui_root}");
        tracing::warn!("Skipping configuration - run this again after ComfyUI is installed");
        return Ok(None);
    }

    let config_path = comfyui_root.join(EXTRA_MODEL_PATHS_FILE);
    tracing::info!("Creating {config_path}");
    fs::write(config_path.as_std_path(), EXTRA_MODEL_PATHS_YAML)
        .map_err(|err| ProvisionError::Filesystem(format!("write {config_path}: {err}")))?;
    tracing::info!("Created {EXTRA_MODEL_PATHS_FILE}");
    let yaml_matches_volume = paths.volume_root() == DEFAULT_VOLUME_ROOT;
    if !yaml_matches_volume {
        tracing::warn!(
            "{EXTRA_MODEL_PATHS_FILE} points at {DEFAULT_VOLUME_ROOT}, but models were placed under {}",
            paths.volume_root()
        );
    }

    let models_dir = comfyui_root.join("models");
    fs::create_dir_all(models_dir.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(format!("create {models_dir}: {err}")))?;

    let links = symlink_plan(paths)
        .into_iter()
        .map(|(source, target)| {
            let outcome = replace_symlink(&source, &target);
            match &outcome {
                LinkOutcome::Created | LinkOutcome::Replaced => {
                    tracing::info!(
                        "Symlink: {} -> {source}",
                        target.file_name().unwrap_or(target.as_str())
                    );
                }
                LinkOutcome::BlockedByExisting => {
                    tracing::warn!("Not linking {target}: a regular file or directory is in the way");
                }
                LinkOutcome::Failed(message) => {
                    tracing::error!("Failed to create symlink {target}: {message}");
                }
            }
            LinkReport {
                source,
                target,
                outcome,
            }
        })
        .collect();

    tracing::info!("ComfyUI configuration complete");
    Ok(Some(ComfyReport {
        config_path,
        yaml_matches_volume,
        links,
    }))
}

pub fn replace_symlink(source: &Utf8Path, target: &Utf8Path) -> LinkOutcome {
    let replaced = match fs::symlink_metadata(target.as_std_path()) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if let Err(err) = fs::remove_file(target.as_std_path()) {
                return LinkOutcome::Failed(err.to_string());
            }
            true
        }
        Ok(_) => return LinkOutcome::BlockedByExisting,
        Err(_) => false,
    };

    match create_symlink(source, target) {
        Ok(()) if replaced => LinkOutcome::Replaced,
        Ok(()) => LinkOutcome::Created,
        Err(err) => LinkOutcome::Failed(err.to_string()),
    }
}

#[cfg(unix)]
fn create_symlink(source: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source.as_std_path(), target.as_std_path())
}

#[cfg(windows)]
fn create_symlink(source: &Utf8Path, target: &Utf8Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(source.as_std_path(), target.as_std_path())
}

/// Fetches the CUDA workflow to the volume root and mirrors it into
/// ComfyUI's workflow browser when that directory exists.
pub fn install_workflow<C: HubClient>(
    client: &C,
    paths: &Paths,
) -> Result<WorkflowInstall, ProvisionError> {
    let workspace_path = paths.volume_root().join(WORKFLOW_FILE);
    let downloaded = if workspace_path.as_std_path().exists() {
        tracing::info!("Workflow already exists in {}", paths.volume_root());
        false
    } else {
        tracing::info!("Downloading workflow to {workspace_path}");
        client.download_url(WORKFLOW_URL, &workspace_path)?;
        tracing::info!("Workflow downloaded to {}", paths.volume_root());
        true
    };

    let workflows_dir = paths
        .comfyui_root()
        .join("user")
        .join("default")
        .join("workflows");
    let mut comfyui_copy = None;
    if workflows_dir.as_std_path().is_dir() {
        let dest = workflows_dir.join(WORKFLOW_FILE);
        if !dest.as_std_path().exists() {
            fs::copy(workspace_path.as_std_path(), dest.as_std_path())
                .map_err(|err| ProvisionError::Filesystem(format!("copy to {dest}: {err}")))?;
            tracing::info!("Workflow copied to ComfyUI workflows directory");
        }
        comfyui_copy = Some(dest);
    }

    Ok(WorkflowInstall {
        workspace_path,
        downloaded,
        comfyui_copy,
    })
}
