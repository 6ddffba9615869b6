use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use comfy_provision::app::{EntryStatus, ProgressEvent, ProgressSink, Provisioner, RunStatus};
use comfy_provision::comfy::{EXTRA_MODEL_PATHS_YAML, LinkOutcome, WORKFLOW_FILE, WORKFLOW_URL};
use comfy_provision::config::{Paths, Settings};
use comfy_provision::domain::RepoId;
use comfy_provision::error::ProvisionError;
use comfy_provision::hub::HubClient;
use comfy_provision::manifest::Manifest;
use comfy_provision::output::QuietOutput;
use comfy_provision::verify::hash_reader;

const VAE: &[u8] = b"vae weights";
const ESRGAN: &[u8] = b"esrgan weights";
const DEPTH: &[u8] = b"depth weights";
const FLORENCE: &[u8] = b"florence weights";
const DEPTH_URL: &str = "https://example.com/checkpoints/depth_anything_vitl14.pth";

#[derive(Clone, Default)]
struct MockHub {
    files: HashMap<String, Vec<u8>>,
    listings: HashMap<String, Vec<String>>,
    urls: HashMap<String, Vec<u8>>,
    calls: Arc<Mutex<usize>>,
}

impl MockHub {
    fn serving_all() -> Self {
        let mut hub = MockHub::default();
        hub.add_file("org/vae", "ae.safetensors", VAE);
        hub.add_file("uwg/upscaler", "ESRGAN/4x-UltraSharp.pth", ESRGAN);
        hub.add_file("microsoft/Florence-2-large", "config.json", b"{}");
        hub.add_file("microsoft/Florence-2-large", "model.safetensors", FLORENCE);
        hub.add_file("microsoft/Florence-2-large", "pytorch_model.bin", b"pickle");
        hub.urls.insert(DEPTH_URL.to_string(), DEPTH.to_vec());
        hub.urls
            .insert(WORKFLOW_URL.to_string(), br#"{"nodes": []}"#.to_vec());
        hub
    }

    fn add_file(&mut self, repo: &str, file: &str, body: &[u8]) {
        self.files.insert(format!("{repo}/{file}"), body.to_vec());
        self.listings
            .entry(repo.to_string())
            .or_default()
            .push(file.to_string());
    }

    fn bump(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

fn write(path: &Utf8Path, body: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path()).unwrap();
    }
    fs::write(path.as_std_path(), body).unwrap();
}

impl HubClient for MockHub {
    fn download_file(
        &self,
        repo: &RepoId,
        file: &str,
        dest_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, ProvisionError> {
        self.bump();
        let key = format!("{repo}/{file}");
        let body = self.files.get(&key).ok_or(ProvisionError::HubStatus {
            status: 404,
            url: key,
        })?;
        let path = dest_dir.join(file);
        write(&path, body);
        Ok(path)
    }

    fn list_repo_files(&self, repo: &RepoId) -> Result<Vec<String>, ProvisionError> {
        self.bump();
        Ok(self.listings.get(repo.as_str()).cloned().unwrap_or_default())
    }

    fn download_url(&self, url: &str, destination: &Utf8Path) -> Result<(), ProvisionError> {
        self.bump();
        let body = self
            .urls
            .get(url)
            .ok_or_else(|| ProvisionError::HubHttp(format!("connection reset: {url}")))?;
        write(destination, body);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn digest(body: &[u8]) -> String {
    hash_reader(&mut &body[..]).unwrap().0
}

fn test_manifest() -> Manifest {
    let content = format!(
        r#"{{"tiers": [
            {{"key": "tier1", "description": "Tier 1: Official", "models": [
                {{"name": "FLUX VAE", "source": {{"kind": "hub_file", "repo": "org/vae", "file": "ae.safetensors"}},
                  "dest": "vae", "hash": "{vae}"}},
                {{"name": "4x-UltraSharp", "source": {{"kind": "hub_file", "repo": "uwg/upscaler", "file": "ESRGAN/4x-UltraSharp.pth"}},
                  "dest": "upscale_models", "flatten_from": "ESRGAN", "hash": "{esrgan}"}}
            ]}},
            {{"key": "tier2", "description": "Tier 2: Community", "models": [
                {{"name": "Depth Anything V1", "source": {{"kind": "url", "url": "{DEPTH_URL}", "file": "depth_anything_vitl14.pth"}},
                  "dest": "depth", "hash": "{depth}"}},
                {{"name": "Florence-2-large", "source": {{"kind": "hub_repo", "repo": "microsoft/Florence-2-large", "hash_file": "model.safetensors"}},
                  "dest": "LLM/Florence-2-large", "dest_root": "volume", "hash": "{florence}"}}
            ]}}
        ]}}"#,
        vae = digest(VAE),
        esrgan = digest(ESRGAN),
        depth = digest(DEPTH),
        florence = digest(FLORENCE),
    );
    Manifest::parse(&content).unwrap()
}

fn temp_settings() -> (tempfile::TempDir, Settings) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Settings::new(Paths::new(root)))
}

fn install_comfyui(paths: &Paths) {
    fs::create_dir_all(
        paths
            .comfyui_root()
            .join("user/default/workflows")
            .as_std_path(),
    )
    .unwrap();
}

#[test]
fn full_run_provisions_everything() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    install_comfyui(&paths);
    let hub = MockHub::serving_all();
    let sink = RecordingSink::default();

    let report = Provisioner::new(settings, test_manifest(), hub)
        .run(&sink)
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.exit_code(), 0);
    assert_eq!((report.success_count, report.total_count), (4, 4));
    assert!(report.entries.iter().all(|entry| entry.status == EntryStatus::Downloaded));
    assert!(paths.marker_file().as_std_path().exists());

    let models = paths.models_root();
    assert!(models.join("vae/ae.safetensors").as_std_path().exists());
    assert!(models.join("upscale_models/4x-UltraSharp.pth").as_std_path().exists());
    assert!(!models.join("upscale_models/ESRGAN").as_std_path().exists());
    assert!(models.join("depth/depth_anything_vitl14.pth").as_std_path().exists());
    let florence = paths.llm_root().join("Florence-2-large");
    assert!(florence.join("model.safetensors").as_std_path().exists());
    assert!(!florence.join("pytorch_model.bin").as_std_path().exists());

    let formats = report.formats.unwrap();
    assert_eq!((formats.safetensors, formats.pth, formats.gguf), (2, 2, 0));

    let comfyui = report.comfyui.unwrap();
    assert_eq!(
        fs::read_to_string(comfyui.config_path.as_std_path()).unwrap(),
        EXTRA_MODEL_PATHS_YAML
    );
    assert!(comfyui.links.iter().all(|link| link.outcome == LinkOutcome::Created));

    let workflow = report.workflow.unwrap();
    assert!(workflow.downloaded);
    assert!(paths.volume_root().join(WORKFLOW_FILE).as_std_path().exists());
    assert!(workflow.comfyui_copy.is_some());

    let events = sink.events.lock().unwrap();
    let entries = events
        .iter()
        .filter(|event| matches!(event, ProgressEvent::Entry { .. }))
        .count();
    assert_eq!(entries, 4);
    assert!(events.iter().any(
        |event| matches!(event, ProgressEvent::Section(title) if title == "Downloading Tier 2: Community")
    ));
}

#[test]
fn marker_short_circuits_run() {
    let (_temp, settings) = temp_settings();
    write(&settings.paths.marker_file(), b"");
    let hub = MockHub::serving_all();
    let calls = Arc::clone(&hub.calls);

    let report = Provisioner::new(settings.clone(), test_manifest(), hub)
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::AlreadyProvisioned);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(*calls.lock().unwrap(), 0);
    assert!(!settings.paths.models_root().as_std_path().exists());
}

#[test]
fn existing_files_need_no_network() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    let manifest = test_manifest();
    for (_, entry) in manifest.entries() {
        write(&entry.final_path(&paths), b"already here");
    }
    write(&paths.volume_root().join(WORKFLOW_FILE), b"{}");
    let hub = MockHub::serving_all();
    let calls = Arc::clone(&hub.calls);

    let report = Provisioner::new(settings, manifest, hub)
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert!(report.entries.iter().all(|entry| entry.status == EntryStatus::Exists));
    assert_eq!(*calls.lock().unwrap(), 0);
    // ComfyUI is not installed in this run.
    assert!(report.comfyui.is_none());
}

#[test]
fn hash_mismatch_leaves_run_incomplete() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    let mut hub = MockHub::serving_all();
    hub.add_file("org/vae", "ae.safetensors", b"tampered");

    let report = Provisioner::new(settings, test_manifest(), hub)
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.entries[0].status, EntryStatus::HashMismatch);
    assert!(!paths.marker_file().as_std_path().exists());
    // Without quarantine the file stays where it landed.
    assert!(paths.models_root().join("vae/ae.safetensors").as_std_path().exists());
    assert!(report.comfyui.is_none());
    assert!(report.workflow.is_none());
}

#[test]
fn quarantine_moves_mismatched_file() {
    let (_temp, mut settings) = temp_settings();
    settings.quarantine_mismatches = true;
    let paths = settings.paths.clone();
    let mut hub = MockHub::serving_all();
    hub.add_file("org/vae", "ae.safetensors", b"tampered");

    let report = Provisioner::new(settings, test_manifest(), hub)
        .run(&QuietOutput)
        .unwrap();

    let vae = paths.models_root().join("vae/ae.safetensors");
    assert_eq!(report.entries[0].status, EntryStatus::HashMismatch);
    assert!(!vae.as_std_path().exists());
    assert!(
        paths
            .models_root()
            .join("vae/ae.safetensors.corrupt")
            .as_std_path()
            .exists()
    );
}

#[test]
fn transport_failure_does_not_stop_other_entries() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    let mut hub = MockHub::serving_all();
    hub.urls.remove(DEPTH_URL);

    let report = Provisioner::new(settings, test_manifest(), hub)
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.success_count, 3);
    let depth = &report.entries[2];
    assert_eq!(depth.status, EntryStatus::Failed);
    assert!(depth.detail.as_deref().unwrap().contains("connection reset"));
    assert_eq!(report.entries[3].status, EntryStatus::Downloaded);
    assert!(!paths.marker_file().as_std_path().exists());
}

#[test]
fn repository_without_hashed_file_blocks_marker() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    let mut hub = MockHub::serving_all();
    let repo = "microsoft/Florence-2-large";
    hub.files.remove(&format!("{repo}/model.safetensors"));
    hub.listings
        .insert(repo.to_string(), vec!["config.json".to_string(), "pytorch_model.bin".to_string()]);

    let report = Provisioner::new(settings, test_manifest(), hub)
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.entries[3].status, EntryStatus::Failed);
    assert!(report.entries[3].detail.as_deref().unwrap().contains("model.safetensors"));
    assert!(!paths.marker_file().as_std_path().exists());
}

#[test]
fn leftover_nested_dir_is_a_layout_error() {
    let (_temp, settings) = temp_settings();
    let paths = settings.paths.clone();
    let upscale = paths.models_root().join("upscale_models");
    write(&upscale.join("4x-UltraSharp.pth"), ESRGAN);
    write(&upscale.join("ESRGAN/stale.pth"), b"stale");

    let report = Provisioner::new(settings, test_manifest(), MockHub::serving_all())
        .run(&QuietOutput)
        .unwrap();

    assert_eq!(report.status, RunStatus::LayoutErrors);
    assert_eq!(report.layout_errors(), 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.layout_violations[0].path, upscale.join("ESRGAN"));
    assert!(!paths.marker_file().as_std_path().exists());
}
