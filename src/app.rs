use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

use crate::comfy::{self, ComfyReport, WorkflowInstall};
use crate::config::Settings;
use crate::error::ProvisionError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::hub::HubClient;
use crate::layout::{self, FormatCounts, LayoutViolation};
use crate::manifest::{Manifest, ManifestEntry};
use crate::verify;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Section(String),
    Entry {
        index: usize,
        total: usize,
        name: String,
    },
    EntryDone {
        name: String,
        status: EntryStatus,
        elapsed: Duration,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Exists,
    Downloaded,
    HashMismatch,
    Failed,
}

impl EntryStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EntryStatus::Exists | EntryStatus::Downloaded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Exists => "exists",
            EntryStatus::Downloaded => "downloaded",
            EntryStatus::HashMismatch => "hash mismatch",
            EntryStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryReport {
    pub tier: String,
    pub name: String,
    pub status: EntryStatus,
    pub path: Option<Utf8PathBuf>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The completion marker was present; nothing ran.
    AlreadyProvisioned,
    Complete,
    Incomplete,
    LayoutErrors,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub success_count: usize,
    pub total_count: usize,
    pub layout_violations: Vec<LayoutViolation>,
    pub formats: Option<FormatCounts>,
    pub entries: Vec<EntryReport>,
    pub comfyui: Option<ComfyReport>,
    pub workflow: Option<WorkflowInstall>,
}

impl RunReport {
    fn new(status: RunStatus, total_count: usize) -> Self {
        Self {
            status,
            success_count: 0,
            total_count,
            layout_violations: Vec::new(),
            formats: None,
            entries: Vec::new(),
            comfyui: None,
            workflow: None,
        }
    }

    pub fn layout_errors(&self) -> usize {
        self.layout_violations.len()
    }

    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::AlreadyProvisioned | RunStatus::Complete => 0,
            RunStatus::Incomplete | RunStatus::LayoutErrors => 1,
        }
    }
}

pub struct Provisioner<C: HubClient> {
    settings: Settings,
    manifest: Manifest,
    client: C,
}

impl<C: HubClient> Provisioner<C> {
    pub fn new(settings: Settings, manifest: Manifest, client: C) -> Self {
        Self {
            settings,
            manifest,
            client,
        }
    }

    /// Runs the whole provisioning sequence. Per-entry failures are recorded
    /// in the report; only setup failures are returned as errors.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunReport, ProvisionError> {
        let paths = &self.settings.paths;
        let marker = paths.marker_file();
        let total_count = self.manifest.len();

        if marker.as_std_path().exists() {
            tracing::warn!("Models already downloaded. Delete .models_downloaded to re-download.");
            tracing::warn!("  rm {marker}");
            return Ok(RunReport::new(RunStatus::AlreadyProvisioned, total_count));
        }

        tracing::info!("=== Download started ===");
        sink.event(ProgressEvent::Section(
            "Creating Directory Structure".to_string(),
        ));
        layout::create_directories(paths)?;

        let mut report = RunReport::new(RunStatus::Incomplete, total_count);
        report.entries = self.download_all(sink);
        report.success_count = report
            .entries
            .iter()
            .filter(|entry| entry.status.is_success())
            .count();

        sink.event(ProgressEvent::Section("Post-Download Verification".to_string()));
        let purged = layout::purge_cache_dirs(paths)?;
        if purged > 0 {
            tracing::debug!("Removed {purged} leftover cache directories");
        }

        tracing::info!("Verifying flat directory structure...");
        let check = layout::verify_flat_structure(&self.manifest, paths);
        if !check.is_flat() {
            tracing::error!("{} directory structure errors found!", check.error_count());
            report.layout_violations = check.violations;
            report.status = RunStatus::LayoutErrors;
            return Ok(report);
        }

        report.formats = Some(layout::count_files(paths)?);

        if report.success_count != report.total_count {
            tracing::error!(
                "Downloaded {}/{} models",
                report.success_count,
                report.total_count
            );
            tracing::error!("Fix the failed downloads and run again");
            return Ok(report);
        }

        fs::File::create(marker.as_std_path())
            .map_err(|err| ProvisionError::Filesystem(format!("create {marker}: {err}")))?;
        report.status = RunStatus::Complete;
        tracing::info!("All {} models downloaded successfully!", report.total_count);

        sink.event(ProgressEvent::Section("Configuring ComfyUI".to_string()));
        match comfy::configure_comfyui(paths) {
            Ok(comfyui) => report.comfyui = comfyui,
            Err(err) => tracing::error!("ComfyUI configuration failed: {err}"),
        }

        sink.event(ProgressEvent::Section("Downloading Workflow".to_string()));
        match comfy::install_workflow(&self.client, paths) {
            Ok(install) => report.workflow = Some(install),
            Err(err) => tracing::error!("Failed to download workflow: {err}"),
        }

        sink.event(ProgressEvent::Section("Setup Complete".to_string()));
        tracing::info!("Download log: {}", paths.log_file());
        tracing::info!("=== Setup completed ===");
        Ok(report)
    }

    fn download_all(&self, sink: &dyn ProgressSink) -> Vec<EntryReport> {
        let fetcher = Fetcher::new(&self.client, &self.settings.paths);
        let total = self.manifest.len();
        let mut reports = Vec::with_capacity(total);
        let mut current_tier = None;

        for (index, (tier, entry)) in self.manifest.entries().enumerate() {
            if current_tier != Some(tier.key.as_str()) {
                current_tier = Some(tier.key.as_str());
                sink.event(ProgressEvent::Section(format!(
                    "Downloading {}",
                    tier.description
                )));
            }

            match &entry.format_warning {
                Some(warning) => tracing::warn!("{} ({warning})...", entry.name),
                None => tracing::info!("{}...", entry.name),
            }
            sink.event(ProgressEvent::Entry {
                index: index + 1,
                total,
                name: entry.name.clone(),
            });

            let start = Instant::now();
            let mut entry_report = self.download_entry(&fetcher, entry);
            entry_report.tier = tier.key.clone();
            sink.event(ProgressEvent::EntryDone {
                name: entry.name.clone(),
                status: entry_report.status,
                elapsed: start.elapsed(),
            });
            reports.push(entry_report);
        }
        reports
    }

    fn download_entry(&self, fetcher: &Fetcher<'_, C>, entry: &ManifestEntry) -> EntryReport {
        let mut report = EntryReport {
            tier: String::new(),
            name: entry.name.clone(),
            status: EntryStatus::Failed,
            path: None,
            detail: None,
        };

        let outcome = match fetcher.fetch(entry) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("Download failed: {err}");
                report.detail = Some(err.to_string());
                return report;
            }
        };
        report.path = Some(outcome.path().to_path_buf());

        let verify_target = match outcome {
            FetchOutcome::Exists { .. } => {
                report.status = EntryStatus::Exists;
                return report;
            }
            FetchOutcome::Downloaded { verify_target, .. } => verify_target,
        };

        let verified = match &verify_target {
            Some(target) => verify::verify_file(target, entry.hash.as_ref()),
            None => Ok(()),
        };
        match verified {
            Ok(()) => report.status = EntryStatus::Downloaded,
            Err(err @ ProvisionError::HashMismatch { .. }) => {
                report.status = EntryStatus::HashMismatch;
                report.detail = Some(err.to_string());
                if let Some(target) = verify_target {
                    self.handle_mismatch(&target, &mut report);
                }
            }
            Err(err) => {
                tracing::error!("Verification failed: {err}");
                report.detail = Some(err.to_string());
            }
        }
        report
    }

    fn handle_mismatch(&self, target: &Utf8Path, report: &mut EntryReport) {
        if !self.settings.quarantine_mismatches {
            tracing::warn!(
                "{target} was left in place; the next run will treat it as present. Delete it before re-running."
            );
            return;
        }
        match verify::quarantine(target) {
            Ok(moved) => {
                tracing::warn!("Moved corrupt file to {moved}");
                report.path = Some(moved);
            }
            Err(err) => tracing::error!("Failed to quarantine {target}: {err}"),
        }
    }
}
