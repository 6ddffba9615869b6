use crate::app::{ProgressEvent, ProgressSink, RunReport, RunStatus};
use crate::comfy::LinkOutcome;
use crate::workflow::PatchCounts;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_banner() {
        println!();
        println!("{}", "=".repeat(72));
        println!("  COMFYUI MODEL PROVISIONING");
        println!("{}", "=".repeat(72));
        println!();
    }

    pub fn print_run_summary(report: &RunReport) {
        match report.status {
            RunStatus::AlreadyProvisioned => {
                println!("{YELLOW}Nothing to do: models already provisioned.{RESET}");
                return;
            }
            RunStatus::LayoutErrors => {
                println!(
                    "{RED}{} directory structure errors found{RESET}",
                    report.layout_errors()
                );
                for violation in &report.layout_violations {
                    println!("{RED}  {} left {}{RESET}", violation.name, violation.path);
                }
            }
            RunStatus::Incomplete | RunStatus::Complete => {}
        }

        let color = if report.success_count == report.total_count {
            GREEN
        } else {
            RED
        };
        println!(
            "{color}Models ready: {}/{}{RESET}",
            report.success_count, report.total_count
        );
        for entry in report.entries.iter().filter(|entry| !entry.status.is_success()) {
            println!(
                "{RED}  {} ({}): {}{RESET}",
                entry.name,
                entry.status.as_str(),
                entry.detail.as_deref().unwrap_or("unknown error")
            );
        }

        if let Some(comfyui) = &report.comfyui {
            println!("{GREEN}Model paths: {}{RESET}", comfyui.config_path);
            if !comfyui.yaml_matches_volume {
                println!("{YELLOW}  Model paths target /workspace; edit them for this volume{RESET}");
            }
            for link in &comfyui.links {
                let (color, label) = match &link.outcome {
                    LinkOutcome::Created => (GREEN, "created"),
                    LinkOutcome::Replaced => (GREEN, "replaced"),
                    LinkOutcome::BlockedByExisting => (YELLOW, "blocked by existing entry"),
                    LinkOutcome::Failed(_) => (RED, "failed"),
                };
                println!("{color}  {} -> {} ({label}){RESET}", link.target, link.source);
            }
        }
        if let Some(workflow) = &report.workflow {
            println!("{GREEN}Workflow: {}{RESET}", workflow.workspace_path);
        }
    }

    pub fn print_patch_summary(output: &str, counts: &PatchCounts) {
        println!("Patched workflow saved to: {output}");
        println!("  - MPS -> CUDA: {}", counts.mps_to_cuda);
        println!("  - fp32 -> fp16: {}", counts.fp32_to_fp16);
        println!("  - eager -> sdpa: {}", counts.eager_to_sdpa);
        if counts.total() == 0 {
            println!("  (No changes needed - workflow already CUDA-compatible)");
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Section(title) => {
                println!();
                println!("{BLUE}{}{RESET}", "=".repeat(68));
                println!("{BLUE}  {title}{RESET}");
                println!("{BLUE}{}{RESET}", "=".repeat(68));
                println!();
            }
            ProgressEvent::Entry { index, total, name } => {
                println!("[{index}/{total}] {name}");
            }
            ProgressEvent::EntryDone {
                name,
                status,
                elapsed,
            } => {
                let color = if status.is_success() { GREEN } else { RED };
                println!(
                    "{color}  {name}: {} ({:.1}s){RESET}",
                    status.as_str(),
                    elapsed.as_secs_f64()
                );
            }
        }
    }
}

/// Sink that discards progress, for scripted runs and tests.
pub struct QuietOutput;

impl ProgressSink for QuietOutput {
    fn event(&self, _event: ProgressEvent) {}
}
