use std::process::ExitCode;

use comfy_provision::cli::run_patch_workflow;
use comfy_provision::logging;

fn main() -> ExitCode {
    if let Err(err) = logging::init(None) {
        eprintln!("{err}");
    }
    ExitCode::from(run_patch_workflow(std::env::args_os()))
}
