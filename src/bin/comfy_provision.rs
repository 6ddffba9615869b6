use std::process::ExitCode;

use miette::IntoDiagnostic;

use comfy_provision::app::Provisioner;
use comfy_provision::cli::{ProvisionCli, parse_args};
use comfy_provision::config::Settings;
use comfy_provision::hub::HubHttpClient;
use comfy_provision::logging;
use comfy_provision::manifest::Manifest;
use comfy_provision::output::ConsoleOutput;

fn main() -> ExitCode {
    if let Err(code) = parse_args::<ProvisionCli, _, _>(std::env::args_os()) {
        return ExitCode::from(code);
    }
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> miette::Result<u8> {
    let settings = Settings::from_env();
    logging::init(Some(&settings.paths.log_file())).into_diagnostic()?;

    ConsoleOutput::print_banner();

    let manifest = Manifest::resolve(settings.manifest_path.as_deref()).into_diagnostic()?;
    let client = HubHttpClient::new(&settings.hub_endpoint).into_diagnostic()?;
    let provisioner = Provisioner::new(settings, manifest, client);

    let report = provisioner.run(&ConsoleOutput).into_diagnostic()?;
    ConsoleOutput::print_run_summary(&report);
    Ok(report.exit_code())
}
