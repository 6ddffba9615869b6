use std::ffi::OsString;

use camino::Utf8PathBuf;
use clap::Parser;
use clap::error::ErrorKind;

use crate::error::ProvisionError;
use crate::output::ConsoleOutput;
use crate::workflow::patch_file;

/// Takes no arguments; the volume root, manifest and hub endpoint come from
/// COMFY_PROVISION_VOLUME, COMFY_PROVISION_MANIFEST and HF_ENDPOINT.
#[derive(Debug, Parser)]
#[command(name = "comfy-provision")]
#[command(about = "Download, verify and lay out ComfyUI models on a GPU host")]
#[command(version)]
pub struct ProvisionCli {}

#[derive(Debug, Parser)]
#[command(name = "patch-workflow")]
#[command(about = "Patch a ComfyUI workflow for CUDA: mps->cuda, fp32->fp16, eager->sdpa")]
#[command(version)]
pub struct PatchCli {
    /// Workflow JSON to read
    pub input: Utf8PathBuf,

    /// Where to write the patched workflow (may equal the input)
    pub output: Utf8PathBuf,
}

/// Help and version requests exit 0; every other argument error exits 1.
pub fn map_parse_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// Parses `args`, printing clap's message and returning the exit code on
/// failure.
pub fn parse_args<P, I, T>(args: I) -> Result<P, u8>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    P::try_parse_from(args).map_err(|err| {
        let _ = err.print();
        map_parse_exit_code(&err)
    })
}

pub fn run_patch_workflow<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli: PatchCli = match parse_args(args) {
        Ok(cli) => cli,
        Err(code) => return code,
    };

    match patch_file(&cli.input, &cli.output) {
        Ok(counts) => {
            ConsoleOutput::print_patch_summary(cli.output.as_str(), &counts);
            0
        }
        Err(ProvisionError::MissingInput(path)) => {
            eprintln!("Error: Input file not found: {}", path.display());
            1
        }
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            1
        }
    }
}
