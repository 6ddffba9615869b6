use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ProvisionError {
    #[error("invalid repository id: {0}")]
    InvalidRepoId(String),

    #[error("invalid sha256 digest: {0}")]
    InvalidHash(String),

    #[error("invalid manifest entry {name}: {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("hub request failed: {0}")]
    HubHttp(String),

    #[error("hub returned status {status} for {url}")]
    HubStatus { status: u16, url: String },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{path} missing after repository download; its hash cannot be checked")]
    MissingHashFile { path: PathBuf },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("failed to parse workflow JSON: {0}")]
    WorkflowParse(String),

    #[error("unsupported workflow document: {0}")]
    UnsupportedWorkflow(String),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
