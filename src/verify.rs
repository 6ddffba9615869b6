use std::fs::{self, File};
use std::io::{self, Read};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::domain::Sha256Hex;
use crate::error::ProvisionError;

const CHUNK_SIZE: usize = 8192;

/// Streams `reader` through SHA-256, returning the lowercase hex digest and
/// the number of bytes read.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

pub fn sha256_file(path: &Utf8Path) -> Result<String, ProvisionError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(format!("open {path}: {err}")))?;
    let (digest, _) = hash_reader(&mut file)
        .map_err(|err| ProvisionError::Filesystem(format!("read {path}: {err}")))?;
    Ok(digest)
}

/// Passes trivially when no digest is expected.
pub fn verify_file(path: &Utf8Path, expected: Option<&Sha256Hex>) -> Result<(), ProvisionError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = sha256_file(path)?;
    if expected.matches(&actual) {
        tracing::info!("Hash verified: {}", path.file_name().unwrap_or(path.as_str()));
        return Ok(());
    }

    tracing::error!("Hash mismatch for {path}!");
    tracing::error!("  Expected: {expected}");
    tracing::error!("  Got:      {actual}");
    Err(ProvisionError::HashMismatch {
        path: path.as_std_path().to_path_buf(),
        expected: expected.to_string(),
        actual,
    })
}

/// Moves a file that failed verification out of the way so the next run's
/// existence check does not accept it.
pub fn quarantine(path: &Utf8Path) -> Result<Utf8PathBuf, ProvisionError> {
    let target = Utf8PathBuf::from(format!("{path}.corrupt"));
    if target.as_std_path().exists() {
        fs::remove_file(target.as_std_path())
            .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
    }
    fs::rename(path.as_std_path(), target.as_std_path())
        .map_err(|err| ProvisionError::Filesystem(err.to_string()))?;
    Ok(target)
}
