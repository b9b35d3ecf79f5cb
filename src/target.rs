//! Target file I/O.
//!
//! Target files are externally owned; they are opened, used, and closed per
//! patch, never held open across patches, so a mid-sequence failure leaves no
//! dangling handles. All paths are relative to a validated installation root.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A whitelisted target file: expected size and SHA-256 checksum, established
/// before the engine runs.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub path: String,
    pub size: u64,
    pub sha256_hex: String,
}

fn locate(root: &Path, rel: &str) -> Result<PathBuf> {
    let path = root.join(rel);
    if !path.is_file() {
        return Err(Error::TargetFile {
            path: rel.to_string(),
            detail: "missing or not a regular file".to_string(),
        });
    }
    Ok(path)
}

/// Verify a target against its whitelist entry (size, then checksum).
pub fn verify(root: &Path, spec: &TargetSpec) -> Result<()> {
    let path = locate(root, &spec.path)?;
    let meta = std::fs::metadata(&path)?;
    if meta.len() != spec.size {
        return Err(Error::TargetFile {
            path: spec.path.clone(),
            detail: format!("size {} does not match expected {}", meta.len(), spec.size),
        });
    }
    if meta.permissions().readonly() {
        return Err(Error::TargetFile {
            path: spec.path.clone(),
            detail: "file is read-only".to_string(),
        });
    }

    let mut file = File::open(&path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hex::encode(hasher.finalize());
    if !digest.eq_ignore_ascii_case(&spec.sha256_hex) {
        return Err(Error::TargetFile {
            path: spec.path.clone(),
            detail: format!("checksum mismatch: {digest}"),
        });
    }
    Ok(())
}

/// Read exactly `[start, end)` from a target file.
pub fn read_range(root: &Path, rel: &str, start: u64, end: u64) -> Result<Vec<u8>> {
    let path = locate(root, rel)?;
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Overwrite `bytes` at `start` in a target file.
pub fn write_range(root: &Path, rel: &str, start: u64, bytes: &[u8]) -> Result<()> {
    let path = locate(root, rel)?;
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(start))?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}
