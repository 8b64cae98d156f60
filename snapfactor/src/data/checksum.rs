//! Content-hash sidecars for capture and manifest files.
//!
//! Every file the store writes gets a `<file>.sha256` sidecar holding
//! `<hex_digest>  <basename>\n`. Verification recomputes the SHA-256 of
//! the raw bytes and compares it to the sidecar. Integrity failures are
//! never retried.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Sidecar file extension appended to the target's full name.
pub const SIDECAR_EXTENSION: &str = "sha256";

const CHUNK_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Missing checksum sidecar: {0}")]
    MissingSidecar(PathBuf),

    #[error("Empty checksum sidecar: {0}")]
    EmptySidecar(PathBuf),

    #[error("Checksum mismatch for {file}: expected={expected} actual={actual}")]
    Mismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Checksum recorded in manifest for {file} ({recorded}) differs from sidecar ({sidecar})")]
    ManifestMismatch {
        file: String,
        recorded: String,
        sidecar: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;

/// SHA-256 sidecar writer and verifier.
pub struct ChecksumStore;

impl ChecksumStore {
    /// Path of the sidecar for `path`.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(SIDECAR_EXTENSION);
        PathBuf::from(name)
    }

    /// Hex SHA-256 of a file's raw bytes.
    pub fn digest(path: &Path) -> IntegrityResult<String> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Hash `path` and write its sidecar. Returns the digest.
    pub fn write(path: &Path) -> IntegrityResult<String> {
        let digest = Self::digest(path)?;
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        fs::write(Self::sidecar_path(path), format!("{}  {}\n", digest, basename))?;
        Ok(digest)
    }

    /// Read the digest stored in the sidecar of `path`.
    pub fn read(path: &Path) -> IntegrityResult<String> {
        let sidecar = Self::sidecar_path(path);
        if !sidecar.exists() {
            return Err(IntegrityError::MissingSidecar(sidecar));
        }
        let content = fs::read_to_string(&sidecar)?;
        match content.split_whitespace().next() {
            Some(digest) => Ok(digest.to_lowercase()),
            None => Err(IntegrityError::EmptySidecar(sidecar)),
        }
    }

    /// Recompute the digest of `path` and compare it with the sidecar.
    pub fn verify(path: &Path) -> IntegrityResult<String> {
        let expected = Self::read(path)?;
        let actual = Self::digest(path)?;
        if actual != expected {
            return Err(IntegrityError::Mismatch {
                file: display_name(path),
                expected,
                actual,
            });
        }
        Ok(actual)
    }

    /// Verify `path` and additionally require the digest a manifest recorded for it.
    pub fn verify_recorded(path: &Path, recorded: &str) -> IntegrityResult<String> {
        let digest = Self::verify(path)?;
        if !digest.eq_ignore_ascii_case(recorded.trim()) {
            return Err(IntegrityError::ManifestMismatch {
                file: display_name(path),
                recorded: recorded.to_string(),
                sidecar: digest,
            });
        }
        Ok(digest)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
