use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use md5::Md5;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::InspectorConfig;
use crate::error::{InspectError, Result};
use crate::source::FileHandle;
use crate::{ProgressCallback, ThrottledProgress};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// MD5 and SHA-256 of one source, plus the number of bytes hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestResult {
    pub size_bytes: u64,
    #[serde(serialize_with = "hex::serde::serialize")]
    pub md5: [u8; 16],
    #[serde(serialize_with = "hex::serde::serialize")]
    pub sha256: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => f.write_str("MD5"),
            HashAlgorithm::Sha256 => f.write_str("SHA-256"),
        }
    }
}

/// Outcome of comparing a computed digest with a user-supplied one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "algorithm", rename_all = "lowercase")]
pub enum Verdict {
    Match(HashAlgorithm),
    Mismatch(HashAlgorithm),
    /// Neither 32 nor 64 hex characters.
    Unrecognized,
}

impl DigestResult {
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// Compare against an expected hex digest. The algorithm is picked by
    /// length; letter case and surrounding whitespace are ignored.
    pub fn verify(&self, expected: &str) -> Verdict {
        let expected = expected.trim();
        if !expected.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Verdict::Unrecognized;
        }
        let (algorithm, actual) = match expected.len() {
            32 => (HashAlgorithm::Md5, self.md5_hex()),
            64 => (HashAlgorithm::Sha256, self.sha256_hex()),
            _ => return Verdict::Unrecognized,
        };
        if actual.eq_ignore_ascii_case(expected) {
            Verdict::Match(algorithm)
        } else {
            Verdict::Mismatch(algorithm)
        }
    }
}

/// Streams a source through MD5 and SHA-256 in one pass, one chunk at a time.
#[derive(Debug, Clone, Copy)]
pub struct DigestEngine {
    chunk_size: usize,
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DigestEngine {
    /// Chunk sizes are clamped to `MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE`.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn digest(&self, source: &mut FileHandle) -> Result<DigestResult> {
        self.digest_inner(source, None)
    }

    /// Like [`digest`](Self::digest), reporting `(bytes read, declared total)`
    /// through a throttled callback.
    pub fn digest_with_progress(
        &self,
        source: &mut FileHandle,
        progress: &ProgressCallback<'_>,
    ) -> Result<DigestResult> {
        let throttled = ThrottledProgress::new(progress);
        self.digest_inner(source, Some(&throttled))
    }

    fn digest_inner(
        &self,
        source: &mut FileHandle,
        progress: Option<&ThrottledProgress<'_>>,
    ) -> Result<DigestResult> {
        let expected = source.declared_len();
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;

        loop {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(read = total, error = %e, "digest aborted by read error");
                    return Err(InspectError::Read(e));
                }
            };
            let chunk = &buffer[..read];
            md5.update(chunk);
            sha256.update(chunk);
            total += read as u64;

            if let Some(p) = progress {
                p.report("digest", total, expected);
            }
        }

        if total != expected {
            warn!(expected, actual = total, "declared length does not match bytes read");
            return Err(InspectError::TruncatedRead {
                expected,
                actual: total,
            });
        }

        let result = DigestResult {
            size_bytes: total,
            md5: md5.finalize().into(),
            sha256: sha256.finalize().into(),
        };
        debug!(size = total, sha256 = %result.sha256_hex(), "digest complete");
        Ok(result)
    }
}

/// Digest with the default engine.
pub fn digest(source: &mut FileHandle) -> Result<DigestResult> {
    DigestEngine::default().digest(source)
}

/// Digest a file on disk with the configured chunk size.
pub fn digest_path(path: &Path, config: &InspectorConfig) -> Result<DigestResult> {
    let mut handle = FileHandle::open(path)?;
    DigestEngine::new(config.digest.chunk_size).digest(&mut handle)
}

/// Digest many files in parallel, one handle per file. Results keep the input
/// order.
pub fn digest_paths(
    paths: &[PathBuf],
    config: &InspectorConfig,
) -> Vec<(PathBuf, Result<DigestResult>)> {
    paths
        .par_iter()
        .map(|path| (path.clone(), digest_path(path, config)))
        .collect()
}
