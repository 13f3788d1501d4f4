pub mod config;
pub mod digest;
pub mod error;
pub mod metadata;
pub mod reputation;
pub mod sniff;
pub mod source;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info_span};

pub use config::{ConfigError, InspectorConfig};
pub use digest::{digest, digest_path, digest_paths, DigestEngine, DigestResult, HashAlgorithm, Verdict};
pub use error::InspectError;
pub use metadata::{extract_metadata, AudioTags, MetadataResult, ParseFailure, TagValue};
pub use reputation::{AbuseIpdbClient, LookupError, ReputationProvider, ReputationRecord};
pub use sniff::{classify, Container, FileTypeClass};
pub use source::FileHandle;

/// Progress callback: `(stage, current, total)`. May borrow from the caller.
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64) + Send + Sync + 'a;

/// Throttled progress reporter - emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let start = Instant::now();
        Self {
            inner,
            last_emit: Mutex::new(start.checked_sub(Duration::from_secs(1)).unwrap_or(start)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64) {
        let is_done = current >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < Duration::from_millis(200) {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total);
    }
}

/// Everything learned about one file.
#[derive(Debug)]
pub struct Inspection {
    pub path: PathBuf,
    pub container: Container,
    pub class: FileTypeClass,
    pub digest: Result<DigestResult, InspectError>,
    pub metadata: Result<MetadataResult, InspectError>,
}

/// Digest and decode a file concurrently. Each pass opens its own handle and
/// reads it once from start to finish.
pub fn inspect_path(path: &Path, config: &InspectorConfig) -> Inspection {
    let span = info_span!("inspect", path = %path.display());
    let _guard = span.enter();

    let (digest, decoded) = rayon::join(
        || digest_path(path, config),
        || -> Result<(Container, FileTypeClass, MetadataResult), InspectError> {
            let mut handle = FileHandle::open(path)?;
            let container = sniff::sniff_source(&mut handle);
            let class = sniff::resolve_class(container, handle.declared_type());
            let metadata =
                extract_metadata(&mut handle, class, config.decode.max_decode_bytes)?;
            Ok((container, class, metadata))
        },
    );

    let (container, class, metadata) = match decoded {
        Ok((container, class, metadata)) => (container, class, Ok(metadata)),
        Err(e) => (Container::Unknown, FileTypeClass::Other, Err(e)),
    };
    debug!(%container, %class, digest_ok = digest.is_ok(), metadata_ok = metadata.is_ok(), "inspection finished");

    Inspection {
        path: path.to_path_buf(),
        container,
        class,
        digest,
        metadata,
    }
}
