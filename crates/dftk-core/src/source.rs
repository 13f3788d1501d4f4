use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use crate::error::{InspectError, Result};

/// A sequential byte source with a declared total length.
///
/// The declared length is what the caller believes the source holds; the
/// digest engine checks it against what is actually readable. `peek` lets the
/// sniffer look ahead without moving the read position seen by later stages.
pub struct FileHandle {
    reader: Box<dyn Read + Send>,
    declared_len: u64,
    declared_type: Option<String>,
    name: Option<String>,
    prefix: Vec<u8>,
    prefix_pos: usize,
    exhausted: bool,
}

impl FileHandle {
    /// Open a file on disk. The declared type is guessed from the file name,
    /// which makes it advisory only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| InspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let declared_len = file
            .metadata()
            .map_err(|source| InspectError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let declared_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        let mut handle = Self::from_reader(BufReader::new(file), declared_len);
        handle.declared_type = declared_type;
        handle.name = name;
        Ok(handle)
    }

    /// An in-memory source whose declared length is exact.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self::from_reader(Cursor::new(bytes), len)
    }

    pub fn from_reader<R>(reader: R, declared_len: u64) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            declared_len,
            declared_type: None,
            name: None,
            prefix: Vec::new(),
            prefix_pos: 0,
            exhausted: false,
        }
    }

    pub fn with_declared_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_type = Some(content_type.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn declared_len(&self) -> u64 {
        self.declared_len
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Look at up to `n` upcoming bytes. The bytes are buffered and replayed
    /// by subsequent reads. Fewer than `n` bytes are returned only at end of
    /// stream.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        let wanted = self.prefix_pos + n;
        if self.prefix.len() < wanted && !self.exhausted {
            let mut chunk = [0u8; 256];
            while self.prefix.len() < wanted {
                let limit = (wanted - self.prefix.len()).min(chunk.len());
                match self.reader.read(&mut chunk[..limit]) {
                    Ok(0) => {
                        self.exhausted = true;
                        break;
                    }
                    Ok(read) => self.prefix.extend_from_slice(&chunk[..read]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        let end = wanted.min(self.prefix.len());
        Ok(&self.prefix[self.prefix_pos..end])
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.prefix_pos < self.prefix.len() {
            let pending = &self.prefix[self.prefix_pos..];
            let count = pending.len().min(buf.len());
            buf[..count].copy_from_slice(&pending[..count]);
            self.prefix_pos += count;
            if self.prefix_pos == self.prefix.len() {
                self.prefix.clear();
                self.prefix_pos = 0;
            }
            return Ok(count);
        }
        if self.exhausted {
            return Ok(0);
        }
        self.reader.read(buf)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("declared_len", &self.declared_len)
            .field("declared_type", &self.declared_type)
            .field("buffered", &(self.prefix.len() - self.prefix_pos))
            .finish()
    }
}
