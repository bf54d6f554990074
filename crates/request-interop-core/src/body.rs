//! Body streams
//!
//! A [`Body`] owns one byte stream. The stream is either already open or a
//! [`BodySource`] that is opened on first access and cached from then on.
//! Reading the full contents always rewinds first, so repeated reads return
//! the same bytes.

use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::SpooledTempFile;

/// Default size a temporary buffer may reach in memory before spilling to
/// disk (2 MiB)
pub const DEFAULT_SPOOL_THRESHOLD: usize = 2 * 1024 * 1024;

/// Readable, seekable byte source that can move between threads
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An owned, rewindable byte stream
///
/// The optional `uri` records where the bytes are stored, when they are
/// stored in a named file.
pub struct BodyStream {
    inner: Box<dyn ReadSeek>,
    uri: Option<String>,
}

impl BodyStream {
    /// Wrap an already open reader
    pub fn new(inner: impl Read + Seek + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            uri: None,
        }
    }

    /// Open a file for reading, recording its path as the stream uri
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(file).with_uri(path.to_string_lossy()))
    }

    /// Create an in-memory stream over the given bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Drain a reader into a fresh temporary buffer and rewind it
    ///
    /// The buffer stays in memory up to `threshold` bytes and spills to an
    /// anonymous temp file beyond that.
    pub fn spool(reader: &mut dyn Read, threshold: usize) -> io::Result<Self> {
        let mut buffer = SpooledTempFile::new(threshold);
        io::copy(reader, &mut buffer)?;
        buffer.seek(SeekFrom::Start(0))?;
        Ok(Self::new(buffer))
    }

    /// Like [`BodyStream::spool`], but stop after `limit` bytes when set
    pub fn spool_limited(
        reader: &mut dyn Read,
        limit: Option<u64>,
        threshold: usize,
    ) -> io::Result<Self> {
        match limit {
            Some(limit) => Self::spool(&mut reader.take(limit), threshold),
            None => Self::spool(reader, threshold),
        }
    }

    /// Set the storage location reported by [`BodyStream::uri`]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Storage location of the bytes, when they live in a named file
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Seek back to the start of the stream
    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Rewind and read every byte of the stream
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for BodyStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

/// Where a body's bytes come from before the stream is opened
#[derive(Debug, Clone, PartialEq)]
pub enum BodySource {
    /// The process's standard input, read up to `limit` bytes when set
    ///
    /// CGI servers need not close stdin after the body, so a CGI request
    /// carries its `CONTENT_LENGTH` here.
    Stdin { limit: Option<u64> },
    /// A named file
    File(PathBuf),
    /// Bytes already in memory
    Bytes(Bytes),
}

impl BodySource {
    /// Open the source as a rewindable stream
    ///
    /// Standard input cannot seek, so it is drained into a temporary buffer.
    pub fn open(&self, spool_threshold: usize) -> io::Result<BodyStream> {
        match self {
            BodySource::Stdin { limit } => {
                let stdin = io::stdin();
                let mut lock = stdin.lock();
                BodyStream::spool_limited(&mut lock, *limit, spool_threshold)
            }
            BodySource::File(path) => BodyStream::open(path),
            BodySource::Bytes(bytes) => Ok(BodyStream::from_bytes(bytes.clone())),
        }
    }
}

impl Default for BodySource {
    fn default() -> Self {
        BodySource::Stdin { limit: None }
    }
}

impl From<PathBuf> for BodySource {
    fn from(path: PathBuf) -> Self {
        BodySource::File(path)
    }
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Bytes(bytes)
    }
}

enum BodyState {
    Pending(BodySource),
    Open(BodyStream),
}

/// A byte stream, opened lazily on first access
pub struct Body {
    state: BodyState,
    spool_threshold: usize,
}

impl Body {
    /// Create a body around an open stream
    pub fn new(stream: BodyStream) -> Self {
        Self {
            state: BodyState::Open(stream),
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }

    /// Create a body that opens `source` on first access
    pub fn pending(source: impl Into<BodySource>) -> Self {
        Self {
            state: BodyState::Pending(source.into()),
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
        }
    }

    /// Set the in-memory limit used when a pending source must be spooled
    pub fn with_spool_threshold(mut self, threshold: usize) -> Self {
        self.spool_threshold = threshold;
        self
    }

    /// Check whether the stream has been opened
    pub fn is_open(&self) -> bool {
        matches!(self.state, BodyState::Open(_))
    }

    /// The source that will be opened on first access, if still pending
    pub fn source(&self) -> Option<&BodySource> {
        match &self.state {
            BodyState::Pending(source) => Some(source),
            BodyState::Open(_) => None,
        }
    }

    /// Get the underlying stream, opening it on first access
    pub fn stream(&mut self) -> io::Result<&mut BodyStream> {
        if let BodyState::Pending(source) = &self.state {
            let stream = source.open(self.spool_threshold)?;
            self.state = BodyState::Open(stream);
        }

        match &mut self.state {
            BodyState::Open(stream) => Ok(stream),
            BodyState::Pending(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "body stream could not be opened",
            )),
        }
    }

    /// Take the stream out of the body, opening it first if needed
    pub fn into_stream(self) -> io::Result<BodyStream> {
        match self.state {
            BodyState::Open(stream) => Ok(stream),
            BodyState::Pending(source) => source.open(self.spool_threshold),
        }
    }

    /// Take the stream out only if it has already been opened
    pub fn into_open_stream(self) -> Option<BodyStream> {
        match self.state {
            BodyState::Open(stream) => Some(stream),
            BodyState::Pending(_) => None,
        }
    }

    /// Rewind and read the full contents as bytes
    pub fn bytes(&mut self) -> io::Result<Vec<u8>> {
        self.stream()?.read_all()
    }

    /// Rewind and read the full contents as a UTF-8 string
    pub fn contents(&mut self) -> io::Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl From<BodyStream> for Body {
    fn from(stream: BodyStream) -> Self {
        Body::new(stream)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            BodyState::Pending(source) => f.debug_tuple("Body::Pending").field(source).finish(),
            BodyState::Open(stream) => f.debug_tuple("Body::Open").field(stream).finish(),
        }
    }
}
