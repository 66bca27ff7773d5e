use std::{
    fmt,
    fs::File,
    io::{Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use crate::{Error, Result};

/// A readable, seekable stream that can cross an await point.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where asset bytes come from.
///
/// Formats are either a mime type (`image/jpeg`) or an extension (`jpg`);
/// the engine accepts both. A file without an explicit format uses its
/// extension.
pub enum Source {
    File {
        path: PathBuf,
        format: Option<String>,
    },
    Buffer {
        bytes: Vec<u8>,
        format: String,
    },
    Stream {
        stream: Box<dyn ReadSeek>,
        format: String,
    },
}

impl Source {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::File {
            path: path.into(),
            format: None,
        }
    }

    pub fn file_with_format(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Source::File {
            path: path.into(),
            format: Some(format.into()),
        }
    }

    pub fn buffer(bytes: impl Into<Vec<u8>>, format: impl Into<String>) -> Self {
        Source::Buffer {
            bytes: bytes.into(),
            format: format.into(),
        }
    }

    pub fn stream(stream: impl ReadSeek + 'static, format: impl Into<String>) -> Self {
        Source::Stream {
            stream: Box::new(stream),
            format: format.into(),
        }
    }

    pub fn format(&self) -> Result<String> {
        match self {
            Source::File {
                format: Some(format),
                ..
            }
            | Source::Buffer { format, .. }
            | Source::Stream { format, .. } => Ok(format.clone()),
            Source::File { path, format: None } => format_from_path(path),
        }
    }

    /// Opens the source for reading. A missing file fails here, before any
    /// engine work is attempted.
    pub fn into_stream(self) -> Result<Box<dyn ReadSeek>> {
        match self {
            Source::File { path, .. } => {
                let file = File::open(&path)
                    .inspect_err(|e| log::error!("Cannot open {}: {e}", path.display()))?;
                Ok(Box::new(file))
            }
            Source::Buffer { bytes, .. } => Ok(Box::new(Cursor::new(bytes))),
            Source::Stream { stream, .. } => Ok(stream),
        }
    }

    /// Reads the whole source into memory.
    pub async fn read_bytes(self) -> Result<Vec<u8>> {
        match self {
            Source::File { path, .. } => Ok(tokio::fs::read(&path)
                .await
                .inspect_err(|e| log::error!("Cannot read {}: {e}", path.display()))?),
            Source::Buffer { bytes, .. } => Ok(bytes),
            Source::Stream { mut stream, .. } => {
                let mut bytes = Vec::new();
                stream.rewind()?;
                stream.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File { path, format } => f
                .debug_struct("File")
                .field("path", path)
                .field("format", format)
                .finish(),
            Source::Buffer { bytes, format } => f
                .debug_struct("Buffer")
                .field("len", &bytes.len())
                .field("format", format)
                .finish(),
            Source::Stream { format, .. } => {
                f.debug_struct("Stream").field("format", format).finish()
            }
        }
    }
}

/// Where output bytes go.
///
/// A buffer destination is borrowed for the whole operation and overwritten
/// only once the operation has succeeded.
#[derive(Debug)]
pub enum Destination<'a> {
    File(PathBuf),
    Buffer(&'a mut Vec<u8>),
}

impl<'a> Destination<'a> {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Destination::File(path.into())
    }

    pub fn buffer(buffer: &'a mut Vec<u8>) -> Self {
        Destination::Buffer(buffer)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Destination::Buffer(_))
    }

    /// Replaces the destination content with `bytes`.
    pub async fn write_bytes(self, bytes: Vec<u8>) -> Result<()> {
        match self {
            Destination::File(path) => Ok(tokio::fs::write(&path, bytes)
                .await
                .inspect_err(|e| log::error!("Cannot write {}: {e}", path.display()))?),
            Destination::Buffer(buffer) => {
                *buffer = bytes;
                Ok(())
            }
        }
    }
}

fn format_from_path(path: &Path) -> Result<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))
}
