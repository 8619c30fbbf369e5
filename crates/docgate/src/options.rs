//! Document inputs and open options.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use docgate_engine::ReadSeek;
use docgate_protocol::{EngineError, ErrorCode};

use crate::error::{Error, Result};

/// Where a document comes from.
pub enum DocumentInput {
    Bytes(Vec<u8>),
    FilePath(PathBuf),
    /// A seekable stream of `size` bytes. Read in place by in-process
    /// instances; buffered in full before it is sent to a worker.
    Reader { reader: Box<dyn ReadSeek>, size: u64 },
}

impl fmt::Debug for DocumentInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentInput::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            DocumentInput::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            DocumentInput::Reader { size, .. } => write!(f, "Reader({} bytes)", size),
        }
    }
}

/// Optional settings for opening a document.
#[derive(Clone, PartialEq, Eq)]
pub enum OpenOption {
    Password(String),
}

impl fmt::Debug for OpenOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenOption::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

pub fn password(password: impl Into<String>) -> OpenOption {
    OpenOption::Password(password.into())
}

#[derive(Debug)]
pub struct OpenDocumentRequest {
    pub input: DocumentInput,
    pub password: Option<String>,
}

impl OpenDocumentRequest {
    pub fn new(input: DocumentInput) -> Self {
        Self {
            input,
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Applies options in order; later ones win.
    pub fn with_options(mut self, options: impl IntoIterator<Item = OpenOption>) -> Self {
        for option in options {
            match option {
                OpenOption::Password(password) => self.password = Some(password),
            }
        }
        self
    }
}

/// Reads exactly `size` bytes from the start of `reader` on the blocking pool.
pub(crate) async fn buffer_reader(reader: Box<dyn ReadSeek>, size: u64) -> Result<Vec<u8>> {
    let read = tokio::task::spawn_blocking(move || read_all(reader, size))
        .await
        .map_err(|e| Error::Engine {
            operation: "OpenReader",
            source: EngineError::new(ErrorCode::Io, format!("reader task failed: {}", e)),
        })?;
    read.map_err(|source| Error::Engine {
        operation: "OpenReader",
        source,
    })
}

fn read_all(mut reader: Box<dyn ReadSeek>, size: u64) -> std::result::Result<Vec<u8>, EngineError> {
    // The declared size is not trusted for the reservation, only the stream length is.
    let available = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    let reserve = usize::try_from(size.min(available)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(reserve);
    reader.take(size).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != size {
        return Err(EngineError::new(
            ErrorCode::File,
            format!("reader ended after {} of {} bytes", bytes.len(), size),
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_options_apply_in_order() {
        let request = OpenDocumentRequest::new(DocumentInput::Bytes(Vec::new()))
            .with_options([password("first"), password("second")]);
        assert_eq!(request.password.as_deref(), Some("second"));
        assert!(!format!("{:?}", password("secret")).contains("secret"));
    }

    #[tokio::test]
    async fn test_buffer_reader_reads_declared_size() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        cursor.set_position(7);
        let bytes = buffer_reader(Box::new(cursor), 4).await.unwrap();
        assert_eq!(bytes, b"0123");
    }

    #[tokio::test]
    async fn test_short_reader_is_a_file_error() {
        let cursor = Cursor::new(b"abc".to_vec());
        let err = buffer_reader(Box::new(cursor), 10).await.unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::File));
    }

    #[tokio::test]
    async fn test_huge_declared_size_is_a_file_error() {
        let cursor = Cursor::new(b"%PDF-1.7 tiny".to_vec());
        let err = buffer_reader(Box::new(cursor), 1u64 << 46).await.unwrap_err();
        match err {
            Error::Engine { operation, source } => {
                assert_eq!(operation, "OpenReader");
                assert_eq!(source.code, ErrorCode::File);
            }
            other => panic!("expected an engine error, got {:?}", other),
        }
    }
}
