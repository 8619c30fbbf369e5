//! Requests that carry a reader or a function value. These run in-process
//! only; the gateway rejects or rewrites them for isolated instances.

use std::fmt;
use std::io::{Read, Seek};
use std::sync::Arc;

use chrono::NaiveDateTime;
use docgate_protocol::DocumentRef;

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Features the engine met while loading but cannot honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsupportedFeature {
    XfaForm,
    PortableCollection,
    Attachment,
    Security,
    SharedReview,
    Annotation3d,
    MovieAnnotation,
    SoundAnnotation,
    ScreenMedia,
    RichMedia,
    FileAttachmentAnnotation,
    SignatureAnnotation,
}

impl UnsupportedFeature {
    /// Numeric code as reported by the native library.
    pub fn code(&self) -> i32 {
        match self {
            UnsupportedFeature::XfaForm => 1,
            UnsupportedFeature::PortableCollection => 2,
            UnsupportedFeature::Attachment => 3,
            UnsupportedFeature::Security => 4,
            UnsupportedFeature::SharedReview => 5,
            UnsupportedFeature::Annotation3d => 11,
            UnsupportedFeature::MovieAnnotation => 12,
            UnsupportedFeature::SoundAnnotation => 13,
            UnsupportedFeature::ScreenMedia => 14,
            UnsupportedFeature::RichMedia => 15,
            UnsupportedFeature::FileAttachmentAnnotation => 16,
            UnsupportedFeature::SignatureAnnotation => 17,
        }
    }
}

pub type UnsupportedObjectHandler = Arc<dyn Fn(UnsupportedFeature) + Send + Sync>;

/// Seconds since the Unix epoch.
pub type TimeFunction = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Converts epoch seconds to local wall-clock time.
pub type LocaltimeFunction = Arc<dyn Fn(i64) -> NaiveDateTime + Send + Sync>;

pub enum LocalRequest {
    OpenReader {
        reader: Box<dyn ReadSeek>,
        size: u64,
        password: Option<String>,
    },
    /// `None` restores the default (no handler).
    SetUnsupportedObjectHandler(Option<UnsupportedObjectHandler>),
    SetTimeFunction(Option<TimeFunction>),
    SetLocaltimeFunction(Option<LocaltimeFunction>),
}

impl LocalRequest {
    pub fn operation(&self) -> LocalOperation {
        match self {
            LocalRequest::OpenReader { .. } => LocalOperation::OpenReader,
            LocalRequest::SetUnsupportedObjectHandler(_) => {
                LocalOperation::SetUnsupportedObjectHandler
            }
            LocalRequest::SetTimeFunction(_) => LocalOperation::SetTimeFunction,
            LocalRequest::SetLocaltimeFunction(_) => LocalOperation::SetLocaltimeFunction,
        }
    }
}

impl fmt::Debug for LocalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalRequest::OpenReader { size, password, .. } => f
                .debug_struct("OpenReader")
                .field("size", size)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            other => f.write_str(other.operation().name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalOperation {
    OpenReader,
    SetUnsupportedObjectHandler,
    SetTimeFunction,
    SetLocaltimeFunction,
}

impl LocalOperation {
    pub fn name(&self) -> &'static str {
        match self {
            LocalOperation::OpenReader => "OpenReader",
            LocalOperation::SetUnsupportedObjectHandler => "SetUnsupportedObjectHandler",
            LocalOperation::SetTimeFunction => "SetTimeFunction",
            LocalOperation::SetLocaltimeFunction => "SetLocaltimeFunction",
        }
    }
}

impl fmt::Display for LocalOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalResponse {
    Opened(DocumentRef),
    Registered,
}
