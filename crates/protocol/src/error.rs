use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-reported failure codes. The first group mirrors the native
/// library's last-error values; the rest cover conditions the gateway and
/// engines report themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unknown,
    /// File not found or could not be opened.
    File,
    /// File not in the expected format or corrupted.
    Format,
    /// Password required or incorrect.
    Password,
    /// Unsupported security scheme.
    Security,
    /// Page not found or content error.
    Page,
    /// Operation not available in this engine.
    Unsupported,
    InvalidArgument,
    /// Referenced resource does not exist in this engine.
    NotFound,
    Io,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::File => "file",
            ErrorCode::Format => "format",
            ErrorCode::Password => "password",
            ErrorCode::Security => "security",
            ErrorCode::Page => "page",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Io => "io",
        }
    }

    /// Inverse of [`ErrorCode::as_str`]; unrecognized codes map to `Unknown`.
    pub fn parse(code: &str) -> Self {
        match code {
            "file" => ErrorCode::File,
            "format" => ErrorCode::Format,
            "password" => ErrorCode::Password,
            "security" => ErrorCode::Security,
            "page" => ErrorCode::Page,
            "unsupported" => ErrorCode::Unsupported,
            "invalid_argument" => ErrorCode::InvalidArgument,
            "not_found" => ErrorCode::NotFound,
            "io" => ErrorCode::Io,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the engine for one operation. Crosses the worker
/// boundary unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unsupported(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Unsupported, format!("{} is not supported by this engine", what))
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", what))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Format, message)
    }

    pub fn page(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Page, message)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => ErrorCode::File,
            _ => ErrorCode::Io,
        };
        Self::new(code, e.to_string())
    }
}
