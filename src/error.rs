//! Structured error type shared by the layout, serialization, and cache layers.

use core::fmt;
use std::io;

/// Processing phase where an error originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorPhase {
    /// Raw storage access (open/read/write/seek/remove).
    Storage,
    /// Binary encoding of lines and pages.
    Serialize,
    /// Binary decoding of lines and pages.
    Deserialize,
    /// Section cache header/LUT handling.
    Cache,
    /// Markup tokenization in a content driver.
    Parse,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Storage => "storage",
            Self::Serialize => "serialize",
            Self::Deserialize => "deserialize",
            Self::Cache => "cache",
            Self::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Structured error for pagination and page-cache operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagerError {
    /// Processing phase where this error originated.
    pub phase: ErrorPhase,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: Box<str>,
    /// Optional file path context.
    pub path: Option<Box<str>>,
    /// Optional page index context.
    pub page_index: Option<u32>,
}

impl PagerError {
    /// Create an error for `phase` with a stable `code`.
    pub fn new(phase: ErrorPhase, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            phase,
            code,
            message: message.into().into_boxed_str(),
            path: None,
            page_index: None,
        }
    }

    /// Structural corruption found while decoding cached data.
    pub fn corrupt(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorPhase::Deserialize, code, message)
    }

    /// Attach a file path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into().into_boxed_str());
        self
    }

    /// Attach a page index.
    pub fn with_page_index(mut self, page_index: u32) -> Self {
        self.page_index = Some(page_index);
        self
    }

    /// Override the phase.
    pub fn with_phase(mut self, phase: ErrorPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Whether this error describes corrupt cached data (treated as a cache miss).
    pub fn is_corruption(&self) -> bool {
        self.code.starts_with("CORRUPT_")
    }
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.phase, self.code, self.message)?;
        if let Some(path) = self.path.as_deref() {
            write!(f, " [path={}]", path)?;
        }
        if let Some(page_index) = self.page_index {
            write!(f, " [page_index={}]", page_index)?;
        }
        Ok(())
    }
}

impl std::error::Error for PagerError {}

impl From<io::Error> for PagerError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Self::corrupt("CORRUPT_TRUNCATED", format!("Unexpected end of data: {}", err));
        }
        Self::new(ErrorPhase::Storage, "IO_ERROR", err.to_string())
    }
}
