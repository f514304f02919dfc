use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::browser::BrowserError;
use crate::images::ImageError;
use crate::persist::PersistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Html,
    File,
}

/// One user-supplied input of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub kind: SourceKind,
    pub value: String,
    #[serde(default)]
    pub meta: Vec<(String, String)>,
}

impl SourceRequest {
    pub fn url(value: impl Into<String>) -> Self {
        Self::new(SourceKind::Url, value)
    }

    pub fn html(value: impl Into<String>) -> Self {
        Self::new(SourceKind::Html, value)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(SourceKind::File, path.into().to_string_lossy().into_owned())
    }

    fn new(kind: SourceKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            meta: Vec::new(),
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub ignore_ssl: bool,
    pub use_proxy: bool,
    pub download_images: bool,
    pub filter_site_chrome: bool,
    pub use_shared_browser: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            ignore_ssl: false,
            use_proxy: false,
            download_images: true,
            filter_site_chrome: false,
            use_shared_browser: true,
        }
    }
}

/// Raw outcome of a handler: title plus Markdown body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResult {
    pub title: Option<String>,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(title: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.filter(|t| !t.trim().is_empty()),
            content: content.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            title: None,
            content: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Length of the trimmed body in characters.
    pub fn content_chars(&self) -> usize {
        self.content.trim().chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertResult {
    pub title: Option<String>,
    pub markdown: String,
    pub suggested_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Detail,
    ProgressInit,
    ProgressStep,
    ProgressDone,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            key: None,
            data: None,
            text: None,
            total: None,
            current: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_current(mut self, current: usize) -> Self {
        self.current = Some(current);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Decode,
    Network,
}

impl FailureKind {
    /// Whether the session retry policy applies to this failure.
    pub(crate) fn is_retryable(&self, statuses: &[u16]) -> bool {
        match self {
            FailureKind::HttpStatus(code) => statuses.contains(code),
            FailureKind::Timeout | FailureKind::Network => true,
            _ => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Decode => write!(f, "undecodable body"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("stop requested")]
    Stopped,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Images(#[from] ImageError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("http client setup failed: {0}")]
    Session(String),
    #[error("{handler}: every fetch strategy failed ({reason})")]
    Exhausted { handler: String, reason: String },
    #[error("unsupported source: {0}")]
    Unsupported(String),
}

impl ConvertError {
    pub fn is_stop(&self) -> bool {
        matches!(self, ConvertError::Stopped)
    }
}
