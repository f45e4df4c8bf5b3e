//! Structured error type shared by every pagemill crate.
//!
//! Errors carry a stable kind, a human-readable message, key-value
//! context, a retryability flag, and an optional cause chain.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Request exceeded its deadline.
    NetworkTimeout,
    /// Connection refused/reset or DNS failure.
    ConnectionFailed,
    /// HTTP status >= 400 (status carried in context).
    HttpError,
    /// TLS/certificate failure.
    SslError,
    /// Retry budget exhausted.
    MaxRetriesExceeded,
    /// HTML/XML parse failure.
    ParsingFailed,
    /// Requested element/selector not present.
    ElementNotFound,
    /// Serializer failure.
    ConversionFailed,
    /// Configuration field out of domain or cross-field constraint broken.
    ConfigInvalid,
    /// Content exceeds the configured size budget.
    MemoryLimitExceeded,
    /// Cold-tier cache read/write failed.
    CacheIo,
    /// Chunker received pathological input.
    ChunkingFailed,
}

impl ErrorKind {
    /// Stable label used in rendered messages and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorKind::ConnectionFailed => "CONNECTION_FAILED",
            ErrorKind::HttpError => "HTTP_ERROR",
            ErrorKind::SslError => "SSL_ERROR",
            ErrorKind::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorKind::ParsingFailed => "PARSING_FAILED",
            ErrorKind::ElementNotFound => "ELEMENT_NOT_FOUND",
            ErrorKind::ConversionFailed => "CONVERSION_FAILED",
            ErrorKind::ConfigInvalid => "CONFIG_INVALID",
            ErrorKind::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            ErrorKind::CacheIo => "CACHE_IO",
            ErrorKind::ChunkingFailed => "CHUNKING_FAILED",
        }
    }

    /// Whether an operation failing with this kind may succeed on retry.
    ///
    /// `HttpError` is conditionally retryable (429/408/5xx); constructors
    /// override the default with the status-specific answer.
    #[must_use]
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTimeout | ErrorKind::ConnectionFailed
        )
    }
}

/// Error with structured context.
#[derive(Debug, ThisError)]
#[error("{}", render(.kind, .message, .context))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(String, String)>,
    retryable: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn render(kind: &ErrorKind, message: &str, context: &[(String, String)]) -> String {
    let mut out = format!("[{}] {message}", kind.label());
    if !context.is_empty() {
        let rendered: Vec<String> = context.iter().map(|(k, v)| format!("{k}={v}")).collect();
        out.push_str(&format!(" ({})", rendered.join(", ")));
    }
    out
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            retryable: kind.default_retryable(),
            source: None,
        }
    }

    /// Add a context field.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the kind's default retryability.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// Look up a single context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize for structured logging.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "kind": self.kind,
            "message": self.message,
            "retryable": self.retryable,
        });

        if !self.context.is_empty() {
            let context: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            obj["context"] = serde_json::Value::Object(context);
        }
        if let Some(source) = &self.source {
            obj["cause"] = serde_json::Value::String(source.to_string());
        }

        obj
    }
}
