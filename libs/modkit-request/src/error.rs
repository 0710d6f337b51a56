use http::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, type-erased error source.
///
/// Sources are reference counted so that a memoized outcome can be handed out
/// more than once by [`RequestBuilder::send`](crate::RequestBuilder::send).
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL uses a scheme other than http/https
    UnsupportedScheme,
}

/// HTTP request error types
///
/// Configuration errors are captured by the builder and surfaced when the
/// request is executed; transport and decoding errors are returned where they
/// occur.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HttpError {
    /// Execution was triggered before a URL was set
    #[error("request lacks URL")]
    MissingUrl,

    /// Execution was triggered before a method was set
    #[error("request lacks method")]
    MissingMethod,

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid header name or value
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// A second, incompatible body-producing call
    #[error("request body has already been set as {existing}, cannot add {attempted}")]
    BodyConflict {
        /// Body kind already in effect
        existing: &'static str,
        /// Body kind the rejected call tried to set
        attempted: &'static str,
    },

    /// Request body could not be encoded
    #[error("Failed to encode request body: {0}")]
    Encoding(#[source] SharedError),

    /// Attachment file could not be opened or read
    #[error("Failed to open attachment '{}': {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Proxy address is not usable
    #[error("Invalid proxy '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[source] Arc<http::Error>),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] SharedError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] SharedError),

    /// The in-flight request was cancelled through its cancellation token
    #[error("Request cancelled")]
    Cancelled,

    /// Redirect chain exceeded the configured cap
    #[error("Stopped after {max} redirects")]
    TooManyRedirects { max: usize },

    /// Request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Every decompression attempt failed
    #[error("Failed to decode '{encoding}' response body: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Response `Content-Type` is not `application/json`
    ///
    /// `message` holds the response body text, or the status line when the
    /// body is empty.
    #[error("{message}")]
    NotJson {
        content_type: Option<String>,
        message: String,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// HTTP status is 400 or above
    #[error("request: status code is not ok: {status}")]
    StatusNotOk { status: StatusCode },

    /// Redirect response without a resolvable `Location` header
    #[error("Redirect response has no usable Location header: {reason}")]
    InvalidLocation { reason: String },
}

impl HttpError {
    /// Wrap any error as a transport failure.
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HttpError::Transport(Arc::from(err.into()))
    }

    /// Returns `true` for [`HttpError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout(_))
    }

    /// Returns the response status for [`HttpError::StatusNotOk`].
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::StatusNotOk { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::transport(err)
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::transport(err)
    }
}
