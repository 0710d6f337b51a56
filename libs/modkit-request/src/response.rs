use crate::decode;
use crate::error::HttpError;
use crate::transport::{FinalUri, ResponseBody};
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Version, header};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Value decoded from a response body, paired with the response status.
///
/// A status of 400 or above does not discard the value: error payloads are
/// often worth reading. Use [`Decoded::into_result`] to treat such a status as
/// an error or [`Decoded::into_parts`] to get both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    value: T,
    status: StatusCode,
}

impl<T> Decoded<T> {
    pub(crate) fn new(value: T, status: StatusCode) -> Self {
        Self { value, status }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` when the status is below 400
    #[must_use]
    pub fn is_ok(&self) -> bool {
        is_ok_status(self.status)
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// `StatusNotOk` for a status of 400 or above
    #[must_use]
    pub fn error(&self) -> Option<HttpError> {
        (!self.is_ok()).then_some(HttpError::StatusNotOk {
            status: self.status,
        })
    }

    /// The value alongside the status error, if any
    #[must_use]
    pub fn into_parts(self) -> (T, Option<HttpError>) {
        let err = self.error();
        (self.value, err)
    }

    /// # Errors
    /// Returns `HttpError::StatusNotOk` if the status is 400 or above.
    pub fn into_result(self) -> Result<T, HttpError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }
}

fn is_ok_status(status: StatusCode) -> bool {
    status.as_u16() < 400
}

/// A received response.
///
/// The body is drained from the transport at most once, by the first of
/// [`raw`](Self::raw), [`content`](Self::content), [`text`](Self::text) or
/// [`json`](Self::json); every later call reads the cached bytes.
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    body: Option<ResponseBody>,
    raw: Option<Result<Bytes, HttpError>>,
    content: Option<Bytes>,
    max_body_size: usize,
    deadline: Option<(Instant, Duration)>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("drained", &self.raw.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Wrap a transport response.
    ///
    /// `deadline` is the request deadline, if any; it keeps applying while the
    /// body is drained.
    pub(crate) fn new(
        response: Response<ResponseBody>,
        request_url: Url,
        max_body_size: usize,
        deadline: Option<(Instant, Duration)>,
    ) -> Self {
        let (parts, body) = response.into_parts();
        let url = parts
            .extensions
            .get::<FinalUri>()
            .and_then(|FinalUri(uri)| Url::parse(&uri.to_string()).ok())
            .unwrap_or(request_url);

        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            url,
            body: Some(body),
            raw: None,
            content: None,
            max_body_size,
            deadline,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `true` when the status is below 400
    #[must_use]
    pub fn ok(&self) -> bool {
        is_ok_status(self.status)
    }

    /// Standard reason phrase for the status code (empty when unknown)
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// URL of the final request.
    ///
    /// For a 301, 302, 303 or 307 response (a redirect that was not followed)
    /// this is the `Location` header resolved against the request URL.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidLocation` if such a response has no usable
    /// `Location` header.
    pub fn url(&self) -> Result<Url, HttpError> {
        if !matches!(
            self.status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
        ) {
            return Ok(self.url.clone());
        }

        let location = self
            .headers
            .get(header::LOCATION)
            .ok_or_else(|| HttpError::InvalidLocation {
                reason: "missing Location header".to_owned(),
            })?
            .to_str()
            .map_err(|e| HttpError::InvalidLocation {
                reason: e.to_string(),
            })?;
        self.url
            .join(location)
            .map_err(|e| HttpError::InvalidLocation {
                reason: e.to_string(),
            })
    }

    /// Body bytes as received, drained once and cached.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` above the client's `max_body_size`,
    /// `HttpError::Timeout` if the request deadline passes while reading, or
    /// `HttpError::Transport` if the connection fails. The error is cached too.
    pub async fn raw(&mut self) -> Result<Bytes, HttpError> {
        if let Some(cached) = &self.raw {
            return cached.clone();
        }

        let result = match self.body.take() {
            Some(body) => {
                let read = read_body_limited(body, self.max_body_size);
                match self.deadline {
                    Some((at, timeout)) => match tokio::time::timeout_at(at, read).await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(?timeout, url = %self.url, "timed out reading response body");
                            Err(HttpError::Timeout(timeout))
                        }
                    },
                    None => read.await,
                }
            }
            None => Ok(Bytes::new()),
        };
        self.raw.insert(result).clone()
    }

    /// Body bytes after `Content-Encoding` decompression, cached.
    ///
    /// # Errors
    /// Returns the errors of [`raw`](Self::raw), or `HttpError::Decode` if
    /// the body cannot be decompressed.
    pub async fn content(&mut self) -> Result<Bytes, HttpError> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }

        let raw = self.raw().await?;
        let encoding = self
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok());
        let content = decode::decompress(encoding, &raw)?;
        Ok(self.content.insert(content).clone())
    }

    /// Decompressed body as text (invalid UTF-8 is replaced).
    ///
    /// # Errors
    /// Returns the errors of [`content`](Self::content).
    pub async fn text(&mut self) -> Result<Decoded<String>, HttpError> {
        let content = self.content().await?;
        Ok(Decoded::new(
            String::from_utf8_lossy(&content).into_owned(),
            self.status,
        ))
    }

    /// Decompressed body parsed as JSON.
    ///
    /// # Errors
    /// Returns `HttpError::NotJson` unless `Content-Type` starts with
    /// `application/json`, `HttpError::Json` if parsing fails, or the errors
    /// of [`content`](Self::content).
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<Decoded<T>, HttpError> {
        let content = self.content().await?;

        let content_type = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let is_json = content_type.is_some_and(|ct| {
            ct.trim_start()
                .get(..16)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("application/json"))
        });
        if !is_json {
            let message = if content.is_empty() {
                self.status.to_string()
            } else {
                String::from_utf8_lossy(&content).into_owned()
            };
            return Err(HttpError::NotJson {
                content_type: content_type.map(str::to_owned),
                message,
            });
        }

        let value = serde_json::from_slice(&content).map_err(|e| HttpError::Json(Arc::new(e)))?;
        Ok(Decoded::new(value, self.status))
    }

    /// [`json`](Self::json) into a generic string-keyed map.
    ///
    /// # Errors
    /// Same as [`json`](Self::json); a JSON body that is not an object fails
    /// with `HttpError::Json`.
    pub async fn json_map(
        &mut self,
    ) -> Result<Decoded<serde_json::Map<String, serde_json::Value>>, HttpError> {
        self.json().await
    }
}

async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| HttpError::Transport(Arc::from(e)))?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
