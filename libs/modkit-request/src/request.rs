use crate::body::{BodyKind, FilePart};
use crate::config::{ClientConfig, Proxy, RedirectPolicy};
use crate::cookie::{self, Cookie, CookieJar};
use crate::error::{HttpError, InvalidUriKind, SharedError};
use crate::response::{Decoded, HttpResponse};
use crate::transport::{Transport, TransportOptions};
use crate::values::{self, Values};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Method, Request};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Fluent HTTP request builder
///
/// Configuration methods take and return the builder by value. A method that
/// fails (bad URL, invalid header, conflicting body, unreadable attachment...)
/// records the error instead of returning it; every later configuration call
/// is then ignored and the error comes back from [`send`](Self::send).
///
/// A builder executes at most once. [`send`](Self::send) memoizes the outcome:
/// later calls return the same response (or a clone of the same error)
/// without touching the network, and configuration calls made after execution
/// are ignored.
///
/// # Body
///
/// Exactly one body representation is used:
/// - [`send_json`](Self::send_json) / [`send_str`](Self::send_str): explicit payload, only
///   allowed while no other body is set
/// - [`field`](Self::field): urlencoded form fields, rejected after an explicit payload
/// - [`attach`](Self::attach): switches to `multipart/form-data`; form fields collected
///   before or after are written as multipart fields
///
/// # Example
///
/// ```ignore
/// use modkit_request::Client;
/// use std::time::Duration;
///
/// let client = Client::new()?;
/// let mut req = client
///     .post("https://api.example.com/upload?v=2")
///     .query([("tag", "a"), ("tag", "b")])
///     .field([("title", "report")])
///     .attach("file", "./report.pdf", "report.pdf")
///     .basic_auth("user", "secret")
///     .timeout(Duration::from_secs(5));
///
/// let body = req.json_map().await?.into_result()?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    transport: Option<Arc<dyn Transport>>,
    method: Option<Method>,
    url: Option<Url>,
    headers: HeaderMap,
    query: Values,
    body: BodyKind,
    basic_auth: Option<(String, String)>,
    cookies: Vec<Cookie>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    timeout: Option<Duration>,
    redirect: RedirectPolicy,
    proxy: Option<Proxy>,
    max_body_size: usize,
    /// Sent when no `User-Agent` header is set
    user_agent: String,
    /// First configuration error (deferred to `send()`)
    error: Option<HttpError>,
    /// Memoized execution result
    outcome: Option<Result<HttpResponse, HttpError>>,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("body", &self.body.name())
            .field("timeout", &self.timeout)
            .field("redirect", &self.redirect)
            .field("proxy", &self.proxy)
            .field("error", &self.error)
            .field("executed", &self.outcome.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport: Some(transport),
            method: None,
            url: None,
            headers: HeaderMap::new(),
            query: Values::new(),
            body: BodyKind::Unset,
            basic_auth: None,
            cookies: Vec::new(),
            cookie_jar: None,
            timeout: config.request_timeout,
            redirect: config.redirect,
            proxy: None,
            max_body_size: config.max_body_size,
            user_agent: config.user_agent.clone(),
            error: None,
            outcome: None,
        }
    }

    /// Builder without a transport, carrying `error` to `send()`.
    pub(crate) fn failed(error: HttpError) -> Self {
        let config = ClientConfig::default();
        Self {
            transport: None,
            method: None,
            url: None,
            headers: HeaderMap::new(),
            query: Values::new(),
            body: BodyKind::Unset,
            basic_auth: None,
            cookies: Vec::new(),
            cookie_jar: None,
            timeout: config.request_timeout,
            redirect: config.redirect,
            proxy: None,
            max_body_size: config.max_body_size,
            user_agent: config.user_agent,
            error: Some(error),
            outcome: None,
        }
    }

    /// Whether a configuration call may still change the request.
    fn configurable(&self, operation: &'static str) -> bool {
        if self.outcome.is_some() {
            tracing::debug!(operation, "request already executed, ignoring configuration call");
            return false;
        }
        if let Some(error) = &self.error {
            tracing::trace!(operation, %error, "configuration error pending, ignoring call");
            return false;
        }
        true
    }

    fn fail(&mut self, error: HttpError) {
        tracing::debug!(%error, "request configuration failed");
        self.error = Some(error);
    }

    /// The deferred configuration error, if any
    #[must_use]
    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// Set the request method
    pub fn method(mut self, method: Method) -> Self {
        if self.configurable("method") {
            self.method = Some(method);
        }
        self
    }

    /// Set the target URL.
    ///
    /// Query parameters already in `url` become the initial query values;
    /// [`query`](Self::query) appends to them.
    pub fn url(mut self, url: &str) -> Self {
        if !self.configurable("url") {
            return self;
        }
        match parse_url(url) {
            Ok(mut parsed) => {
                self.query = parsed.query_pairs().into_owned().collect();
                parsed.set_query(None);
                self.url = Some(parsed);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Set method and URL together
    pub fn to(self, method: Method, url: &str) -> Self {
        self.method(method).url(url)
    }

    /// Set a header, replacing any existing values for `name`
    pub fn set(mut self, name: &str, value: &str) -> Self {
        if !self.configurable("set") {
            return self;
        }
        match values::parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Add a header value, keeping existing values for `name`
    pub fn add(mut self, name: &str, value: &str) -> Self {
        if !self.configurable("add") {
            return self;
        }
        match values::parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Merge headers: each key in `headers` replaces all existing values for
    /// that key; other keys are left alone.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        if self.configurable("headers") {
            values::merge_headers(&mut self.headers, headers);
        }
        self
    }

    /// Set `Content-Type`. Short aliases (`json`, `form`, `xml`, `html`,
    /// `text`, `urlencoded`, `form-data`, `multipart`) expand to MIME types.
    pub fn content_type(self, value: &str) -> Self {
        let mime = values::expand_mime_alias(value).to_owned();
        self.set(header::CONTENT_TYPE.as_str(), &mime)
    }

    /// Set `Accept`, with the same aliases as [`content_type`](Self::content_type)
    pub fn accept(self, value: &str) -> Self {
        let mime = values::expand_mime_alias(value).to_owned();
        self.set(header::ACCEPT.as_str(), &mime)
    }

    /// Append query parameters; repeated keys are kept in order.
    pub fn query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.configurable("query") {
            self.query.extend(pairs);
        }
        self
    }

    /// Use `body` serialized as JSON as the request body and set
    /// `Content-Type: application/json`.
    pub fn send_json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        if !self.configurable("send_json") {
            return self;
        }
        match serde_json::to_vec(body) {
            Ok(bytes) => self.set_raw_body(Bytes::from(bytes)),
            Err(err) => {
                self.fail(HttpError::Encoding(Arc::new(err) as SharedError));
                self
            }
        }
    }

    /// Use `body` verbatim as the request body and set
    /// `Content-Type: application/json`.
    pub fn send_str(self, body: impl Into<String>) -> Self {
        if !self.configurable("send_str") {
            return self;
        }
        self.set_raw_body(Bytes::from(body.into()))
    }

    fn set_raw_body(mut self, bytes: Bytes) -> Self {
        match self.body.set_raw(bytes) {
            Ok(()) => self.set(header::CONTENT_TYPE.as_str(), JSON_CONTENT_TYPE),
            Err(err) => {
                self.fail(err);
                self
            }
        }
    }

    /// Add form fields and set `Content-Type: application/x-www-form-urlencoded`.
    ///
    /// After [`attach`](Self::attach) the fields are sent as multipart fields.
    pub fn field<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if !self.configurable("field") {
            return self;
        }
        match self.body.add_fields(fields) {
            Ok(()) => self.set(header::CONTENT_TYPE.as_str(), FORM_CONTENT_TYPE),
            Err(err) => {
                self.fail(err);
                self
            }
        }
    }

    /// Attach the file at `path` as a multipart part named `field_name`.
    ///
    /// The file is read immediately. The final `Content-Type` is
    /// `multipart/form-data` with the generated boundary.
    pub fn attach(mut self, field_name: &str, path: impl AsRef<Path>, file_name: &str) -> Self {
        if !self.configurable("attach") {
            return self;
        }
        if matches!(self.body, BodyKind::Raw(_)) {
            self.fail(HttpError::BodyConflict {
                existing: self.body.name(),
                attempted: "multipart",
            });
            return self;
        }

        let path = path.as_ref();
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(err) => {
                self.fail(HttpError::FileOpen {
                    path: path.to_path_buf(),
                    source: Arc::new(err),
                });
                return self;
            }
        };

        if let Err(err) = self
            .body
            .add_file(FilePart::new(field_name, file_name, content))
        {
            self.fail(err);
        }
        self
    }

    /// HTTP Basic authentication
    pub fn basic_auth(mut self, name: &str, password: &str) -> Self {
        if self.configurable("basic_auth") {
            self.basic_auth = Some((name.to_owned(), password.to_owned()));
        }
        self
    }

    /// Send a cookie
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        if self.configurable("cookie") {
            self.cookies.push(cookie);
        }
        self
    }

    /// Send the jar's matching cookies and store the response's `Set-Cookie`
    /// headers back into it.
    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        if self.configurable("cookie_jar") {
            self.cookie_jar = Some(jar);
        }
        self
    }

    /// Time limit covering connecting, redirects and reading the response body
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if self.configurable("timeout") {
            self.timeout = Some(timeout);
        }
        self
    }

    /// Maximum number of redirects to follow; one more fails the request with
    /// `HttpError::TooManyRedirects`.
    pub fn redirects(mut self, max: usize) -> Self {
        if self.configurable("redirects") {
            self.redirect = RedirectPolicy::limited(max);
        }
        self
    }

    /// Route the request through a proxy (`http://`, `https://`, `socks5://`
    /// or `socks5h://`).
    pub fn proxy(mut self, addr: &str) -> Self {
        if !self.configurable("proxy") {
            return self;
        }
        match Proxy::parse(addr) {
            Ok(proxy) => self.proxy = Some(proxy),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Assemble the request without sending it.
    ///
    /// # Errors
    /// Returns the deferred configuration error first, then
    /// `HttpError::MissingUrl` or `HttpError::MissingMethod`, then any
    /// encoding failure.
    pub fn to_request(&self) -> Result<Request<Full<Bytes>>, HttpError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let mut url = self.url.clone().ok_or(HttpError::MissingUrl)?;
        let method = self.method.clone().ok_or(HttpError::MissingMethod)?;

        if self.query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&self.query.encode()?));
        }

        let (body, content_type) = self.body.resolve()?;
        let mut headers = self.headers.clone();
        if !headers.contains_key(header::USER_AGENT) && !self.user_agent.is_empty() {
            let (name, value) =
                values::parse_header(header::USER_AGENT.as_str(), &self.user_agent)?;
            headers.insert(name, value);
        }
        if let Some(content_type) = content_type {
            let (name, value) = values::parse_header(header::CONTENT_TYPE.as_str(), &content_type)?;
            headers.insert(name, value);
        }

        if let Some((name, password)) = &self.basic_auth {
            let encoded = BASE64.encode(format!("{name}:{password}"));
            let (name, mut value) =
                values::parse_header(header::AUTHORIZATION.as_str(), &format!("Basic {encoded}"))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let mut cookies = self.cookies.clone();
        if let Some(jar) = &self.cookie_jar {
            cookies.extend(jar.cookies(&url));
        }
        if !cookies.is_empty() {
            let mut line = cookie::header_value(&cookies);
            if let Some(existing) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
                line = format!("{existing}; {line}");
            }
            let (name, value) = values::parse_header(header::COOKIE.as_str(), &line)?;
            headers.insert(name, value);
        }

        let uri: http::Uri =
            url.as_str()
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: url.to_string(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body))
            .map_err(|e| HttpError::RequestBuild(Arc::new(e)))?;
        *request.headers_mut() = headers;
        Ok(request)
    }

    async fn execute(&self) -> Result<HttpResponse, HttpError> {
        let request = self.to_request()?;
        let Some(transport) = self.transport.clone() else {
            return Err(HttpError::transport("request has no transport"));
        };
        let url = Url::parse(&request.uri().to_string()).map_err(|e| HttpError::InvalidUri {
            url: request.uri().to_string(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

        let cancel = CancellationToken::new();
        let options = TransportOptions {
            redirect: self.redirect,
            proxy: self.proxy.clone(),
            cancel: cancel.clone(),
        };
        let deadline = self.timeout.map(|timeout| (Instant::now() + timeout, timeout));

        tracing::debug!(method = %request.method(), %url, "sending request");
        let pending = transport.execute(request, options);
        let response = match deadline {
            Some((at, timeout)) => match tokio::time::timeout_at(at, pending).await {
                Ok(result) => result?,
                Err(_) => {
                    cancel.cancel();
                    tracing::warn!(?timeout, %url, "request timed out");
                    return Err(HttpError::Timeout(timeout));
                }
            },
            None => pending.await?,
        };
        tracing::debug!(status = %response.status(), %url, "response received");

        if let Some(jar) = &self.cookie_jar {
            jar.store_response_cookies(&url, response.headers());
        }

        Ok(HttpResponse::new(
            response,
            url,
            self.max_body_size,
            deadline,
        ))
    }

    /// Execute the request, or return the memoized outcome of an earlier call.
    ///
    /// Any status code is a successful send; check
    /// [`HttpResponse::ok`] or use the decoders' `into_result()`.
    ///
    /// # Errors
    /// Returns the deferred configuration error, `HttpError::MissingUrl`,
    /// `HttpError::MissingMethod`, `HttpError::Timeout`,
    /// `HttpError::TooManyRedirects` or a transport error.
    pub async fn send(&mut self) -> Result<&mut HttpResponse, HttpError> {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.execute().await,
        };
        match self.outcome.insert(outcome) {
            Ok(response) => Ok(response),
            Err(err) => Err(err.clone()),
        }
    }

    /// Execute (if not done yet) and take ownership of the response.
    ///
    /// # Errors
    /// Same as [`send`](Self::send).
    pub async fn into_response(mut self) -> Result<HttpResponse, HttpError> {
        match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.execute().await,
        }
    }

    /// Execute and decode the body as text.
    ///
    /// # Errors
    /// Same as [`send`](Self::send) and [`HttpResponse::text`].
    pub async fn text(&mut self) -> Result<Decoded<String>, HttpError> {
        self.send().await?.text().await
    }

    /// Execute and decode the body as JSON.
    ///
    /// # Errors
    /// Same as [`send`](Self::send) and [`HttpResponse::json`].
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<Decoded<T>, HttpError> {
        self.send().await?.json().await
    }

    /// Execute and decode the body as a JSON object.
    ///
    /// # Errors
    /// Same as [`send`](Self::send) and [`HttpResponse::json_map`].
    pub async fn json_map(
        &mut self,
    ) -> Result<Decoded<serde_json::Map<String, serde_json::Value>>, HttpError> {
        self.send().await?.json_map().await
    }
}

/// Parse an absolute `http`/`https` URL.
fn parse_url(raw: &str) -> Result<Url, HttpError> {
    let invalid = |kind: InvalidUriKind, reason: String| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind,
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(InvalidUriKind::ParseError, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            InvalidUriKind::UnsupportedScheme,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(
            InvalidUriKind::MissingAuthority,
            "missing host".to_owned(),
        ));
    }
    Ok(url)
}
