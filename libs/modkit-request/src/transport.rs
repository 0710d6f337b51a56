//! The transport capability the request builder executes against.

use crate::config::{Proxy, RedirectPolicy};
use crate::error::HttpError;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use http_body_util::combinators::BoxBody;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Response body handed back by a transport
pub type ResponseBody = BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Future returned by [`Transport::execute`]
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Per-request settings passed to the transport
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Redirect hook; a denial must fail the request with `TooManyRedirects`
    pub redirect: RedirectPolicy,
    /// Proxy to route through, if any
    pub proxy: Option<Proxy>,
    /// Cancelled when the caller stops waiting (timeout)
    pub cancel: CancellationToken,
}

/// Sends an assembled request and returns the response head plus an unread body.
///
/// Implementations follow redirects according to `options.redirect` and
/// should stop work promptly once `options.cancel` fires. When redirects are
/// followed, the response should carry the final request URI in its
/// extensions as a [`FinalUri`].
pub trait Transport: Send + Sync {
    fn execute(&self, request: Request<Full<Bytes>>, options: TransportOptions) -> TransportFuture;
}

/// URI of the last request in a redirect chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalUri(pub http::Uri);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    //! Scripted in-process transports shared by the unit tests.

    use super::*;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
        Full::new(bytes.into()).map_err(Into::into).boxed()
    }

    /// Returns a canned response and records every request it sees.
    pub(crate) struct MockTransport {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        body: Bytes,
        delay: Option<Duration>,
        pub calls: AtomicUsize,
        pub last_request: Mutex<Option<(Request<Bytes>, TransportOptions)>>,
        pub cancel_seen: Mutex<Option<CancellationToken>>,
    }

    impl MockTransport {
        pub(crate) fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: body.into(),
                delay: None,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                cancel_seen: Mutex::new(None),
            }
        }

        pub(crate) fn header(mut self, name: &'static str, value: &'static str) -> Self {
            self.headers.push((name, value));
            self
        }

        pub(crate) fn delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for Arc<MockTransport> {
        fn execute(
            &self,
            request: Request<Full<Bytes>>,
            options: TransportOptions,
        ) -> TransportFuture {
            let this = Arc::clone(self);
            Box::pin(async move {
                this.calls.fetch_add(1, Ordering::SeqCst);
                *this.cancel_seen.lock() = Some(options.cancel.clone());

                let (parts, body) = request.into_parts();
                let bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
                *this.last_request.lock() = Some((Request::from_parts(parts, bytes), options));

                if let Some(delay) = this.delay {
                    tokio::time::sleep(delay).await;
                }

                let mut builder = Response::builder().status(this.status);
                for (name, value) in &this.headers {
                    builder = builder.header(*name, *value);
                }
                Ok(builder.body(full_body(this.body.clone())).unwrap())
            })
        }
    }

    /// Replies with the request body and content type, like an echo endpoint.
    pub(crate) struct EchoTransport;

    impl Transport for EchoTransport {
        fn execute(
            &self,
            request: Request<Full<Bytes>>,
            _options: TransportOptions,
        ) -> TransportFuture {
            Box::pin(async move {
                let content_type = request.headers().get(http::header::CONTENT_TYPE).cloned();
                let body = request.into_body().collect().await.unwrap().to_bytes();
                let mut builder = Response::builder().status(StatusCode::OK);
                if let Some(ct) = content_type {
                    builder = builder.header(http::header::CONTENT_TYPE, ct);
                }
                Ok(builder.body(full_body(body)).unwrap())
            })
        }
    }
}
