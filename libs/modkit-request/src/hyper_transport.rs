use crate::config::{ClientConfig, Proxy};
use crate::error::HttpError;
use crate::layers::RedirectLimitPolicy;
use crate::tls;
use crate::transport::{FinalUri, Transport, TransportFuture, TransportOptions};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::proxy::{SocksV5, Tunnel};
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::follow_redirect::{FollowRedirectLayer, RequestUri};

type ClientService = BoxCloneSyncService<
    Request<Full<Bytes>>,
    Response<Incoming>,
    hyper_util::client::legacy::Error,
>;

/// Default [`Transport`]: a pooled hyper-util client over rustls.
///
/// HTTP/1.1 and HTTP/2 are negotiated through ALPN. Redirects are followed by
/// tower-http's `FollowRedirect` under the request's redirect cap. Bodies are
/// returned exactly as received; `Content-Encoding` is left to
/// [`HttpResponse::content`](crate::HttpResponse::content).
///
/// One connection pool is kept for direct traffic and one per distinct proxy,
/// created on first use.
pub struct HyperTransport {
    config: ClientConfig,
    direct: ClientService,
    proxied: Mutex<HashMap<Proxy, ClientService>>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .field("proxies", &self.proxied.lock().len())
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS roots cannot be loaded.
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        let direct = legacy_client(
            config,
            tls::https_connector(config.tls_roots, http_connector(config))?,
        );
        Ok(Self {
            config: config.clone(),
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<ClientService, HttpError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cache = self.proxied.lock();
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }
        let client = proxied_client(&self.config, proxy)?;
        tracing::debug!(proxy = %proxy.uri(), "created proxied connection pool");
        cache.insert(proxy.clone(), client.clone());
        Ok(client)
    }
}

impl Transport for HyperTransport {
    fn execute(&self, request: Request<Full<Bytes>>, options: TransportOptions) -> TransportFuture {
        let client = match self.client_for(options.proxy.as_ref()) {
            Ok(client) => client,
            Err(err) => return Box::pin(async move { Err(err) }),
        };

        Box::pin(async move {
            let policy = RedirectLimitPolicy::new(options.redirect);
            let exceeded = policy.exceeded_flag();
            let service = ServiceBuilder::new()
                .layer(FollowRedirectLayer::with_policy(policy))
                .service(client);

            let response = tokio::select! {
                biased;
                () = options.cancel.cancelled() => return Err(HttpError::Cancelled),
                result = service.oneshot(request) => result?,
            };

            if exceeded.load(Ordering::SeqCst) {
                return Err(HttpError::TooManyRedirects {
                    max: options.redirect.max_redirects,
                });
            }

            let (mut parts, body) = response.into_parts();
            if let Some(RequestUri(uri)) = parts.extensions.remove::<RequestUri>() {
                parts.extensions.insert(FinalUri(uri));
            }
            Ok(Response::from_parts(parts, body.map_err(Into::into).boxed()))
        })
    }
}

fn http_connector(config: &ClientConfig) -> HttpConnector {
    let mut http = HttpConnector::new();
    // https is handled by the rustls wrapper
    http.enforce_http(false);
    http.set_connect_timeout(config.connect_timeout);
    http
}

fn legacy_client<C>(config: &ClientConfig, connector: C) -> ClientService
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let mut builder = Client::builder(TokioExecutor::new());
    // pool_idle_timeout needs a timer
    builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host);
    if let Some(idle_timeout) = config.pool_idle_timeout {
        builder.pool_idle_timeout(idle_timeout);
    }
    BoxCloneSyncService::new(builder.build::<_, Full<Bytes>>(connector))
}

fn proxied_client(config: &ClientConfig, proxy: &Proxy) -> Result<ClientService, HttpError> {
    match proxy {
        Proxy::Http(uri) => {
            // TLS towards the proxy itself when it is an https:// proxy
            let to_proxy = tls::https_connector(config.tls_roots, http_connector(config))?;
            let mut tunnel = Tunnel::new(uri.clone(), to_proxy);
            if let Some((user, password)) = proxy.credentials() {
                tunnel = tunnel.with_auth(basic_auth_value(proxy, &user, &password)?);
            }
            Ok(legacy_client(
                config,
                tls::https_connector(config.tls_roots, tunnel)?,
            ))
        }
        Proxy::Socks5(uri) => {
            // socks5h resolves names on the proxy
            let mut socks = SocksV5::new(uri.clone(), http_connector(config))
                .local_dns(uri.scheme_str() == Some("socks5"));
            if let Some((user, password)) = proxy.credentials() {
                socks = socks.with_auth(user, password);
            }
            Ok(legacy_client(
                config,
                tls::https_connector(config.tls_roots, socks)?,
            ))
        }
    }
}

fn basic_auth_value(proxy: &Proxy, user: &str, password: &str) -> Result<HeaderValue, HttpError> {
    let encoded = BASE64.encode(format!("{user}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|e| HttpError::InvalidProxy {
        url: proxy.uri().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::RedirectPolicy;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn transport() -> HyperTransport {
        HyperTransport::new(&ClientConfig::for_testing()).unwrap()
    }

    fn get(url: &str) -> Request<Full<Bytes>> {
        Request::get(url).body(Full::new(Bytes::new())).unwrap()
    }

    fn options(max_redirects: usize) -> TransportOptions {
        TransportOptions {
            redirect: RedirectPolicy::limited(max_redirects),
            ..TransportOptions::default()
        }
    }

    #[tokio::test]
    async fn test_plain_request_returns_raw_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/data");
            then.status(200)
                .header("content-encoding", "gzip")
                .body("not really gzip");
        });

        let response = transport()
            .execute(get(&server.url("/data")), options(10))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"not really gzip");
    }

    #[tokio::test]
    async fn test_redirect_followed_and_final_uri_reported() {
        let server = MockServer::start();
        let _start = server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(302).header("location", "/landing");
        });
        let landing = server.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200).body("arrived");
        });

        let response = transport()
            .execute(get(&server.url("/start")), options(10))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let FinalUri(uri) = response.extensions().get::<FinalUri>().unwrap().clone();
        assert_eq!(uri.path(), "/landing");
        landing.assert();
    }

    #[tokio::test]
    async fn test_redirect_cap_zero_fails() {
        let server = MockServer::start();
        let _start = server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(302).header("location", "/landing");
        });
        let landing = server.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200);
        });

        let err = transport()
            .execute(get(&server.url("/start")), options(0))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::TooManyRedirects { max: 0 }));
        assert_eq!(landing.calls(), 0);
    }

    #[tokio::test]
    async fn test_redirect_chain_longer_than_cap_fails() {
        let server = MockServer::start();
        let _one = server.mock(|when, then| {
            when.method(GET).path("/one");
            then.status(301).header("location", "/two");
        });
        let _two = server.mock(|when, then| {
            when.method(GET).path("/two");
            then.status(301).header("location", "/three");
        });
        let _three = server.mock(|when, then| {
            when.method(GET).path("/three");
            then.status(200);
        });

        let transport = transport();
        let err = transport
            .execute(get(&server.url("/one")), options(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::TooManyRedirects { max: 1 }));

        let ok = transport
            .execute(get(&server.url("/one")), options(2))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
    }

    #[tokio::test]
    async fn test_cross_origin_redirect_strips_authorization() {
        let target = MockServer::start();
        let leaked = target.mock(|when, then| {
            when.method(GET).path("/landing").header_exists("authorization");
            then.status(500);
        });
        let clean = target.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200);
        });

        let origin = MockServer::start();
        let landing_url = target.url("/landing");
        let _start = origin.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(302).header("location", landing_url.as_str());
        });

        let request = Request::get(origin.url("/start"))
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = transport().execute(request, options(10)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(leaked.calls(), 0);
        clean.assert();
    }

    #[tokio::test]
    async fn test_cancel_token_aborts_request() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(5));
        });

        let cancel = CancellationToken::new();
        let opts = TransportOptions {
            cancel: cancel.clone(),
            ..options(10)
        };
        let pending = transport().execute(get(&server.url("/slow")), opts);
        cancel.cancel();

        let started = std::time::Instant::now();
        let err = pending.await.unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let err = transport()
            .execute(get("http://127.0.0.1:1/"), options(10))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
    }

    #[test]
    fn test_proxied_clients_are_cached() {
        let transport = transport();
        let proxy = Proxy::parse("socks5://127.0.0.1:1080").unwrap();
        transport.client_for(Some(&proxy)).unwrap();
        transport.client_for(Some(&proxy)).unwrap();
        transport
            .client_for(Some(&Proxy::parse("http://127.0.0.1:3128").unwrap()))
            .unwrap();
        assert_eq!(transport.proxied.lock().len(), 2);
    }
}
