use crate::client::Client;
use crate::config::{ClientConfig, RedirectPolicy, TlsRootConfig};
use crate::error::HttpError;
use crate::hyper_transport::HyperTransport;
use crate::transport::Transport;
use crate::values;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`Client`].
///
/// Without [`transport`](Self::transport) the client uses a [`HyperTransport`]
/// built from the configuration.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
        }
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Default timeout for requests created by the client
    ///
    /// Covers connecting, redirects and reading the body. Requests can
    /// override it with [`RequestBuilder::timeout`](crate::RequestBuilder::timeout).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// TCP connect timeout of the default transport
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Default redirect cap; `0` fails on the first redirect
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.redirect = RedirectPolicy::limited(max_redirects);
        self
    }

    /// Root certificates used to verify servers
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Set the idle connection timeout for the connection pool
    ///
    /// `None` keeps idle connections indefinitely. Default: 90 seconds.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    ///
    /// Default: 32. `0` disables connection reuse.
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Send requests through a custom [`Transport`] instead of hyper.
    ///
    /// Connection settings (`connect_timeout`, `tls_roots`, pool) only apply
    /// to the default transport. The user agent is added by the request itself.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or the user agent is not
    /// a valid header value
    pub fn build(self) -> Result<Client, HttpError> {
        if !self.config.user_agent.is_empty() {
            values::parse_header(http::header::USER_AGENT.as_str(), &self.config.user_agent)?;
        }
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.config)?),
        };
        tracing::debug!(
            timeout = ?self.config.request_timeout,
            max_redirects = self.config.redirect.max_redirects,
            "http client built"
        );
        Ok(Client::from_parts(transport, self.config))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
