use crate::builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::transport::Transport;
use http::Method;
use std::sync::Arc;

/// Shared transport plus request defaults
///
/// Every [`RequestBuilder`] created from a client sends through the same
/// transport (and so the same connection pools) and starts from the client's
/// timeout, redirect cap and body size limit.
///
/// # Thread Safety
///
/// `Client` is `Clone + Send + Sync`; cloning is an `Arc` clone.
///
/// # Example
///
/// ```ignore
/// use modkit_request::Client;
/// use std::time::Duration;
///
/// let client = Client::builder()
///     .timeout(Duration::from_secs(10))
///     .user_agent("my-app/1.0")
///     .build()?;
///
/// let user: User = client
///     .get("https://example.com/api/users/1")
///     .accept("json")
///     .json()
///     .await?
///     .into_result()?;
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }

    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request builder with neither method nor URL set
    pub fn new_request(&self) -> RequestBuilder {
        RequestBuilder::new(Arc::clone(&self.transport), &self.config)
    }

    /// Request builder for `method` and `url`
    ///
    /// `url` must be an absolute `http` or `https` URL; otherwise the builder
    /// carries an `HttpError::InvalidUri` to `send()`.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.new_request().to(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }
}

/// Request builder on a fresh default [`Client`].
///
/// Each call builds its own client, so connections are not shared between
/// builders; create a [`Client`] once to reuse them. A failure to build the
/// client is reported by `send()`.
pub fn request(method: Method, url: &str) -> RequestBuilder {
    match Client::new() {
        Ok(client) => client.request(method, url),
        Err(err) => RequestBuilder::failed(err),
    }
}

/// GET request on a fresh default client, see [`request`]
pub fn get(url: &str) -> RequestBuilder {
    request(Method::GET, url)
}

/// POST request on a fresh default client, see [`request`]
pub fn post(url: &str) -> RequestBuilder {
    request(Method::POST, url)
}

/// PUT request on a fresh default client, see [`request`]
pub fn put(url: &str) -> RequestBuilder {
    request(Method::PUT, url)
}

/// PATCH request on a fresh default client, see [`request`]
pub fn patch(url: &str) -> RequestBuilder {
    request(Method::PATCH, url)
}

/// DELETE request on a fresh default client, see [`request`]
pub fn delete(url: &str) -> RequestBuilder {
    request(Method::DELETE, url)
}

/// HEAD request on a fresh default client, see [`request`]
pub fn head(url: &str) -> RequestBuilder {
    request(Method::HEAD, url)
}
